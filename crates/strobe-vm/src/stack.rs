use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use strobe_types::{CallSiteIndex, CodeBlockId, EncodedValue, FramePointer, InstructionPointer};

/// Bytes between two adjacent activation records.
pub const FRAME_SIZE: u64 = 64;

const STACK_REGION_TOP: u64 = 0x7f00_0000_0000;
const STACK_GUARD_GAP: u64 = 1 << 20;

static NEXT_STACK_BASE: AtomicU64 = AtomicU64::new(STACK_REGION_TOP);

/// Contents of one activation record as laid out by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallFrame {
    /// Caller's frame, or [`FramePointer::NULL`] for the outermost frame.
    pub caller: FramePointer,
    pub code_block: Option<CodeBlockId>,
    pub call_site: Option<CallSiteIndex>,
    pub callee: EncodedValue,
    pub return_pc: InstructionPointer,
}

#[derive(Default)]
struct FrameSlot {
    caller: AtomicU64,
    code_block: AtomicU64,
    // Stored as index + 1; zero means no call site.
    call_site: AtomicU32,
    callee: AtomicU64,
    return_pc: AtomicU64,
}

impl FrameSlot {
    fn store(&self, frame: &CallFrame) {
        self.caller.store(frame.caller.get(), Ordering::Relaxed);
        self.code_block.store(
            frame.code_block.map_or(0, CodeBlockId::get),
            Ordering::Relaxed,
        );
        self.call_site.store(
            frame.call_site.map_or(0, |site| site.get().saturating_add(1)),
            Ordering::Relaxed,
        );
        self.callee.store(frame.callee.bits(), Ordering::Relaxed);
        self.return_pc
            .store(frame.return_pc.get(), Ordering::Relaxed);
    }

    fn load(&self) -> CallFrame {
        CallFrame {
            caller: FramePointer::new(self.caller.load(Ordering::Relaxed)),
            code_block: CodeBlockId::new(self.code_block.load(Ordering::Relaxed)).ok(),
            call_site: match self.call_site.load(Ordering::Relaxed) {
                0 => None,
                encoded => Some(CallSiteIndex::new(encoded - 1)),
            },
            callee: EncodedValue::from_bits(self.callee.load(Ordering::Relaxed)),
            return_pc: InstructionPointer::new(self.return_pc.load(Ordering::Relaxed)),
        }
    }
}

/// Call-stack memory of one execution thread.
///
/// Frames grow downward from `base`. Slots above the current top keep their
/// last contents, like a real stack, so a stale frame pointer still reads
/// *something*; callers must not treat a successful read as liveness.
pub struct MachineStack {
    base: u64,
    slots: Box<[FrameSlot]>,
    depth: AtomicUsize,
}

impl MachineStack {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let span = capacity as u64 * FRAME_SIZE;
        let base = NEXT_STACK_BASE.fetch_sub(span + STACK_GUARD_GAP, Ordering::Relaxed);
        let slots = (0..capacity).map(|_| FrameSlot::default()).collect();
        Self {
            base,
            slots,
            depth: AtomicUsize::new(0),
        }
    }

    /// Highest address of the stack (exclusive bound of the first frame).
    pub fn base(&self) -> FramePointer {
        FramePointer::new(self.base)
    }

    /// Lowest address a frame may occupy.
    pub fn limit(&self) -> FramePointer {
        FramePointer::new(self.base - self.slots.len() as u64 * FRAME_SIZE)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bounds check against `[limit, base]`.
    pub fn contains(&self, fp: FramePointer) -> bool {
        self.limit() <= fp && fp <= self.base()
    }

    fn slot_index(&self, fp: FramePointer) -> Option<usize> {
        if !self.contains(fp) || fp.get() == self.base {
            return None;
        }
        let offset = self.base - fp.get();
        if offset % FRAME_SIZE != 0 {
            return None;
        }
        let index = (offset / FRAME_SIZE) as usize - 1;
        (index < self.slots.len()).then_some(index)
    }

    fn frame_pointer_at(&self, index: usize) -> FramePointer {
        FramePointer::new(self.base - (index as u64 + 1) * FRAME_SIZE)
    }

    /// Reads the record at `fp` without allocating or locking.
    pub fn read_frame(&self, fp: FramePointer) -> Option<CallFrame> {
        self.slot_index(fp).map(|index| self.slots[index].load())
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Innermost live frame, or the root sentinel when the stack is empty.
    pub fn top(&self) -> FramePointer {
        match self.depth() {
            0 => FramePointer::NULL,
            depth => self.frame_pointer_at(depth - 1),
        }
    }

    /// Pushes a record; `None` on overflow.
    pub(crate) fn push(&self, frame: CallFrame) -> Option<FramePointer> {
        let depth = self.depth.load(Ordering::Acquire);
        if depth == self.slots.len() {
            return None;
        }
        self.slots[depth].store(&frame);
        self.depth.store(depth + 1, Ordering::Release);
        Some(self.frame_pointer_at(depth))
    }

    pub(crate) fn pop(&self) -> Option<CallFrame> {
        let depth = self.depth.load(Ordering::Acquire);
        if depth == 0 {
            return None;
        }
        let frame = self.slots[depth - 1].load();
        self.depth.store(depth - 1, Ordering::Release);
        Some(frame)
    }

    /// Live frames, innermost first.
    pub fn live_frames(&self) -> impl Iterator<Item = CallFrame> + '_ {
        let depth = self.depth();
        (0..depth).rev().map(|index| self.slots[index].load())
    }
}

impl std::fmt::Debug for MachineStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineStack")
            .field("base", &self.base())
            .field("limit", &self.limit())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(caller: FramePointer, site: Option<u32>) -> CallFrame {
        CallFrame {
            caller,
            code_block: CodeBlockId::new(9).ok(),
            call_site: site.map(CallSiteIndex::new),
            callee: EncodedValue::from_int32(5),
            return_pc: InstructionPointer::new(0x1234),
        }
    }

    #[test]
    fn frames_grow_downward_and_read_back() {
        let stack = MachineStack::new(4);
        let outer = stack.push(frame(FramePointer::NULL, None)).expect("room");
        let inner = stack.push(frame(outer, Some(0))).expect("room");
        assert!(inner < outer);
        assert_eq!(stack.top(), inner);
        assert_eq!(stack.depth(), 2);

        let read = stack.read_frame(inner).expect("inner frame is readable");
        assert_eq!(read.caller, outer);
        assert_eq!(read.call_site, Some(CallSiteIndex::new(0)));
        assert_eq!(stack.read_frame(outer).expect("outer").call_site, None);
    }

    #[test]
    fn misaligned_and_foreign_pointers_are_rejected() {
        let stack = MachineStack::new(4);
        let fp = stack.push(frame(FramePointer::NULL, None)).expect("room");
        assert!(stack.read_frame(FramePointer::new(fp.get() + 8)).is_none());
        assert!(stack.read_frame(stack.base()).is_none());
        assert!(stack.read_frame(FramePointer::new(0x10)).is_none());
        assert!(!stack.contains(FramePointer::new(stack.limit().get() - FRAME_SIZE)));
    }

    #[test]
    fn stacks_do_not_overlap() {
        let a = MachineStack::new(8);
        let b = MachineStack::new(8);
        assert!(!a.contains(b.base()) || !a.contains(b.limit()));
        assert!(!b.contains(a.limit()));
    }

    #[test]
    fn overflow_and_stale_slots() {
        let stack = MachineStack::new(1);
        let fp = stack.push(frame(FramePointer::NULL, None)).expect("room");
        assert!(stack.push(frame(fp, None)).is_none(), "stack is full");
        stack.pop().expect("one frame");
        assert_eq!(stack.top(), FramePointer::NULL);
        assert!(
            stack.read_frame(fp).is_some(),
            "popped slots keep their old contents"
        );
        assert_eq!(stack.live_frames().count(), 0);
    }
}

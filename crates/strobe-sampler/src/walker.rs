use strobe_types::{FramePointer, StackFrame};
use strobe_vm::{CallFrame, CodeRegistry, ThreadRegistry};

/// Result of one walk over a suspended thread's stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Entries written to the front of the buffer.
    pub depth: usize,
    /// The buffer filled up before the root sentinel was reached.
    pub ran_out_of_space: bool,
    /// At least one entry is an unverified callee.
    pub needs_verification: bool,
    /// `false` when a frame pointer left every known stack; the entries are garbage then.
    pub was_valid: bool,
}

/// Walks frame-pointer chains using only the locked thread and code registries.
///
/// Runs while the target thread is suspended, so it never allocates, logs
/// or takes a lock.
pub struct FrameWalker<'a> {
    threads: &'a ThreadRegistry,
    code: &'a CodeRegistry,
    call_frame: FramePointer,
    frame: Option<CallFrame>,
    depth: usize,
    needs_verification: bool,
    bailing_out: bool,
}

impl<'a> FrameWalker<'a> {
    pub fn new(threads: &'a ThreadRegistry, code: &'a CodeRegistry, start: FramePointer) -> Self {
        Self {
            threads,
            code,
            call_frame: start,
            frame: None,
            depth: 0,
            needs_verification: false,
            bailing_out: false,
        }
    }

    pub fn walk(mut self, frames: &mut [StackFrame]) -> WalkOutcome {
        let capacity = frames.len();
        self.reset_at_machine_frame();
        while !self.is_at_top() && !self.bailing_out && self.depth < capacity {
            if !self.record_machine_frame(frames) {
                break;
            }
            self.advance_to_parent_frame();
            self.reset_at_machine_frame();
        }

        WalkOutcome {
            depth: self.depth,
            ran_out_of_space: self.depth >= capacity && !self.is_at_top(),
            needs_verification: self.needs_verification,
            was_valid: !self.bailing_out,
        }
    }

    fn is_at_top(&self) -> bool {
        self.call_frame.is_null()
    }

    fn reset_at_machine_frame(&mut self) {
        if self.is_at_top() {
            return;
        }
        // Rejects anything outside every registered stack, and misaligned slots.
        match self.threads.read_frame(self.call_frame) {
            Some(frame) => self.frame = Some(frame),
            None => {
                self.frame = None;
                self.bailing_out = true;
            }
        }
    }

    fn advance_to_parent_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            self.bailing_out = true;
            return;
        };
        // Callers live at higher addresses; anything else is a corrupt chain.
        if !frame.caller.is_null() && frame.caller <= self.call_frame {
            self.bailing_out = true;
            return;
        }
        self.call_frame = frame.caller;
    }

    /// Emits the inline chain and the machine frame itself. Returns `false`
    /// if the buffer filled up part way through.
    fn record_machine_frame(&mut self, frames: &mut [StackFrame]) -> bool {
        let Some(frame) = self.frame else {
            self.bailing_out = true;
            return false;
        };

        let Some(block) = frame.code_block.and_then(|id| self.code.get(id)) else {
            frames[self.depth] = StackFrame::UnverifiedCallee(frame.callee);
            self.depth += 1;
            self.needs_verification = true;
            return true;
        };

        if let Some(site) = frame.call_site {
            for &inlined in block.inline_chain(site) {
                if self.depth >= frames.len() {
                    return false;
                }
                frames[self.depth] = StackFrame::VerifiedExecutable(inlined);
                self.depth += 1;
            }
        }
        if self.depth >= frames.len() {
            return false;
        }
        frames[self.depth] = StackFrame::VerifiedExecutable(block.owner());
        self.depth += 1;
        true
    }
}

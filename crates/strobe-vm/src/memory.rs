use std::collections::BTreeMap;
use std::ops::Range;

use strobe_types::InstructionPointer;

/// Address range of the interpreter's own machine code.
pub const INTERPRETER_CODE: Range<u64> = 0x1000_0000..0x1010_0000;

/// Address range standing in for host-side native code (runtime functions,
/// embedder callbacks). Never part of executable memory.
pub const NATIVE_CODE: Range<u64> = 0x4000_0000..0x4100_0000;

const JIT_REGION_BASE: u64 = 0x2000_0000_0000;
const JIT_ALIGNMENT: u64 = 64;

pub fn is_interpreter_pc(pc: InstructionPointer) -> bool {
    INTERPRETER_CODE.contains(&pc.get())
}

pub fn is_native_pc(pc: InstructionPointer) -> bool {
    NATIVE_CODE.contains(&pc.get())
}

/// Registry of machine-code regions handed out to compiled code blocks.
#[derive(Debug)]
pub struct ExecutableMemory {
    next: u64,
    // start -> end
    regions: BTreeMap<u64, u64>,
}

impl Default for ExecutableMemory {
    fn default() -> Self {
        Self {
            next: JIT_REGION_BASE,
            regions: BTreeMap::new(),
        }
    }
}

impl ExecutableMemory {
    pub(crate) fn allocate(&mut self, size: u64) -> Range<u64> {
        let size = size.max(1).next_multiple_of(JIT_ALIGNMENT);
        let start = self.next;
        self.next += size;
        self.regions.insert(start, start + size);
        start..start + size
    }

    pub(crate) fn release(&mut self, region: &Range<u64>) {
        self.regions.remove(&region.start);
    }

    /// Whether `pc` falls inside a currently allocated region.
    pub fn is_valid_executable_memory(&self, pc: InstructionPointer) -> bool {
        let pc = pc.get();
        self.regions
            .range(..=pc)
            .next_back()
            .is_some_and(|(_, &end)| pc < end)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_regions_are_executable_until_released() {
        let mut memory = ExecutableMemory::default();
        let a = memory.allocate(100);
        let b = memory.allocate(10);
        assert_eq!(a.end - a.start, 128);
        assert!(memory.is_valid_executable_memory(InstructionPointer::new(a.start + 5)));
        assert!(memory.is_valid_executable_memory(InstructionPointer::new(b.start)));
        assert!(!memory.is_valid_executable_memory(InstructionPointer::new(b.end)));

        memory.release(&a);
        assert!(!memory.is_valid_executable_memory(InstructionPointer::new(a.start + 5)));
        assert_eq!(memory.region_count(), 1);
    }

    #[test]
    fn interpreter_and_native_ranges_are_disjoint_from_jit_code() {
        let mut memory = ExecutableMemory::default();
        let region = memory.allocate(64);
        let interp = InstructionPointer::new(INTERPRETER_CODE.start + 4);
        assert!(is_interpreter_pc(interp));
        assert!(!memory.is_valid_executable_memory(interp));
        assert!(!is_interpreter_pc(InstructionPointer::new(region.start)));
        assert!(is_native_pc(InstructionPointer::new(NATIVE_CODE.start)));
        assert!(!is_native_pc(interp));
    }
}

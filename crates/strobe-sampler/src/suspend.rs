use strobe_types::{FramePointer, Registers, StackFrame};
use strobe_vm::{ExecutableMemory, RegistryLocks, SuspendableThread, Vm, is_interpreter_pc};

use crate::walker::{FrameWalker, WalkOutcome};

/// Resumes the target when dropped, on every exit path.
pub(crate) struct SuspendedThread<'a> {
    thread: &'a dyn SuspendableThread,
}

impl<'a> SuspendedThread<'a> {
    pub(crate) fn suspend(thread: &'a dyn SuspendableThread) -> Option<Self> {
        thread.suspend().then_some(Self { thread })
    }

    pub(crate) fn registers(&self) -> Option<Registers> {
        self.thread.registers()
    }
}

impl Drop for SuspendedThread<'_> {
    fn drop(&mut self) {
        self.thread.resume();
    }
}

/// Picks the frame pointer to start walking from.
///
/// A program counter in JIT code means the frame-pointer register is
/// trustworthy, except inside the regexp JIT which uses it as scratch. In the
/// interpreter it is trustworthy too. Anywhere else (runtime or host code)
/// the engine's last published managed frame is the best available start.
pub(crate) fn choose_start_frame(
    vm: &Vm,
    executable_memory: &ExecutableMemory,
    registers: Registers,
) -> FramePointer {
    let pc = registers.instruction_pointer;
    if executable_memory.is_valid_executable_memory(pc) {
        if vm.is_executing_in_regexp_jit() {
            vm.top_call_frame()
        } else {
            registers.frame_pointer
        }
    } else if is_interpreter_pc(pc) {
        registers.frame_pointer
    } else {
        vm.top_call_frame()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Capture {
    Walked(WalkOutcome),
    SuspendFailed,
    NoRegisters,
}

/// Suspends `thread`, walks its stack into `frames`, and resumes it before
/// returning. `locks` must be held for the whole call.
pub(crate) fn capture_and_walk(
    vm: &Vm,
    locks: &RegistryLocks<'_>,
    thread: &dyn SuspendableThread,
    frames: &mut [StackFrame],
) -> Capture {
    let Some(suspended) = SuspendedThread::suspend(thread) else {
        return Capture::SuspendFailed;
    };
    let Some(registers) = suspended.registers() else {
        return Capture::NoRegisters;
    };
    let start = choose_start_frame(vm, &locks.executable_memory, registers);
    let outcome = FrameWalker::new(&locks.threads, &locks.code, start).walk(frames);
    drop(suspended);
    Capture::Walked(outcome)
}


#[cfg(test)]
mod tests {
    use super::testing::FrozenThread;
    use super::*;
    use std::sync::atomic::Ordering;
    use strobe_types::{ExecutableKind, InstructionPointer};
    use strobe_vm::{FrameSpec, INTERPRETER_CODE, JitTier, NATIVE_CODE, VmOptions};

    const BOGUS_FP: FramePointer = FramePointer::new(0x3);

    #[test]
    fn instruction_pointer_triage() {
        let vm = Vm::new(VmOptions::default());
        let f = vm
            .define_function(ExecutableKind::function("f"), JitTier::Baseline)
            .expect("compile");
        let cx = vm.attach_current_thread("main").expect("attach");
        let top = cx.call(FrameSpec::function(&f)).expect("push");
        let memory = vm.executable_memory().lock();

        let at = |pc: u64| Registers {
            frame_pointer: BOGUS_FP,
            instruction_pointer: InstructionPointer::new(pc),
        };

        assert_eq!(
            choose_start_frame(&vm, &memory, at(f.code.entry_pc.get())),
            BOGUS_FP,
            "jit code trusts the register"
        );
        assert_eq!(
            choose_start_frame(&vm, &memory, at(INTERPRETER_CODE.start + 8)),
            BOGUS_FP,
            "interpreter trusts the register"
        );
        assert_eq!(
            choose_start_frame(&vm, &memory, at(NATIVE_CODE.start)),
            top,
            "native code falls back to the top call frame"
        );
        drop(memory);

        let _regexp = cx.enter_regexp_jit(f.code.entry_pc);
        let memory = vm.executable_memory().lock();
        assert_eq!(
            choose_start_frame(&vm, &memory, at(f.code.entry_pc.get())),
            top,
            "regexp jit clobbers the frame pointer"
        );
    }

    #[test]
    fn thread_is_resumed_even_without_registers() {
        let vm = Vm::new(VmOptions::default());
        let thread = FrozenThread::default();
        let mut frames = vec![StackFrame::EMPTY; 4];
        let locks = RegistryLocks::acquire(&vm);
        assert_eq!(
            capture_and_walk(&vm, &locks, &thread, &mut frames),
            Capture::NoRegisters
        );
        assert_eq!(thread.suspends.load(Ordering::Acquire), 1);
        assert!(thread.balanced());
    }

    #[test]
    fn refused_suspension_is_never_resumed() {
        let vm = Vm::new(VmOptions::default());
        let thread = FrozenThread::default();
        thread.refuse.store(true, Ordering::Release);
        let mut frames = vec![StackFrame::EMPTY; 4];
        let locks = RegistryLocks::acquire(&vm);
        assert_eq!(
            capture_and_walk(&vm, &locks, &thread, &mut frames),
            Capture::SuspendFailed
        );
        assert_eq!(thread.resumes.load(Ordering::Acquire), 0);
    }

    #[test]
    fn walk_runs_between_suspend_and_resume() {
        let vm = Vm::new(VmOptions::default());
        let f = vm
            .define_function(ExecutableKind::function("f"), JitTier::Interpreter)
            .expect("compile");
        let cx = vm.attach_current_thread("main").expect("attach");
        let fp = cx.call(FrameSpec::function(&f)).expect("push");

        let thread = FrozenThread::with_registers(Registers {
            frame_pointer: fp,
            instruction_pointer: f.code.entry_pc,
        });
        let mut frames = vec![StackFrame::EMPTY; 4];
        let locks = RegistryLocks::acquire(&vm);
        let Capture::Walked(outcome) = capture_and_walk(&vm, &locks, &thread, &mut frames) else {
            panic!("suspension should succeed");
        };
        assert_eq!(outcome.depth, 1);
        assert_eq!(frames[0], StackFrame::VerifiedExecutable(f.executable));
        assert!(thread.balanced());
    }
}

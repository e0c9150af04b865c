use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use strobe_types::{
    CallSiteIndex, CellAddress, CodeBlockId, EncodedValue, ExecutableId, ExecutableKind,
    FramePointer, InstructionPointer, MachineThreadId, Registers,
};
use tracing::debug;

use crate::code::{CodeBlock, CodeRegistry, JitTier};
use crate::heap::{CellKind, Heap, Marks};
use crate::locks::{LockRank, RankedMutex, RankedMutexGuard};
use crate::memory::{ExecutableMemory, INTERPRETER_CODE, NATIVE_CODE};
use crate::stack::{CallFrame, MachineStack};
use crate::suspend::{SafepointThread, SuspendableThread, ThreadState};
use crate::threads::{MachineThread, ThreadRegistry};
use crate::{DEFAULT_SAFEPOINT_TIMEOUT, DEFAULT_STACK_CAPACITY};

const JIT_CODE_SIZE: u64 = 256;
// What the regexp JIT leaves in the frame-pointer register.
const REGEXP_SCRATCH_FP: FramePointer = FramePointer::new(0x5);

/// Collector's view of a root: an executable id or a candidate cell.
pub trait RootVisitor {
    fn visit_executable(&mut self, id: ExecutableId);
    fn visit_value(&mut self, value: EncodedValue);
}

/// Roots contributed by the profiler, held for the duration of a collection.
pub trait HeldRoots {
    /// Runs with every engine registry locked, including the heap.
    fn visit_roots(&mut self, heap: &Heap, visitor: &mut dyn RootVisitor);
}

/// Callbacks from the engine into its sampling profiler.
pub trait ProfilerHooks: Send + Sync + 'static {
    /// The API lock was just taken by the calling thread.
    fn did_acquire_api_lock(&self);

    /// The calling thread entered managed code from the outside.
    fn did_enter_vm(&self);

    /// Locks the profiler and returns its roots. Called before any registry lock.
    fn hold_roots(&self) -> Box<dyn HeldRoots + '_>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[derive(Debug)]
pub enum VmError {
    StackOverflow { capacity: usize },
    ThreadAlreadyAttached,
    UnknownExecutable(ExecutableId),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow { capacity } => {
                write!(f, "machine stack overflow ({capacity} frames)")
            }
            Self::ThreadAlreadyAttached => write!(f, "thread is already attached to this vm"),
            Self::UnknownExecutable(id) => write!(f, "{id} is not a live executable"),
        }
    }
}

impl Error for VmError {}

/// How the sampler stops an attached thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadControl {
    /// Cooperative parking at engine safepoints; registers come from the engine.
    #[default]
    Safepoint,
    /// `SIGPROF` interruption with real machine registers.
    #[cfg(all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    Signal,
}

#[derive(Clone, Debug)]
pub struct VmOptions {
    /// Frames per attached thread.
    pub stack_capacity: usize,
    pub thread_control: ThreadControl,
    /// Upper bound on how long a suspension request waits.
    pub suspend_timeout: Duration,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            thread_control: ThreadControl::default(),
            suspend_timeout: DEFAULT_SAFEPOINT_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CompiledCode {
    pub code_block: CodeBlockId,
    pub entry_pc: InstructionPointer,
}

/// An executable with one compiled body and a pinned function object.
#[derive(Clone, Copy, Debug)]
pub struct CompiledFunction {
    pub executable: ExecutableId,
    pub code: CompiledCode,
    pub cell: CellAddress,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub freed_cells: usize,
    pub freed_executables: usize,
    pub unregistered_code_blocks: usize,
}

pub struct Vm {
    options: VmOptions,
    api_lock: RankedMutex<()>,
    threads: RankedMutex<ThreadRegistry>,
    code: RankedMutex<CodeRegistry>,
    executable_memory: RankedMutex<ExecutableMemory>,
    heap: RankedMutex<Heap>,
    next_thread: AtomicU64,
    next_code_block: AtomicU64,
    entry_depth: AtomicUsize,
    top_call_frame: AtomicU64,
    executing_regexp_jit: AtomicBool,
    profiler: OnceLock<Arc<dyn ProfilerHooks>>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("options", &self.options)
            .field("entry_depth", &self.entry_depth.load(Ordering::Relaxed))
            .field("top_call_frame", &self.top_call_frame())
            .finish_non_exhaustive()
    }
}

impl Vm {
    pub fn new(options: VmOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            api_lock: RankedMutex::new(LockRank::ApiLock, ()),
            threads: RankedMutex::new(LockRank::ThreadRegistry, ThreadRegistry::default()),
            code: RankedMutex::new(LockRank::CodeRegistry, CodeRegistry::default()),
            executable_memory: RankedMutex::new(
                LockRank::ExecutableMemory,
                ExecutableMemory::default(),
            ),
            heap: RankedMutex::new(LockRank::Heap, Heap::default()),
            next_thread: AtomicU64::new(1),
            next_code_block: AtomicU64::new(1),
            entry_depth: AtomicUsize::new(0),
            top_call_frame: AtomicU64::new(0),
            executing_regexp_jit: AtomicBool::new(false),
            profiler: OnceLock::new(),
        })
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn threads(&self) -> &RankedMutex<ThreadRegistry> {
        &self.threads
    }

    pub fn code_blocks(&self) -> &RankedMutex<CodeRegistry> {
        &self.code
    }

    pub fn executable_memory(&self) -> &RankedMutex<ExecutableMemory> {
        &self.executable_memory
    }

    pub fn heap(&self) -> &RankedMutex<Heap> {
        &self.heap
    }

    /// Innermost managed frame of the executing thread, as last published.
    pub fn top_call_frame(&self) -> FramePointer {
        FramePointer::new(self.top_call_frame.load(Ordering::Acquire))
    }

    pub fn has_entry_scope(&self) -> bool {
        self.entry_depth.load(Ordering::Acquire) > 0
    }

    pub fn is_executing_in_regexp_jit(&self) -> bool {
        self.executing_regexp_jit.load(Ordering::Acquire)
    }

    pub fn machine_thread_for_current_thread(&self) -> Option<MachineThread> {
        self.threads.lock().for_current_thread().cloned()
    }

    /// Returns the installed profiler, creating it on first use. `None` if a
    /// profiler of a different type is already installed.
    pub fn ensure_profiler<P: ProfilerHooks>(&self, make: impl FnOnce() -> Arc<P>) -> Option<Arc<P>> {
        let hooks = self
            .profiler
            .get_or_init(|| make() as Arc<dyn ProfilerHooks>);
        Arc::clone(hooks).into_any().downcast::<P>().ok()
    }

    pub fn profiler_hooks(&self) -> Option<&Arc<dyn ProfilerHooks>> {
        self.profiler.get()
    }

    /// Creates a pinned executable.
    pub fn create_executable(&self, kind: ExecutableKind) -> ExecutableId {
        let mut heap = self.heap.lock();
        let id = heap.create_executable(kind);
        heap.pin_executable(id);
        id
    }

    pub fn release_executable(&self, id: ExecutableId) {
        self.heap.lock().unpin_executable(id);
    }

    /// Registers a new code block for `owner`. `inline_origins` maps call sites
    /// to the executables inlined there, innermost first.
    pub fn compile(
        &self,
        owner: ExecutableId,
        tier: JitTier,
        inline_origins: impl IntoIterator<Item = (CallSiteIndex, Vec<ExecutableId>)>,
    ) -> Result<CompiledCode, VmError> {
        let inline_origins: BTreeMap<_, _> = inline_origins.into_iter().collect();
        let id = CodeBlockId::new(self.next_code_block.fetch_add(1, Ordering::Relaxed))
            .expect("invariant violated: code block ids start at 1");

        let mut code = self.code.lock();
        let mut memory = self.executable_memory.lock();
        let heap = self.heap.lock();
        for exec in std::iter::once(owner).chain(inline_origins.values().flatten().copied()) {
            if !heap.contains_executable(exec) {
                return Err(VmError::UnknownExecutable(exec));
            }
        }

        let (region, entry_pc) = match tier {
            JitTier::Interpreter => {
                let span = INTERPRETER_CODE.end - INTERPRETER_CODE.start;
                let offset = (id.get() * 16) % span;
                (None, INTERPRETER_CODE.start + offset)
            }
            JitTier::Baseline | JitTier::Optimizing => {
                let region = memory.allocate(JIT_CODE_SIZE);
                let entry = region.start;
                (Some(region), entry)
            }
        };
        code.register(CodeBlock::new(id, owner, tier, inline_origins, region));
        debug!(code_block = %id, executable = %owner, ?tier, "compiled");
        Ok(CompiledCode {
            code_block: id,
            entry_pc: InstructionPointer::new(entry_pc),
        })
    }

    /// Drops a code block while frames may still reference it.
    pub fn jettison(&self, code_block: CodeBlockId) -> bool {
        let mut code = self.code.lock();
        let mut memory = self.executable_memory.lock();
        let Some(block) = code.unregister(code_block) else {
            return false;
        };
        if let Some(region) = block.region() {
            memory.release(region);
        }
        debug!(code_block = %code_block, "jettisoned");
        true
    }

    /// Allocates a pinned function object.
    pub fn create_function(&self, executable: Option<ExecutableId>) -> CellAddress {
        self.allocate_pinned(CellKind::Function { executable })
    }

    pub fn create_host_function(&self) -> CellAddress {
        self.allocate_pinned(CellKind::HostFunction)
    }

    pub fn create_object(&self, host_callable: bool) -> CellAddress {
        self.allocate_pinned(CellKind::Object { host_callable })
    }

    fn allocate_pinned(&self, kind: CellKind) -> CellAddress {
        let mut heap = self.heap.lock();
        let address = heap.allocate_cell(kind);
        heap.pin(address);
        address
    }

    /// Unpins a cell; it survives the next collection only if still reachable.
    pub fn release(&self, cell: CellAddress) {
        self.heap.lock().unpin(cell);
    }

    /// Executable, compiled body and function object in one step.
    pub fn define_function(&self, kind: ExecutableKind, tier: JitTier) -> Result<CompiledFunction, VmError> {
        self.define_function_with_inlining(kind, tier, [])
    }

    pub fn define_function_with_inlining(
        &self,
        kind: ExecutableKind,
        tier: JitTier,
        inline_origins: impl IntoIterator<Item = (CallSiteIndex, Vec<ExecutableId>)>,
    ) -> Result<CompiledFunction, VmError> {
        let executable = self.create_executable(kind);
        let code = self.compile(executable, tier, inline_origins)?;
        let cell = self.create_function(Some(executable));
        self.release_executable(executable);
        Ok(CompiledFunction {
            executable,
            code,
            cell,
        })
    }

    /// Stop-the-world mark and sweep.
    ///
    /// Roots: pinned cells and executables, every live stack frame, and the
    /// profiler's held roots. Code blocks that reference a swept executable
    /// are unregistered and their machine code released.
    pub fn collect_garbage(&self) -> CollectionStats {
        let hooks = self.profiler.get().cloned();
        let mut held = hooks.as_deref().map(|hooks| hooks.hold_roots());

        let threads = self.threads.lock();
        let mut code = self.code.lock();
        let mut memory = self.executable_memory.lock();
        let mut heap = self.heap.lock();

        let mut marks = Marks::default();
        heap.visit_pinned(&mut marks);
        threads.visit_stack_roots(&code, &mut marks);
        if let Some(held) = held.as_mut() {
            held.visit_roots(&heap, &mut marks);
        }
        heap.trace(&mut marks);
        let outcome = heap.sweep(&marks);

        let dropped = code.unregister_referencing(&outcome.freed_executables);
        for block in &dropped {
            if let Some(region) = block.region() {
                memory.release(region);
            }
        }

        let stats = CollectionStats {
            freed_cells: outcome.freed_cells,
            freed_executables: outcome.freed_executables.len(),
            unregistered_code_blocks: dropped.len(),
        };
        debug!(
            freed_cells = stats.freed_cells,
            freed_executables = stats.freed_executables,
            unregistered_code_blocks = stats.unregistered_code_blocks,
            "collected garbage"
        );
        stats
    }

    /// Registers the calling thread with its own call stack.
    pub fn attach_current_thread(
        self: &Arc<Self>,
        name: impl Into<String>,
    ) -> Result<ExecutionContext, VmError> {
        let name = name.into();
        let mut threads = self.threads.lock();
        if threads.for_current_thread().is_some() {
            return Err(VmError::ThreadAlreadyAttached);
        }

        let id = MachineThreadId::new(self.next_thread.fetch_add(1, Ordering::Relaxed))
            .expect("invariant violated: thread ids start at 1");
        let stack = Arc::new(MachineStack::new(self.options.stack_capacity));
        let state = Arc::new(ThreadState::default());
        state.safepoint.enter_idle();
        state.registers.set(Registers {
            frame_pointer: FramePointer::NULL,
            instruction_pointer: InstructionPointer::new(NATIVE_CODE.start),
        });

        let control: Arc<dyn SuspendableThread> = match self.options.thread_control {
            ThreadControl::Safepoint => Arc::new(SafepointThread::new(
                Arc::clone(&state),
                self.options.suspend_timeout,
            )),
            #[cfg(all(
                target_os = "linux",
                any(target_arch = "x86_64", target_arch = "aarch64")
            ))]
            ThreadControl::Signal => Arc::new(crate::platform::SignalThread::current(
                self.options.suspend_timeout,
            )),
        };
        threads.add(MachineThread::new(
            id,
            name.clone(),
            Arc::clone(&stack),
            control,
        ));
        drop(threads);
        debug!(thread = %id, name = %name, "attached thread");

        Ok(ExecutionContext {
            vm: Arc::clone(self),
            id,
            stack,
            state,
            _not_send: PhantomData,
        })
    }
}

/// Description of an activation to push.
#[derive(Clone, Copy, Debug)]
pub struct FrameSpec {
    pub callee: EncodedValue,
    pub code_block: Option<CodeBlockId>,
    pub call_site: Option<CallSiteIndex>,
    pub pc: InstructionPointer,
}

impl FrameSpec {
    pub fn function(function: &CompiledFunction) -> Self {
        Self {
            callee: EncodedValue::from_cell(function.cell),
            code_block: Some(function.code.code_block),
            call_site: None,
            pc: function.code.entry_pc,
        }
    }

    /// A frame the engine has no code block for, such as a host call.
    pub fn unregistered(callee: EncodedValue, pc: InstructionPointer) -> Self {
        Self {
            callee,
            code_block: None,
            call_site: None,
            pc,
        }
    }

    pub fn host(callee: CellAddress) -> Self {
        Self::unregistered(
            EncodedValue::from_cell(callee),
            InstructionPointer::new(NATIVE_CODE.start + 0x40),
        )
    }

    pub fn at_call_site(mut self, site: CallSiteIndex) -> Self {
        self.call_site = Some(site);
        self
    }
}

/// A thread's attachment to a [`Vm`]. Detaches on drop.
pub struct ExecutionContext {
    vm: Arc<Vm>,
    id: MachineThreadId,
    stack: Arc<MachineStack>,
    state: Arc<ThreadState>,
    _not_send: PhantomData<*const ()>,
}

impl ExecutionContext {
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn thread_id(&self) -> MachineThreadId {
        self.id
    }

    pub fn stack(&self) -> &MachineStack {
        &self.stack
    }

    pub fn lock_api(&self) -> ApiLockGuard<'_> {
        let guard = self.vm.api_lock.lock();
        if let Some(hooks) = self.vm.profiler.get() {
            hooks.did_acquire_api_lock();
        }
        ApiLockGuard { _guard: guard }
    }

    /// Enters managed code. The outermost entry notifies the profiler.
    pub fn enter(&self) -> EntryScope<'_> {
        let previous = self.vm.entry_depth.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            self.publish_top();
            if let Some(hooks) = self.vm.profiler.get() {
                hooks.did_enter_vm();
            }
            self.state.safepoint.leave_idle();
        }
        EntryScope { context: self }
    }

    pub fn call(&self, spec: FrameSpec) -> Result<FramePointer, VmError> {
        let return_pc = self.state.registers.get().instruction_pointer;
        let fp = self
            .stack
            .push(CallFrame {
                caller: self.stack.top(),
                code_block: spec.code_block,
                call_site: spec.call_site,
                callee: spec.callee,
                return_pc,
            })
            .ok_or(VmError::StackOverflow {
                capacity: self.stack.capacity(),
            })?;
        self.state.registers.set(Registers {
            frame_pointer: fp,
            instruction_pointer: spec.pc,
        });
        self.vm.top_call_frame.store(fp.get(), Ordering::Release);
        self.state.safepoint.poll();
        Ok(fp)
    }

    pub fn ret(&self) -> Option<CallFrame> {
        let frame = self.stack.pop()?;
        let top = self.stack.top();
        self.state.registers.set(Registers {
            frame_pointer: top,
            instruction_pointer: frame.return_pc,
        });
        self.vm.top_call_frame.store(top.get(), Ordering::Release);
        self.state.safepoint.poll();
        Some(frame)
    }

    /// Runs outside managed frames, e.g. inside a runtime function.
    pub fn enter_native(&self, pc: InstructionPointer) -> RegisterScope<'_> {
        let saved = self.state.registers.get();
        self.state.registers.set(Registers {
            frame_pointer: FramePointer::new(0x1),
            instruction_pointer: pc,
        });
        RegisterScope {
            context: self,
            saved,
            regexp: false,
        }
    }

    /// Runs regexp JIT code at `pc`, which clobbers the frame-pointer register.
    pub fn enter_regexp_jit(&self, pc: InstructionPointer) -> RegisterScope<'_> {
        let saved = self.state.registers.get();
        self.vm.executing_regexp_jit.store(true, Ordering::Release);
        self.state.registers.set(Registers {
            frame_pointer: REGEXP_SCRATCH_FP,
            instruction_pointer: pc,
        });
        RegisterScope {
            context: self,
            saved,
            regexp: true,
        }
    }

    pub fn poll_safepoint(&self) {
        self.state.safepoint.poll();
    }

    /// Collects while letting the sampler treat this thread as stopped.
    pub fn collect_garbage(&self) -> CollectionStats {
        self.state.safepoint.enter_idle();
        let stats = self.vm.collect_garbage();
        if self.vm.has_entry_scope() {
            self.state.safepoint.leave_idle();
        }
        stats
    }

    fn publish_top(&self) {
        self.vm
            .top_call_frame
            .store(self.stack.top().get(), Ordering::Release);
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.state.safepoint.enter_idle();
        let removed = self.vm.threads.lock().remove(self.id);
        if let Some(thread) = removed {
            thread.control().detach();
        }
        debug!(thread = %self.id, "detached thread");
    }
}

pub struct ApiLockGuard<'a> {
    _guard: RankedMutexGuard<'a, ()>,
}

pub struct EntryScope<'a> {
    context: &'a ExecutionContext,
}

impl Drop for EntryScope<'_> {
    fn drop(&mut self) {
        let previous = self.context.vm.entry_depth.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.context.state.safepoint.enter_idle();
        }
    }
}

/// Restores the published registers when dropped.
pub struct RegisterScope<'a> {
    context: &'a ExecutionContext,
    saved: Registers,
    regexp: bool,
}

impl Drop for RegisterScope<'_> {
    fn drop(&mut self) {
        if self.regexp {
            self.context
                .vm
                .executing_regexp_jit
                .store(false, Ordering::Release);
        }
        self.context.state.registers.set(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn vm() -> Arc<Vm> {
        Vm::new(VmOptions {
            stack_capacity: 32,
            ..VmOptions::default()
        })
    }

    #[test]
    fn calls_publish_registers_and_top_call_frame() {
        let vm = vm();
        let f = vm
            .define_function(ExecutableKind::function("f"), JitTier::Baseline)
            .expect("compile f");
        let cx = vm.attach_current_thread("main").expect("attach");
        let _entry = cx.enter();
        assert!(vm.has_entry_scope());

        let fp = cx.call(FrameSpec::function(&f)).expect("push");
        assert_eq!(vm.top_call_frame(), fp);
        let registers = cx.state.registers.get();
        assert_eq!(registers.frame_pointer, fp);
        assert_eq!(registers.instruction_pointer, f.code.entry_pc);

        let popped = cx.ret().expect("pop");
        assert_eq!(popped.code_block, Some(f.code.code_block));
        assert_eq!(vm.top_call_frame(), FramePointer::NULL);
    }

    #[test]
    fn second_attach_on_same_thread_fails() {
        let vm = vm();
        let _cx = vm.attach_current_thread("main").expect("attach");
        assert!(matches!(
            vm.attach_current_thread("again"),
            Err(VmError::ThreadAlreadyAttached)
        ));
    }

    #[test]
    fn dropping_the_context_detaches() {
        let vm = vm();
        let cx = vm.attach_current_thread("main").expect("attach");
        assert!(vm.machine_thread_for_current_thread().is_some());
        drop(cx);
        assert!(vm.machine_thread_for_current_thread().is_none());
        assert!(vm.threads().lock().is_empty());
    }

    #[test]
    fn stack_overflow_is_an_error() {
        let vm = Vm::new(VmOptions {
            stack_capacity: 1,
            ..VmOptions::default()
        });
        let host = vm.create_host_function();
        let cx = vm.attach_current_thread("main").expect("attach");
        cx.call(FrameSpec::host(host)).expect("first frame fits");
        assert!(matches!(
            cx.call(FrameSpec::host(host)),
            Err(VmError::StackOverflow { capacity: 1 })
        ));
    }

    #[test]
    fn compile_rejects_dead_executables() {
        let vm = vm();
        let exec = vm.create_executable(ExecutableKind::Program);
        vm.release_executable(exec);
        vm.collect_garbage();
        assert!(matches!(
            vm.compile(exec, JitTier::Baseline, []),
            Err(VmError::UnknownExecutable(id)) if id == exec
        ));
    }

    #[test]
    fn collection_sweeps_unreachable_functions_and_their_code() {
        let vm = vm();
        let kept = vm
            .define_function(ExecutableKind::function("kept"), JitTier::Optimizing)
            .expect("compile kept");
        let lost = vm
            .define_function(ExecutableKind::function("lost"), JitTier::Optimizing)
            .expect("compile lost");
        vm.release(lost.cell);

        let stats = vm.collect_garbage();
        assert_eq!(stats.freed_cells, 1);
        assert_eq!(stats.freed_executables, 1);
        assert_eq!(stats.unregistered_code_blocks, 1);

        assert!(vm.code_blocks().lock().contains(kept.code.code_block));
        assert!(!vm.code_blocks().lock().contains(lost.code.code_block));
        assert!(
            !vm.executable_memory()
                .lock()
                .is_valid_executable_memory(lost.code.entry_pc)
        );
    }

    #[test]
    fn frames_on_the_stack_are_roots() {
        let vm = vm();
        let f = vm
            .define_function(ExecutableKind::function("f"), JitTier::Baseline)
            .expect("compile f");
        vm.release(f.cell);
        let cx = vm.attach_current_thread("main").expect("attach");
        let _entry = cx.enter();
        cx.call(FrameSpec::function(&f)).expect("push");

        let stats = cx.collect_garbage();
        assert_eq!(stats, CollectionStats::default());
        assert!(vm.heap().lock().contains_executable(f.executable));
    }

    #[test]
    fn jettisoned_code_leaves_the_registry() {
        let vm = vm();
        let f = vm
            .define_function(ExecutableKind::function("f"), JitTier::Optimizing)
            .expect("compile f");
        assert!(vm.jettison(f.code.code_block));
        assert!(!vm.jettison(f.code.code_block));
        assert!(!vm.code_blocks().lock().contains(f.code.code_block));
    }

    #[test]
    fn regexp_scope_sets_and_clears_the_flag() {
        let vm = vm();
        let cx = vm.attach_current_thread("main").expect("attach");
        {
            let _regexp = cx.enter_regexp_jit(InstructionPointer::new(0x2000_0000_0000));
            assert!(vm.is_executing_in_regexp_jit());
            assert_eq!(cx.state.registers.get().frame_pointer, REGEXP_SCRATCH_FP);
        }
        assert!(!vm.is_executing_in_regexp_jit());
    }

    #[derive(Default)]
    struct CountingHooks {
        api_locks: AtomicUsize,
        entries: AtomicUsize,
    }

    struct NoRoots;

    impl HeldRoots for NoRoots {
        fn visit_roots(&mut self, _heap: &Heap, _visitor: &mut dyn RootVisitor) {}
    }

    impl ProfilerHooks for CountingHooks {
        fn did_acquire_api_lock(&self) {
            self.api_locks.fetch_add(1, Ordering::AcqRel);
        }

        fn did_enter_vm(&self) {
            self.entries.fetch_add(1, Ordering::AcqRel);
        }

        fn hold_roots(&self) -> Box<dyn HeldRoots + '_> {
            Box::new(NoRoots)
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn only_the_outermost_entry_notifies_the_profiler() {
        let vm = vm();
        let hooks = vm
            .ensure_profiler(|| Arc::new(CountingHooks::default()))
            .expect("first install");
        let again = vm
            .ensure_profiler(|| Arc::new(CountingHooks::default()))
            .expect("same type");
        assert!(Arc::ptr_eq(&hooks, &again), "one profiler per vm");

        let cx = vm.attach_current_thread("main").expect("attach");
        drop(cx.lock_api());
        {
            let _outer = cx.enter();
            let _inner = cx.enter();
        }
        let _again = cx.enter();
        assert_eq!(hooks.api_locks.load(Ordering::Acquire), 1);
        assert_eq!(hooks.entries.load(Ordering::Acquire), 2);
    }

    #[cfg(all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn dropped_context_detaches_its_signal_handle() {
        let vm = Vm::new(VmOptions {
            thread_control: ThreadControl::Signal,
            ..VmOptions::default()
        });
        let worker = {
            let vm = Arc::clone(&vm);
            std::thread::spawn(move || {
                let cx = vm.attach_current_thread("worker").expect("attach");
                let control = vm
                    .threads()
                    .lock()
                    .get(cx.thread_id())
                    .map(|thread| Arc::clone(thread.control()))
                    .expect("attached thread is registered");
                drop(cx);
                control
            })
        };
        let control = worker.join().expect("worker should exit");
        assert!(!control.suspend(), "handle of an exited thread must not signal it");
        assert!(vm.threads().lock().is_empty());
    }
}

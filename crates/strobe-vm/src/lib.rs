//! A small model of a managed, garbage-collected execution engine.
//!
//! It owns the registries a sampling profiler has to consult while another
//! thread is suspended: the machine-thread registry (stack bounds), the
//! compiled-code registry, the executable-memory registry, and the heap's
//! object registry. Each registry sits behind a [`RankedMutex`] so the global
//! acquisition order is checked rather than assumed.

use std::time::Duration;

pub(crate) mod code;
pub(crate) mod heap;
pub(crate) mod locks;
pub(crate) mod memory;
#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub(crate) mod platform;
pub(crate) mod stack;
pub(crate) mod stopwatch;
pub(crate) mod suspend;
pub(crate) mod threads;
pub(crate) mod vm;

pub use self::code::{CodeBlock, CodeRegistry, JitTier};
pub use self::heap::{
    BLOCK_SIZE, CELL_SIZE, Cell, CellKind, Executable, Heap, Marks, TinyBloomFilter,
};
pub use self::locks::{LockRank, RankedMutex, RankedMutexGuard, RegistryLocks, holds_lock_rank};
pub use self::memory::{
    ExecutableMemory, INTERPRETER_CODE, NATIVE_CODE, is_interpreter_pc, is_native_pc,
};
#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub use self::platform::SignalThread;
pub use self::stack::{CallFrame, FRAME_SIZE, MachineStack};
pub use self::stopwatch::Stopwatch;
pub use self::suspend::{RegisterFile, Safepoint, SafepointThread, SuspendableThread};
pub use self::threads::{MachineThread, ThreadRegistry};
pub use self::vm::{
    ApiLockGuard, CollectionStats, CompiledCode, CompiledFunction, EntryScope, ExecutionContext,
    FrameSpec, HeldRoots, ProfilerHooks, RegisterScope, RootVisitor, ThreadControl, Vm, VmError,
    VmOptions,
};

pub(crate) const DEFAULT_STACK_CAPACITY: usize = 4096;
pub(crate) const DEFAULT_SAFEPOINT_TIMEOUT: Duration = Duration::from_millis(10);

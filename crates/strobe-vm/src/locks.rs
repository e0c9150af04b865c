use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::code::CodeRegistry;
use crate::memory::ExecutableMemory;
use crate::threads::ThreadRegistry;
use crate::vm::Vm;

/// Global acquisition order. A thread may only take a lock whose rank is
/// strictly greater than every rank it already holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LockRank {
    ApiLock = 0,
    Profiler = 1,
    ThreadRegistry = 2,
    CodeRegistry = 3,
    ExecutableMemory = 4,
    Heap = 5,
}

impl LockRank {
    const ALL: [LockRank; 6] = [
        LockRank::ApiLock,
        LockRank::Profiler,
        LockRank::ThreadRegistry,
        LockRank::CodeRegistry,
        LockRank::ExecutableMemory,
        LockRank::Heap,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

thread_local! {
    // One bit per held rank; kept allocation-free so it is safe to consult
    // while another thread is suspended.
    static HELD_RANKS: Cell<u16> = const { Cell::new(0) };
}

fn held_ranks(bits: u16) -> Vec<LockRank> {
    LockRank::ALL
        .into_iter()
        .filter(|rank| bits & rank.bit() != 0)
        .collect()
}

fn note_acquire(rank: LockRank) {
    HELD_RANKS.with(|held| {
        let bits = held.get();
        let at_or_above = !(rank.bit() - 1);
        debug_assert!(
            bits & at_or_above == 0,
            "lock order violated: acquiring {rank:?} while holding {:?}",
            held_ranks(bits)
        );
        held.set(bits | rank.bit());
    });
}

fn note_release(rank: LockRank) {
    HELD_RANKS.with(|held| held.set(held.get() & !rank.bit()));
}

/// Whether the calling thread currently holds a lock of `rank`.
pub fn holds_lock_rank(rank: LockRank) -> bool {
    HELD_RANKS.with(|held| held.get() & rank.bit() != 0)
}

/// [`parking_lot::Mutex`] tagged with its place in the global lock order.
pub struct RankedMutex<T> {
    rank: LockRank,
    inner: parking_lot::Mutex<T>,
}

/// Guard returned by [`RankedMutex`], equivalent to [`parking_lot::MutexGuard`].
pub struct RankedMutexGuard<'a, T> {
    rank: LockRank,
    inner: parking_lot::MutexGuard<'a, T>,
}

impl<T> RankedMutex<T> {
    pub const fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: parking_lot::Mutex::new(value),
        }
    }

    pub fn rank(&self) -> LockRank {
        self.rank
    }

    pub fn lock(&self) -> RankedMutexGuard<'_, T> {
        note_acquire(self.rank);
        RankedMutexGuard {
            rank: self.rank,
            inner: self.inner.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<RankedMutexGuard<'_, T>> {
        let inner = self.inner.try_lock()?;
        note_acquire(self.rank);
        Some(RankedMutexGuard {
            rank: self.rank,
            inner,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: fmt::Debug> fmt::Debug for RankedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedMutex")
            .field("rank", &self.rank)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T> Drop for RankedMutexGuard<'_, T> {
    fn drop(&mut self) {
        note_release(self.rank);
    }
}

impl<T> Deref for RankedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for RankedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// The three registries a stack walk reads, locked in their fixed order:
/// thread registry, then compiled-code registry, then executable memory.
pub struct RegistryLocks<'a> {
    pub threads: RankedMutexGuard<'a, ThreadRegistry>,
    pub code: RankedMutexGuard<'a, CodeRegistry>,
    pub executable_memory: RankedMutexGuard<'a, ExecutableMemory>,
}

impl<'a> RegistryLocks<'a> {
    pub fn acquire(vm: &'a Vm) -> Self {
        let threads = vm.threads().lock();
        let code = vm.code_blocks().lock();
        let executable_memory = vm.executable_memory().lock();
        Self {
            threads,
            code,
            executable_memory,
        }
    }
}

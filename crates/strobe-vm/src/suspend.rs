use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use strobe_types::{FramePointer, InstructionPointer, Registers};

/// Platform-specific way to stop another thread and read its registers.
///
/// Between a successful [`suspend`](Self::suspend) and the matching
/// [`resume`](Self::resume) the target must not run managed code, and the
/// caller must not allocate or block on anything the target may hold.
pub trait SuspendableThread: Send + Sync {
    /// Stops the target. `false` means it could not be stopped this time.
    fn suspend(&self) -> bool;

    /// Register snapshot of a suspended target.
    fn registers(&self) -> Option<Registers>;

    fn resume(&self);

    /// The target is leaving the engine. Later suspensions must fail.
    fn detach(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SafepointState {
    Running,
    Requested,
    Parked,
    /// Outside managed code; the stack is not changing.
    Idle,
    /// Idle, and a suspender currently holds it there.
    Borrowed,
}

/// Cooperative stop point polled by an execution thread.
///
/// A suspender raises a request and waits until the target either parks at
/// its next poll or is found idle outside managed code.
#[derive(Debug)]
pub struct Safepoint {
    requested: AtomicBool,
    state: Mutex<SafepointState>,
    changed: Condvar,
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            state: Mutex::new(SafepointState::Running),
            changed: Condvar::new(),
        }
    }

    /// Called by the owning thread at instruction boundaries.
    pub fn poll(&self) {
        if !self.requested.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        if *state != SafepointState::Requested {
            return;
        }
        *state = SafepointState::Parked;
        self.changed.notify_all();
        while *state == SafepointState::Parked {
            self.changed.wait(&mut state);
        }
    }

    /// Called by the owning thread when it stops running managed code.
    pub fn enter_idle(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            SafepointState::Requested => {
                self.changed.notify_all();
                SafepointState::Borrowed
            }
            SafepointState::Running => SafepointState::Idle,
            other => other,
        };
    }

    /// Called by the owning thread before touching its stack again.
    pub fn leave_idle(&self) {
        let mut state = self.state.lock();
        while *state == SafepointState::Borrowed {
            self.changed.wait(&mut state);
        }
        if *state == SafepointState::Idle {
            *state = SafepointState::Running;
        }
    }

    /// Returns `true` once the owner is parked or idle, `false` on timeout.
    pub fn request_and_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        match *state {
            SafepointState::Idle => {
                *state = SafepointState::Borrowed;
                return true;
            }
            SafepointState::Running => {
                *state = SafepointState::Requested;
                self.requested.store(true, Ordering::Release);
            }
            _ => return false,
        }

        loop {
            match *state {
                SafepointState::Parked | SafepointState::Borrowed => {
                    self.requested.store(false, Ordering::Release);
                    return true;
                }
                _ => {}
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        match *state {
            SafepointState::Parked | SafepointState::Borrowed => {
                self.requested.store(false, Ordering::Release);
                true
            }
            _ => {
                *state = SafepointState::Running;
                self.requested.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Lets a parked or borrowed owner continue.
    pub fn release(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            SafepointState::Parked => SafepointState::Running,
            SafepointState::Borrowed => SafepointState::Idle,
            other => other,
        };
        self.changed.notify_all();
    }

    pub fn is_held(&self) -> bool {
        matches!(
            *self.state.lock(),
            SafepointState::Parked | SafepointState::Borrowed
        )
    }
}

/// Engine-level register state, published by the execution thread as it
/// pushes and pops frames.
#[derive(Debug, Default)]
pub struct RegisterFile {
    frame_pointer: AtomicU64,
    instruction_pointer: AtomicU64,
}

impl RegisterFile {
    pub fn set(&self, registers: Registers) {
        self.frame_pointer
            .store(registers.frame_pointer.get(), Ordering::Release);
        self.instruction_pointer
            .store(registers.instruction_pointer.get(), Ordering::Release);
    }

    pub fn get(&self) -> Registers {
        Registers {
            frame_pointer: FramePointer::new(self.frame_pointer.load(Ordering::Acquire)),
            instruction_pointer: InstructionPointer::new(
                self.instruction_pointer.load(Ordering::Acquire),
            ),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ThreadState {
    pub(crate) safepoint: Safepoint,
    pub(crate) registers: RegisterFile,
}

/// [`SuspendableThread`] backed by a [`Safepoint`] and the engine's
/// [`RegisterFile`].
#[derive(Clone, Debug)]
pub struct SafepointThread {
    state: Arc<ThreadState>,
    timeout: Duration,
}

impl SafepointThread {
    pub(crate) fn new(state: Arc<ThreadState>, timeout: Duration) -> Self {
        Self { state, timeout }
    }
}

impl SuspendableThread for SafepointThread {
    fn suspend(&self) -> bool {
        self.state.safepoint.request_and_wait(self.timeout)
    }

    fn registers(&self) -> Option<Registers> {
        self.state
            .safepoint
            .is_held()
            .then(|| self.state.registers.get())
    }

    fn resume(&self) {
        self.state.safepoint.release();
    }
}

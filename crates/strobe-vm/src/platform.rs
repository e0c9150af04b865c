//! Thread suspension via `pthread_kill(SIGPROF)`.
//!
//! The handler runs on the target thread, publishes the interrupted frame
//! pointer and program counter, then spins until the suspender releases it.
//! Only one thread in the process can be held this way at a time.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use strobe_types::{FramePointer, InstructionPointer, Registers};

use crate::suspend::SuspendableThread;

const IDLE: u8 = 0;
const CLAIMED: u8 = 1;
const REQUESTED: u8 = 2;
const PARKED: u8 = 3;
const RELEASED: u8 = 4;

static STATE: AtomicU8 = AtomicU8::new(IDLE);
static TARGET: AtomicU64 = AtomicU64::new(0);
static FP: AtomicU64 = AtomicU64::new(0);
static PC: AtomicU64 = AtomicU64::new(0);
static INSTALL: Once = Once::new();

fn install_sigprof_handler() {
    INSTALL.call_once(|| unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigprof_handler as *const () as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGPROF, &sa, std::ptr::null_mut());
    });
}

#[cfg(target_arch = "x86_64")]
unsafe fn interrupted_registers(ctx: *mut libc::c_void) -> (u64, u64) {
    let uc = ctx as *const libc::ucontext_t;
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    (
        gregs[libc::REG_RBP as usize] as u64,
        gregs[libc::REG_RIP as usize] as u64,
    )
}

#[cfg(target_arch = "aarch64")]
unsafe fn interrupted_registers(ctx: *mut libc::c_void) -> (u64, u64) {
    let uc = ctx as *const libc::ucontext_t;
    let mcontext = unsafe { &(*uc).uc_mcontext };
    (mcontext.regs[29], mcontext.pc)
}

extern "C" fn sigprof_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    let self_id = unsafe { libc::pthread_self() } as u64;
    if TARGET.load(Ordering::Acquire) != self_id
        || STATE.load(Ordering::Acquire) != REQUESTED
        || ctx.is_null()
    {
        return;
    }

    let (fp, pc) = unsafe { interrupted_registers(ctx) };
    FP.store(fp, Ordering::Release);
    PC.store(pc, Ordering::Release);

    if STATE
        .compare_exchange(REQUESTED, PARKED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // suspender gave up
        return;
    }

    while STATE.load(Ordering::Acquire) == PARKED {
        unsafe {
            libc::sched_yield();
        }
    }
    STATE.store(IDLE, Ordering::Release);
}

/// [`SuspendableThread`] that interrupts a real OS thread with `SIGPROF`.
///
/// Registers are the machine's own, so outside engine-managed code the
/// program counter lands in neither executable memory nor the interpreter.
///
/// A `pthread_t` must not be signalled once its thread has exited, so the
/// handle refuses to suspend after [`SuspendableThread::detach`]. The engine
/// detaches it when the owning execution context drops.
#[derive(Debug, Clone)]
pub struct SignalThread {
    pthread: libc::pthread_t,
    timeout: Duration,
    attached: Arc<AtomicBool>,
}

impl SignalThread {
    /// Handle for the calling thread.
    pub fn current(timeout: Duration) -> Self {
        install_sigprof_handler();
        Self {
            pthread: unsafe { libc::pthread_self() },
            timeout,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl SuspendableThread for SignalThread {
    fn suspend(&self) -> bool {
        if !self.attached.load(Ordering::Acquire) {
            return false;
        }
        if unsafe { libc::pthread_equal(self.pthread, libc::pthread_self()) } != 0 {
            return false;
        }
        if STATE
            .compare_exchange(IDLE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        TARGET.store(self.pthread as u64, Ordering::Release);
        FP.store(0, Ordering::Release);
        PC.store(0, Ordering::Release);
        STATE.store(REQUESTED, Ordering::Release);

        if unsafe { libc::pthread_kill(self.pthread, libc::SIGPROF) } != 0 {
            STATE.store(IDLE, Ordering::Release);
            return false;
        }

        let deadline = Instant::now() + self.timeout;
        while STATE.load(Ordering::Acquire) != PARKED {
            if Instant::now() >= deadline {
                return match STATE.compare_exchange(
                    REQUESTED,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => false,
                    Err(state) => state == PARKED,
                };
            }
            std::hint::spin_loop();
        }
        true
    }

    fn registers(&self) -> Option<Registers> {
        if STATE.load(Ordering::Acquire) != PARKED
            || TARGET.load(Ordering::Acquire) != self.pthread as u64
        {
            return None;
        }
        Some(Registers {
            frame_pointer: FramePointer::new(FP.load(Ordering::Acquire)),
            instruction_pointer: InstructionPointer::new(PC.load(Ordering::Acquire)),
        })
    }

    fn resume(&self) {
        if STATE
            .compare_exchange(PARKED, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        while STATE.load(Ordering::Acquire) != IDLE {
            std::hint::spin_loop();
        }
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

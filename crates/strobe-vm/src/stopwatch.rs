use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const NOT_RUNNING: u64 = u64::MAX;

fn stopwatch_anchor() -> &'static Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now)
}

fn anchor_nanos() -> u64 {
    stopwatch_anchor()
        .elapsed()
        .as_nanos()
        .min((NOT_RUNNING - 1) as u128) as u64
}

/// Shared clock for trace timestamps and evaluation events.
///
/// Readable from any thread without locking; time only advances while started.
#[derive(Debug)]
pub struct Stopwatch {
    started_at: AtomicU64,
    accumulated: AtomicU64,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            started_at: AtomicU64::new(NOT_RUNNING),
            accumulated: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        let _ = self.started_at.compare_exchange(
            NOT_RUNNING,
            anchor_nanos(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn stop(&self) {
        let started = self.started_at.swap(NOT_RUNNING, Ordering::AcqRel);
        if started != NOT_RUNNING {
            let ran = anchor_nanos().saturating_sub(started);
            self.accumulated.fetch_add(ran, Ordering::AcqRel);
        }
    }

    pub fn reset(&self) {
        self.started_at.store(NOT_RUNNING, Ordering::Release);
        self.accumulated.store(0, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.started_at.load(Ordering::Acquire) != NOT_RUNNING
    }

    /// Elapsed running time in seconds.
    pub fn elapsed_time(&self) -> f64 {
        let mut nanos = self.accumulated.load(Ordering::Acquire);
        let started = self.started_at.load(Ordering::Acquire);
        if started != NOT_RUNNING {
            nanos += anchor_nanos().saturating_sub(started);
        }
        nanos as f64 / 1e9
    }
}

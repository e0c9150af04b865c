use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use strobe_types::{Report, ReportError, StackFrame, StackTrace};
use strobe_vm::{
    Heap, HeldRoots, LockRank, ProfilerHooks, RankedMutex, RankedMutexGuard, RegistryLocks,
    RootVisitor, Stopwatch, SuspendableThread, Vm,
};
use tracing::debug;

use crate::config::SamplerConfig;
use crate::queue::TimerQueue;
use crate::report::build_report;
use crate::stats::{StatsReporting, WalkStats};
use crate::store::{SeenExecutables, TraceStore};
use crate::suspend::{Capture, capture_and_walk};
use crate::verify::verify_pending;

const FRAME_BUFFER_GROWTH: f64 = 1.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    Active,
    /// Active, but the next timer callback exits without sampling.
    ActivePaused,
}

impl SamplerState {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

#[derive(Debug)]
pub enum ProfilerError {
    Queue(io::Error),
    /// The vm already carries a profiler of another type.
    ForeignProfiler,
}

impl fmt::Display for ProfilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(err) => write!(f, "failed to start the sampling queue: {err}"),
            Self::ForeignProfiler => write!(f, "vm already has a different profiler installed"),
        }
    }
}

impl Error for ProfilerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Queue(err) => Some(err),
            Self::ForeignProfiler => None,
        }
    }
}

struct ProfilerState {
    mode: SamplerState,
    has_dispatched: bool,
    interval: Duration,
    thread: Option<Arc<dyn SuspendableThread>>,
    frames: Vec<StackFrame>,
    store: TraceStore,
    seen: SeenExecutables,
    last_time: f64,
    total_time: f64,
    stats: WalkStats,
    stats_reporting: StatsReporting,
}

impl ProfilerState {
    fn new(config: &SamplerConfig) -> Self {
        Self {
            mode: SamplerState::Stopped,
            has_dispatched: false,
            interval: config.interval,
            thread: None,
            frames: vec![StackFrame::EMPTY; config.initial_frame_capacity.get()],
            store: TraceStore::default(),
            seen: SeenExecutables::default(),
            last_time: 0.0,
            total_time: 0.0,
            stats: WalkStats::default(),
            stats_reporting: config.report_stats,
        }
    }

    /// Runs after the target thread resumed; free to allocate.
    ///
    /// The elapsed window counts whether or not the cycle kept a trace.
    fn record(&mut self, capture: Capture, now: f64) {
        self.total_time += now - self.last_time;
        match capture {
            Capture::SuspendFailed | Capture::NoRegisters => self.stats.record_suspend_failure(),
            Capture::Walked(outcome) => {
                self.stats.record_walk(outcome.was_valid);
                if outcome.was_valid && outcome.depth > 0 {
                    let frames = self.frames[..outcome.depth].to_vec();
                    for id in frames.iter().filter_map(StackFrame::executable) {
                        self.seen.insert(id);
                    }
                    self.stats.record_stored(outcome.needs_verification);
                    self.store
                        .push(StackTrace::new(now, frames, outcome.needs_verification));
                    if outcome.ran_out_of_space {
                        self.grow_frames();
                    }
                }
            }
        }
        self.stats.maybe_log(self.stats_reporting);
    }

    fn grow_frames(&mut self) {
        let len = self.frames.len();
        let grown = ((len as f64 * FRAME_BUFFER_GROWTH) as usize).max(len + 1);
        self.frames.resize(grown, StackFrame::EMPTY);
    }
}

struct Shared {
    me: Weak<Shared>,
    vm: Weak<Vm>,
    stopwatch: Arc<Stopwatch>,
    queue: TimerQueue,
    state: RankedMutex<ProfilerState>,
}

impl Shared {
    fn notice_execution_thread(&self, state: &mut ProfilerState, vm: &Vm) {
        state.thread = vm
            .machine_thread_for_current_thread()
            .map(|thread| Arc::clone(thread.control()));
    }

    fn notice_vm_entry(&self, state: &mut ProfilerState, vm: &Vm) {
        self.notice_execution_thread(state, vm);
        state.last_time = self.stopwatch.elapsed_time();
        self.dispatch_if_necessary(state, vm);
    }

    fn dispatch_if_necessary(&self, state: &mut ProfilerState, vm: &Vm) {
        if state.mode.is_active()
            && !state.has_dispatched
            && state.thread.is_some()
            && vm.has_entry_scope()
        {
            self.dispatch(state);
        }
    }

    /// Schedules the next sample. The callback owns a strong reference until
    /// it decides not to reschedule.
    fn dispatch(&self, state: &mut ProfilerState) {
        let Some(keep_alive) = self.me.upgrade() else {
            return;
        };
        state.has_dispatched = true;
        if state.mode == SamplerState::ActivePaused {
            state.mode = SamplerState::Active;
        }
        state.last_time = self.stopwatch.elapsed_time();
        self.queue
            .dispatch_after(state.interval, move || keep_alive.timer_fired());
    }

    fn timer_fired(&self) {
        let Some(vm) = self.vm.upgrade() else {
            return;
        };
        let mut state = self.state.lock();
        if state.mode != SamplerState::Active || state.thread.is_none() {
            state.has_dispatched = false;
            return;
        }
        self.sample(&vm, &mut state);
        self.dispatch(&mut state);
    }

    /// One suspend, walk, resume cycle, with the profiler lock held throughout.
    fn sample(&self, vm: &Vm, state: &mut ProfilerState) {
        if !vm.has_entry_scope() {
            return;
        }
        let Some(thread) = state.thread.clone() else {
            return;
        };
        let now = self.stopwatch.elapsed_time();
        let capture = {
            let locks = RegistryLocks::acquire(vm);
            capture_and_walk(vm, &locks, thread.as_ref(), &mut state.frames)
        };
        state.record(capture, now);
    }
}

struct ProfilerRoots<'a> {
    state: RankedMutexGuard<'a, ProfilerState>,
}

impl HeldRoots for ProfilerRoots<'_> {
    fn visit_roots(&mut self, heap: &Heap, visitor: &mut dyn RootVisitor) {
        let state = &mut *self.state;
        verify_pending(&mut state.store, &mut state.seen, heap);
        for id in state.seen.iter() {
            visitor.visit_executable(id);
        }
    }
}

impl ProfilerHooks for Shared {
    fn did_acquire_api_lock(&self) {
        let Some(vm) = self.vm.upgrade() else {
            return;
        };
        let mut state = self.state.lock();
        self.notice_execution_thread(&mut state, &vm);
    }

    fn did_enter_vm(&self) {
        let Some(vm) = self.vm.upgrade() else {
            return;
        };
        let mut state = self.state.lock();
        self.notice_vm_entry(&mut state, &vm);
    }

    fn hold_roots(&self) -> Box<dyn HeldRoots + '_> {
        Box::new(ProfilerRoots {
            state: self.state.lock(),
        })
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Statistical stack-sampling profiler of one [`Vm`].
///
/// The vm owns the profiler; every handle returned by
/// [`SamplingProfiler::ensure`] for the same vm drives the same instance.
#[derive(Clone)]
pub struct SamplingProfiler {
    vm: Arc<Vm>,
    shared: Arc<Shared>,
}

impl fmt::Debug for SamplingProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingProfiler")
            .field("state", &self.state())
            .field("traces", &self.trace_count())
            .finish_non_exhaustive()
    }
}

impl SamplingProfiler {
    /// Returns the vm's profiler, installing one built from `stopwatch` and
    /// `config` if there is none yet.
    pub fn ensure(
        vm: &Arc<Vm>,
        stopwatch: Arc<Stopwatch>,
        config: SamplerConfig,
    ) -> Result<Self, ProfilerError> {
        if let Some(hooks) = vm.profiler_hooks() {
            let shared = Arc::clone(hooks)
                .into_any()
                .downcast::<Shared>()
                .map_err(|_| ProfilerError::ForeignProfiler)?;
            return Ok(Self {
                vm: Arc::clone(vm),
                shared,
            });
        }

        let queue = TimerQueue::new().map_err(ProfilerError::Queue)?;
        let state = ProfilerState::new(&config);
        let weak_vm = Arc::downgrade(vm);
        let shared = vm
            .ensure_profiler(move || {
                Arc::new_cyclic(|me| Shared {
                    me: me.clone(),
                    vm: weak_vm,
                    stopwatch,
                    queue,
                    state: RankedMutex::new(LockRank::Profiler, state),
                })
            })
            .ok_or(ProfilerError::ForeignProfiler)?;
        debug!(
            interval_us = config.interval.as_micros() as u64,
            frame_capacity = config.initial_frame_capacity.get(),
            "sampling profiler installed"
        );
        Ok(Self {
            vm: Arc::clone(vm),
            shared,
        })
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn stopwatch(&self) -> &Arc<Stopwatch> {
        &self.shared.stopwatch
    }

    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        state.mode = SamplerState::Active;
        self.shared.dispatch_if_necessary(&mut state, &self.vm);
        debug!(dispatched = state.has_dispatched, "sampling profiler started");
    }

    /// Advisory: an in-flight sample completes, then nothing is rescheduled.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.mode = SamplerState::Stopped;
        if state.stats_reporting != StatsReporting::Off {
            state.stats.log();
        }
        debug!(traces = state.store.len(), "sampling profiler stopped");
    }

    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if state.mode == SamplerState::Active {
            state.mode = SamplerState::ActivePaused;
        }
        if state.stats_reporting != StatsReporting::Off {
            state.stats.log();
        }
    }

    pub fn shutdown(&self) {
        self.stop();
    }

    /// Records the calling thread as the one to sample.
    pub fn notice_execution_thread(&self) {
        let mut state = self.shared.state.lock();
        self.shared.notice_execution_thread(&mut state, &self.vm);
    }

    /// Samples `thread` instead of an engine-registered thread.
    pub fn notice_execution_thread_handle(&self, thread: Arc<dyn SuspendableThread>) {
        self.shared.state.lock().thread = Some(thread);
    }

    pub fn notice_lock_acquisition(&self) {
        self.notice_execution_thread();
    }

    pub fn notice_vm_entry(&self) {
        let mut state = self.shared.state.lock();
        self.shared.notice_vm_entry(&mut state, &self.vm);
    }

    pub fn clear_data(&self) {
        let mut state = self.shared.state.lock();
        state.store.clear();
        state.seen.clear();
    }

    pub fn set_timing_interval(&self, interval: Duration) {
        self.shared.state.lock().interval = interval;
    }

    pub fn timing_interval(&self) -> Duration {
        self.shared.state.lock().interval
    }

    /// Seconds attributed to stored samples.
    pub fn total_time(&self) -> f64 {
        self.shared.state.lock().total_time
    }

    pub fn state(&self) -> SamplerState {
        self.shared.state.lock().mode
    }

    pub fn stats(&self) -> WalkStats {
        self.shared.state.lock().stats
    }

    pub fn frame_capacity(&self) -> usize {
        self.shared.state.lock().frames.len()
    }

    pub fn trace_count(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    pub fn seen_executables(&self) -> SeenExecutables {
        self.shared.state.lock().seen.clone()
    }

    /// Settles pending traces, then labels every frame.
    pub fn report(&self) -> Report {
        let mut state = self.shared.state.lock();
        let heap = self.vm.heap().lock();
        let state = &mut *state;
        verify_pending(&mut state.store, &mut state.seen, &heap);
        build_report(&state.store, &heap)
    }

    pub fn stack_traces_as_json(&self) -> Result<String, ReportError> {
        self.report().to_json()
    }

    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor) {
        let state = self.shared.state.lock();
        for id in state.seen.iter() {
            visitor.visit_executable(id);
        }
    }

    #[cfg(test)]
    fn sample_once(&self) {
        let mut state = self.shared.state.lock();
        self.shared.sample(&self.vm, &mut state);
    }

    #[cfg(test)]
    fn has_dispatched(&self) -> bool {
        self.shared.state.lock().has_dispatched
    }
}

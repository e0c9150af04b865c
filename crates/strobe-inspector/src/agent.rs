use std::sync::Arc;

use strobe_sampler::{ProfilerError, SamplerConfig, SamplingProfiler};
use strobe_vm::{Stopwatch, Vm};
use tracing::debug;

use crate::events::{
    Frontend, FrontendEvent, ProfilingReason, ScriptEvent, TrackingComplete, TrackingStart,
};

/// Script-profiler domain of an inspector session.
///
/// Tracking always reports outermost script evaluations. When started with
/// samples it also drives the vm's sampling profiler and hands its report
/// over on completion.
pub struct ScriptProfilerAgent {
    vm: Arc<Vm>,
    stopwatch: Arc<Stopwatch>,
    config: SamplerConfig,
    frontend: Box<dyn Frontend>,
    profiler: Option<SamplingProfiler>,
    tracking: bool,
    sampling: bool,
    evaluation_depth: usize,
}

impl ScriptProfilerAgent {
    pub fn new(
        vm: Arc<Vm>,
        stopwatch: Arc<Stopwatch>,
        config: SamplerConfig,
        frontend: Box<dyn Frontend>,
    ) -> Self {
        Self {
            vm,
            stopwatch,
            config,
            frontend,
            profiler: None,
            tracking: false,
            sampling: false,
            evaluation_depth: 0,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Call from the thread that runs scripts. A second call while tracking
    /// is ignored.
    pub fn start_tracking(&mut self, include_samples: bool) -> Result<(), ProfilerError> {
        if self.tracking {
            return Ok(());
        }
        if include_samples {
            let profiler = SamplingProfiler::ensure(
                &self.vm,
                Arc::clone(&self.stopwatch),
                self.config.clone(),
            )?;
            profiler.notice_execution_thread();
            profiler.start();
            self.profiler = Some(profiler);
        }
        if !self.stopwatch.is_active() {
            self.stopwatch.start();
        }
        self.tracking = true;
        self.sampling = include_samples;
        debug!(include_samples, "script profiler tracking started");
        self.frontend
            .dispatch(FrontendEvent::TrackingStart(TrackingStart {
                timestamp: self.stopwatch.elapsed_time(),
            }));
        Ok(())
    }

    pub fn stop_tracking(&mut self) {
        if !self.tracking {
            return;
        }
        self.tracking = false;
        self.evaluation_depth = 0;

        let samples = match (self.sampling, &self.profiler) {
            (true, Some(profiler)) => {
                profiler.stop();
                let report = profiler.report();
                profiler.clear_data();
                Some(report)
            }
            _ => None,
        };
        self.sampling = false;
        debug!(
            traces = samples.as_ref().map_or(0, |report| report.len()),
            "script profiler tracking complete"
        );
        self.frontend
            .dispatch(FrontendEvent::TrackingComplete(TrackingComplete { samples }));
    }

    /// The frontend went away.
    pub fn disconnect(&mut self) {
        self.stop_tracking();
    }

    /// Whether an outermost evaluation is in progress.
    pub fn is_already_profiling(&self) -> bool {
        self.evaluation_depth > 0
    }

    /// Returns the evaluation start time in stopwatch seconds.
    pub fn will_evaluate_script(&mut self) -> f64 {
        self.evaluation_depth += 1;
        if self.evaluation_depth == 1
            && self.sampling
            && let Some(profiler) = &self.profiler
        {
            profiler.notice_execution_thread();
        }
        self.stopwatch.elapsed_time()
    }

    /// Only the outermost evaluation produces an event.
    pub fn did_evaluate_script(&mut self, start_time: f64, reason: ProfilingReason) {
        if self.evaluation_depth == 0 {
            return;
        }
        self.evaluation_depth -= 1;
        if self.evaluation_depth > 0 || !self.tracking {
            return;
        }
        let end_time = self.stopwatch.elapsed_time();
        self.frontend
            .dispatch(FrontendEvent::TrackingUpdate(ScriptEvent {
                start_time,
                end_time,
                kind: reason,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use strobe_sampler::SamplerState;
    use strobe_types::ExecutableKind;
    use strobe_vm::{FrameSpec, JitTier, VmOptions};

    fn agent(vm: &Arc<Vm>) -> (ScriptProfilerAgent, mpsc::Receiver<FrontendEvent>) {
        let (tx, rx) = mpsc::channel();
        let config = SamplerConfig {
            interval: Duration::from_micros(200),
            ..SamplerConfig::default()
        };
        let agent = ScriptProfilerAgent::new(
            Arc::clone(vm),
            Arc::new(Stopwatch::new()),
            config,
            Box::new(tx),
        );
        (agent, rx)
    }

    #[test]
    fn evaluations_are_reported_without_samples() {
        let vm = Vm::new(VmOptions::default());
        let (mut agent, rx) = agent(&vm);
        agent.start_tracking(false).expect("start");
        assert!(matches!(rx.try_recv(), Ok(FrontendEvent::TrackingStart(_))));

        let start = agent.will_evaluate_script();
        assert!(agent.is_already_profiling());
        agent.did_evaluate_script(start, ProfilingReason::Api);
        assert!(!agent.is_already_profiling());

        let Ok(FrontendEvent::TrackingUpdate(event)) = rx.try_recv() else {
            panic!("expected a tracking update");
        };
        assert_eq!(event.kind, ProfilingReason::Api);
        assert!(event.end_time >= event.start_time);

        agent.stop_tracking();
        assert_eq!(
            rx.try_recv().expect("completion"),
            FrontendEvent::TrackingComplete(TrackingComplete { samples: None })
        );
        assert!(vm.profiler_hooks().is_none(), "no profiler without samples");
    }

    #[test]
    fn nested_evaluations_produce_one_event() {
        let vm = Vm::new(VmOptions::default());
        let (mut agent, rx) = agent(&vm);
        agent.start_tracking(false).expect("start");
        let _ = rx.try_recv();

        let outer = agent.will_evaluate_script();
        let inner = agent.will_evaluate_script();
        agent.did_evaluate_script(inner, ProfilingReason::Microtask);
        assert!(rx.try_recv().is_err(), "inner evaluation is ignored");
        agent.did_evaluate_script(outer, ProfilingReason::Other);

        let Ok(FrontendEvent::TrackingUpdate(event)) = rx.try_recv() else {
            panic!("expected a tracking update");
        };
        assert_eq!(event.kind, ProfilingReason::Other);
        assert_eq!(event.start_time, outer);
    }

    #[test]
    fn repeated_start_and_stop_are_ignored() {
        let vm = Vm::new(VmOptions::default());
        let (mut agent, rx) = agent(&vm);
        agent.stop_tracking();
        assert!(rx.try_recv().is_err());

        agent.start_tracking(false).expect("start");
        agent.start_tracking(true).expect("second start");
        assert_eq!(rx.try_iter().count(), 1);
        assert!(vm.profiler_hooks().is_none());
    }

    #[test]
    fn sampled_tracking_completes_with_a_report() {
        let vm = Vm::new(VmOptions::default());
        let f = vm
            .define_function(ExecutableKind::function("busy"), JitTier::Baseline)
            .expect("compile");
        let (mut agent, rx) = agent(&vm);
        let cx = vm.attach_current_thread("main").expect("attach");
        agent.start_tracking(true).expect("start");
        let _ = rx.try_recv();

        let start = agent.will_evaluate_script();
        {
            let _entry = cx.enter();
            let deadline = Instant::now() + Duration::from_secs(10);
            let profiler = agent.profiler.clone().expect("sampling profiler");
            while profiler.trace_count() < 3 {
                assert!(Instant::now() < deadline, "no samples taken");
                cx.call(FrameSpec::function(&f)).expect("push");
                cx.poll_safepoint();
                cx.ret();
            }
        }
        agent.did_evaluate_script(start, ProfilingReason::Api);
        let _ = rx.try_recv();

        agent.stop_tracking();
        let Ok(FrontendEvent::TrackingComplete(TrackingComplete {
            samples: Some(report),
        })) = rx.try_recv()
        else {
            panic!("expected samples on completion");
        };
        assert!(!report.is_empty());
        assert!(
            report
                .traces()
                .iter()
                .all(|trace| trace.labels() == ["busy"])
        );

        let profiler = agent.profiler.as_ref().expect("profiler");
        assert_eq!(profiler.state(), SamplerState::Stopped);
        assert_eq!(profiler.trace_count(), 0, "data cleared after hand-off");
    }
}

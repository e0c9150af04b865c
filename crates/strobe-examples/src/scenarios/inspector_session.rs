use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use strobe_inspector::{FrontendEvent, ProfilingReason, ScriptProfilerAgent, encode_event};
use strobe_types::ExecutableKind;
use strobe_vm::{FrameSpec, JitTier, Stopwatch, Vm};
use tracing::info;

use crate::Config;

/// Drives the script-profiler agent the way an inspector frontend would and
/// prints the start and completion events it receives.
pub fn run(vm: &Arc<Vm>, stopwatch: Arc<Stopwatch>, cfg: &Config) -> Result<(), String> {
    let (frontend, events) = mpsc::channel();
    let mut agent =
        ScriptProfilerAgent::new(Arc::clone(vm), stopwatch, cfg.sampler.clone(), Box::new(frontend));

    let handler = vm
        .define_function(ExecutableKind::function("onMessage"), JitTier::Baseline)
        .map_err(|e| e.to_string())?;
    let microtask = vm
        .define_function(ExecutableKind::function("resolvePromise"), JitTier::Interpreter)
        .map_err(|e| e.to_string())?;

    let cx = vm
        .attach_current_thread("main")
        .map_err(|e| e.to_string())?;
    let _api = cx.lock_api();
    agent.start_tracking(true).map_err(|e| e.to_string())?;

    let deadline = Instant::now() + cfg.duration;
    let mut evaluations = 0u64;
    while Instant::now() < deadline {
        let (function, reason) = if evaluations % 4 == 3 {
            (&microtask, ProfilingReason::Microtask)
        } else {
            (&handler, ProfilingReason::Api)
        };
        let start = agent.will_evaluate_script();
        {
            let _entry = cx.enter();
            cx.call(FrameSpec::function(function))
                .map_err(|e| e.to_string())?;
            for _ in 0..256 {
                cx.poll_safepoint();
            }
            cx.ret();
        }
        agent.did_evaluate_script(start, reason);
        evaluations += 1;
    }
    agent.stop_tracking();
    info!(evaluations, "inspector session finished");

    let mut updates = 0usize;
    for event in events.try_iter() {
        if matches!(event, FrontendEvent::TrackingUpdate(_)) {
            updates += 1;
            continue;
        }
        println!("{}", encode_event(&event).map_err(|e| e.to_string())?);
    }
    info!(updates, "tracking updates received");
    Ok(())
}

use std::sync::Arc;
use std::time::Instant;

use strobe_sampler::SamplingProfiler;
use strobe_types::{CallSiteIndex, ExecutableKind};
use strobe_vm::{CompiledFunction, ExecutionContext, FrameSpec, JitTier, Stopwatch, Vm, VmError};
use tracing::info;

use crate::Config;

const RENDER_SITE: CallSiteIndex = CallSiteIndex::new(3);

/// Recursive calls plus an optimized function with two inlined callees.
pub fn run(vm: &Arc<Vm>, stopwatch: Arc<Stopwatch>, cfg: &Config) -> Result<(), String> {
    let profiler =
        SamplingProfiler::ensure(vm, stopwatch, cfg.sampler.clone()).map_err(|e| e.to_string())?;

    let program = vm
        .define_function(ExecutableKind::Program, JitTier::Interpreter)
        .map_err(|e| e.to_string())?;
    let fib = vm
        .define_function(ExecutableKind::function("fib"), JitTier::Baseline)
        .map_err(|e| e.to_string())?;
    let paint = vm.create_executable(ExecutableKind::function("paint"));
    let layout = vm.create_executable(ExecutableKind::function("layout"));
    let render = vm
        .define_function_with_inlining(
            ExecutableKind::function("render"),
            JitTier::Optimizing,
            [(RENDER_SITE, vec![paint, layout])],
        )
        .map_err(|e| e.to_string())?;

    let cx = vm
        .attach_current_thread("workload")
        .map_err(|e| e.to_string())?;
    let _api = cx.lock_api();
    profiler.start();

    let deadline = Instant::now() + cfg.duration;
    let mut iterations = 0u64;
    {
        let _entry = cx.enter();
        cx.call(FrameSpec::function(&program))
            .map_err(|e| e.to_string())?;
        while Instant::now() < deadline {
            fib_frames(&cx, &fib, 12).map_err(|e| e.to_string())?;
            cx.call(FrameSpec::function(&render).at_call_site(RENDER_SITE))
                .map_err(|e| e.to_string())?;
            for _ in 0..64 {
                cx.poll_safepoint();
            }
            cx.ret();
            iterations += 1;
        }
        cx.ret();
    }
    profiler.pause();

    let report = profiler.report();
    info!(
        iterations,
        traces = report.len(),
        total_time = profiler.total_time(),
        "recursive workload finished"
    );
    super::log_hot_leaves(&report);
    super::print_report(&report)
}

fn fib_frames(cx: &ExecutionContext, fib: &CompiledFunction, n: u64) -> Result<u64, VmError> {
    cx.call(FrameSpec::function(fib))?;
    let value = if n < 2 {
        n
    } else {
        fib_frames(cx, fib, n - 1)? + fib_frames(cx, fib, n - 2)?
    };
    cx.ret();
    Ok(value)
}

use std::sync::Arc;
use std::time::Instant;

use strobe_sampler::SamplingProfiler;
use strobe_types::{ExecutableKind, InstructionPointer};
use strobe_vm::{FrameSpec, JitTier, NATIVE_CODE, Stopwatch, Vm};
use tracing::{debug, info};

use crate::Config;

const RECOMPILE_EVERY: u64 = 200;

/// Managed code calling into host functions, runtime code and the regexp JIT,
/// with a callback that is jettisoned while on the stack and then collected.
pub fn run(vm: &Arc<Vm>, stopwatch: Arc<Stopwatch>, cfg: &Config) -> Result<(), String> {
    let profiler =
        SamplingProfiler::ensure(vm, stopwatch, cfg.sampler.clone()).map_err(|e| e.to_string())?;

    let parse = vm
        .define_function(ExecutableKind::function("parse"), JitTier::Baseline)
        .map_err(|e| e.to_string())?;
    let host = vm.create_host_function();
    let mut callback = vm
        .define_function(ExecutableKind::anonymous_function(), JitTier::Baseline)
        .map_err(|e| e.to_string())?;

    let cx = vm
        .attach_current_thread("workload")
        .map_err(|e| e.to_string())?;
    let _api = cx.lock_api();
    profiler.start();

    let runtime_pc = InstructionPointer::new(NATIVE_CODE.start + 0x80);
    let deadline = Instant::now() + cfg.duration;
    let mut iterations = 0u64;
    {
        let _entry = cx.enter();
        while Instant::now() < deadline {
            cx.call(FrameSpec::function(&parse))
                .map_err(|e| e.to_string())?;
            {
                let _runtime = cx.enter_native(runtime_pc);
                for _ in 0..16 {
                    cx.poll_safepoint();
                }
            }
            {
                let _regexp = cx.enter_regexp_jit(parse.code.entry_pc);
                for _ in 0..16 {
                    cx.poll_safepoint();
                }
            }
            cx.call(FrameSpec::host(host)).map_err(|e| e.to_string())?;
            cx.call(FrameSpec::function(&callback))
                .map_err(|e| e.to_string())?;

            iterations += 1;
            if iterations % RECOMPILE_EVERY == 0 {
                vm.jettison(callback.code.code_block);
            }
            for _ in 0..16 {
                cx.poll_safepoint();
            }
            cx.ret();
            cx.ret();
            cx.ret();

            if iterations % RECOMPILE_EVERY == 0 {
                vm.release(callback.cell);
                callback = vm
                    .define_function(ExecutableKind::anonymous_function(), JitTier::Baseline)
                    .map_err(|e| e.to_string())?;
                let stats = cx.collect_garbage();
                debug!(
                    freed_cells = stats.freed_cells,
                    freed_executables = stats.freed_executables,
                    "recompiled callback"
                );
            }
        }
    }
    profiler.pause();

    let report = profiler.report();
    let stats = profiler.stats();
    info!(
        iterations,
        traces = report.len(),
        failed_walks = stats.failed_walks,
        unverified_traces = stats.unverified_traces,
        "native calls workload finished"
    );
    super::log_hot_leaves(&report);
    super::print_report(&report)
}

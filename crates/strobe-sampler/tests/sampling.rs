use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use strobe_sampler::{Report, SamplerConfig, SamplerState, SamplingProfiler};
use strobe_types::ExecutableKind;
use strobe_vm::{CompiledFunction, FrameSpec, JitTier, Stopwatch, Vm, VmOptions};

struct Workload {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Workload {
    /// Calls `outer -> inner` in a loop, polling the safepoint at every call.
    fn spawn(vm: &Arc<Vm>, outer: CompiledFunction, inner: CompiledFunction) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let vm = Arc::clone(vm);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("workload".into())
                .spawn(move || {
                    let cx = vm.attach_current_thread("workload").expect("attach");
                    let _api = cx.lock_api();
                    let _entry = cx.enter();
                    while !stop.load(Ordering::Acquire) {
                        cx.call(FrameSpec::function(&outer)).expect("push outer");
                        for _ in 0..16 {
                            cx.call(FrameSpec::function(&inner)).expect("push inner");
                            cx.poll_safepoint();
                            cx.ret();
                        }
                        cx.ret();
                    }
                })
                .expect("spawn workload")
        };
        Self { stop, handle }
    }

    fn finish(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.join().expect("workload thread");
    }
}

fn profiler(vm: &Arc<Vm>) -> SamplingProfiler {
    let stopwatch = Arc::new(Stopwatch::new());
    stopwatch.start();
    let config = SamplerConfig {
        interval: Duration::from_micros(200),
        ..SamplerConfig::default()
    };
    SamplingProfiler::ensure(vm, stopwatch, config).expect("install profiler")
}

fn wait_for_traces(profiler: &SamplingProfiler, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while profiler.trace_count() < count {
        assert!(Instant::now() < deadline, "sampler produced no traces");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn define(vm: &Vm, name: &str) -> CompiledFunction {
    vm.define_function(ExecutableKind::function(name), JitTier::Baseline)
        .expect("compile")
}

#[test]
fn samples_a_running_workload() {
    let vm = Vm::new(VmOptions::default());
    let profiler = profiler(&vm);
    profiler.start();

    let workload = Workload::spawn(&vm, define(&vm, "outer"), define(&vm, "inner"));
    wait_for_traces(&profiler, 5);
    profiler.pause();
    workload.finish();

    assert_eq!(profiler.state(), SamplerState::ActivePaused);
    let report = profiler.report();
    assert!(!report.is_empty());
    for trace in report.traces() {
        let labels = trace.labels();
        assert_eq!(labels.last().map(String::as_str), Some("outer"));
        assert!(labels.len() <= 2);
    }
    assert!(
        report
            .traces()
            .iter()
            .any(|trace| trace.labels() == ["inner", "outer"]),
        "some sample should land inside inner"
    );
    assert!(profiler.total_time() > 0.0);

    let json = profiler.stack_traces_as_json().expect("encode");
    assert_eq!(Report::from_json(&json).expect("decode"), report);
}

#[test]
fn clearing_forgets_traces_and_seen_code() {
    let vm = Vm::new(VmOptions::default());
    let profiler = profiler(&vm);
    profiler.start();

    let workload = Workload::spawn(&vm, define(&vm, "outer"), define(&vm, "inner"));
    wait_for_traces(&profiler, 2);
    profiler.stop();
    workload.finish();

    assert!(!profiler.seen_executables().is_empty());
    profiler.clear_data();
    assert_eq!(profiler.trace_count(), 0);
    assert!(profiler.seen_executables().is_empty());
    assert_eq!(profiler.stack_traces_as_json().expect("encode"), "[]");
}

#[test]
fn sampled_code_outlives_its_function_objects() {
    let vm = Vm::new(VmOptions::default());
    let profiler = profiler(&vm);
    profiler.start();

    let outer = define(&vm, "outer");
    let inner = define(&vm, "inner");
    let (outer_cell, outer_executable) = (outer.cell, outer.executable);
    let inner_cell = inner.cell;
    let workload = Workload::spawn(&vm, outer, inner);
    wait_for_traces(&profiler, 3);
    profiler.stop();
    workload.finish();

    vm.release(outer_cell);
    vm.release(inner_cell);
    let stats = vm.collect_garbage();
    assert!(stats.freed_cells >= 2);
    assert!(vm.heap().lock().contains_executable(outer_executable));

    let report = profiler.report();
    assert!(report.traces().iter().all(|t| t.labels().last().map(String::as_str) == Some("outer")));
}

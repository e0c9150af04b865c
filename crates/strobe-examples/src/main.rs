use facet::Facet;
use figue as args;
use std::sync::Arc;
use std::time::Duration;

use strobe_sampler::SamplerConfig;
use strobe_vm::{Stopwatch, ThreadControl, Vm, VmOptions};

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// How long the workload runs, in milliseconds.
    #[facet(args::named, default)]
    duration_ms: Option<u64>,
    /// Overrides STROBE_SAMPLING_INTERVAL_US.
    #[facet(args::named, default)]
    interval_us: Option<u64>,
    /// Interrupt the workload with SIGPROF instead of parking it at safepoints.
    #[facet(args::named, default)]
    signals: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    RecursiveWorkload,
    NativeCalls,
    InspectorSession,
}

pub(crate) struct Config {
    pub(crate) duration: Duration,
    pub(crate) sampler: SamplerConfig,
    pub(crate) vm: VmOptions,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    let cfg = config_from_cli(&cli)?;
    let command = cli.command;

    // Execution contexts are bound to the thread that attached them.
    tokio::task::spawn_blocking(move || dispatch_command(command, cfg))
        .await
        .map_err(|e| format!("scenario thread failed: {e}"))?
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("strobe-examples")
                .description("Run synthetic workloads under the sampling profiler")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn config_from_cli(cli: &Cli) -> AnyResult<Config> {
    let mut sampler = SamplerConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(interval_us) = cli.interval_us {
        if interval_us == 0 {
            return Err("--interval-us must be greater than zero".to_owned());
        }
        sampler.interval = Duration::from_micros(interval_us);
    }

    let mut vm = VmOptions::default();
    if cli.signals {
        vm.thread_control = signal_control()?;
    }

    Ok(Config {
        duration: Duration::from_millis(cli.duration_ms.unwrap_or(500)),
        sampler,
        vm,
    })
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
fn signal_control() -> AnyResult<ThreadControl> {
    Ok(ThreadControl::Signal)
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
fn signal_control() -> AnyResult<ThreadControl> {
    Err("--signals is only supported on linux x86_64 and aarch64".to_owned())
}

fn dispatch_command(command: CommandKind, cfg: Config) -> AnyResult<()> {
    let vm = Vm::new(cfg.vm.clone());
    let stopwatch = Arc::new(Stopwatch::new());
    stopwatch.start();
    match command {
        CommandKind::RecursiveWorkload => scenarios::recursive_workload::run(&vm, stopwatch, &cfg),
        CommandKind::NativeCalls => scenarios::native_calls::run(&vm, stopwatch, &cfg),
        CommandKind::InspectorSession => scenarios::inspector_session::run(&vm, stopwatch, &cfg),
    }
}

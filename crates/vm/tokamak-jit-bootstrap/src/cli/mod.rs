//! CLI entry point for the jit-bootstrap simulator binary.

pub mod simulator;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use crate::bootstrap::BootstrapSequencer;
use crate::config::CompilerConfig;
use crate::error::{BridgeError, ConfigError};
use crate::flags::RuntimeFlags;
use crate::queue::CompileQueue;
use crate::service::{CompilationPolicy, CompilerService};
use crate::worker::WorkerThread;

use simulator::{SimulatedRuntime, WorkerSummary};

/// Bootstrap an external compiler against a simulated runtime.
#[derive(Parser, Debug)]
#[command(
    name = "jit-bootstrap",
    about = "Bootstrap an external JIT compiler against a simulated runtime"
)]
pub struct Args {
    /// TOML config file; CLI flags override its values
    #[arg(long, value_name = "PATH", env = "JIT_BOOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of compiler threads
    #[arg(long, default_value_t = 2, env = "JIT_BOOTSTRAP_WORKERS")]
    pub workers: usize,

    /// Run the compiler as a precompiled library (hosted mode)
    #[arg(long, env = "JIT_BOOTSTRAP_HOSTED")]
    pub hosted: bool,

    /// Idle milliseconds before a hosted compiler thread is detached (<= 0 disables)
    #[arg(long, value_name = "MILLIS", allow_negative_numbers = true, env = "JIT_BOOTSTRAP_IDLE_DELAY")]
    pub idle_delay: Option<i64>,

    /// Uptime in milliseconds before any compiler thread may be detached
    #[arg(long, value_name = "MILLIS", env = "JIT_BOOTSTRAP_STARTUP_GRACE")]
    pub startup_grace: Option<u64>,

    /// Print bootstrap progress to stdout
    #[arg(long)]
    pub progress: bool,

    /// Simulated time per compilation, in milliseconds
    #[arg(long, default_value_t = 5, value_name = "MILLIS")]
    pub compile_millis: u64,

    /// Application methods queued after the bootstrap
    #[arg(long, default_value_t = 200)]
    pub app_methods: usize,

    /// Keep the compiler threads alive this long after the queue drains
    #[arg(long, default_value_t = 0, value_name = "MILLIS")]
    pub linger: u64,

    /// Give up on the bootstrap after this many seconds
    #[arg(long, value_name = "SECS")]
    pub bootstrap_timeout: Option<u64>,

    #[arg(long, default_value_t = Level::INFO, value_name = "LOG_LEVEL", env = "JIT_BOOTSTRAP_LOG_LEVEL")]
    pub log_level: Level,
}

impl Args {
    /// Load the config file, if any, and apply the CLI overrides on top.
    pub fn compiler_config(&self) -> Result<CompilerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => CompilerConfig::from_toml_file(path)?,
            None => CompilerConfig::default(),
        };
        if self.hosted {
            config.external_compiler_enabled = true;
            config.use_native_library_compiler = true;
        }
        if let Some(delay) = self.idle_delay {
            config.idle_delay_millis = delay;
        }
        if let Some(grace) = self.startup_grace {
            config.startup_grace_millis = grace;
        }
        if self.progress {
            config.print_bootstrap_progress = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("compiler thread {0} panicked")]
    WorkerPanicked(usize),
}

/// Logs when the compiler takes over from the startup policy.
struct LoggingPolicy;

impl CompilationPolicy for LoggingPolicy {
    fn completed_vm_startup(&self) {
        info!("compilation policy: startup complete");
    }
}

fn init_tracing(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(level))
        .from_env_lossy();
    // A subscriber may already be installed when embedded; keep that one.
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        debug!("tracing subscriber already installed");
    }
}

/// Run the simulator.
pub fn run(args: Args) -> Result<(), CliError> {
    init_tracing(args.log_level);

    let vm_start = Instant::now();
    let config = args.compiler_config()?;
    let flags = Arc::new(RuntimeFlags::new());
    let runtime = Arc::new(SimulatedRuntime::live());
    let service = CompilerService::create(config, flags.clone(), runtime.clone(), vm_start)?;
    if !service.initialize(&LoggingPolicy) {
        warn!("external compiler not selected; running without it");
    }

    let queue = CompileQueue::new(flags);
    let workers: Vec<WorkerThread> = (0..args.workers).map(WorkerThread::new).collect();
    let compile_time = Duration::from_millis(args.compile_millis);

    let summaries = std::thread::scope(|s| -> Result<Vec<WorkerSummary>, CliError> {
        let handles: Result<Vec<_>, std::io::Error> = workers
            .iter()
            .map(|worker| {
                let (service, queue, runtime) = (&service, &queue, &*runtime);
                std::thread::Builder::new()
                    .name(worker.name().to_string())
                    .spawn_scoped(s, move || {
                        simulator::run_worker(service, queue, worker, runtime, compile_time)
                    })
            })
            .collect::<Result<_, _>>();
        let handles: Vec<_> = match handles {
            Ok(handles) => handles,
            Err(error) => {
                queue.close();
                return Err(error.into());
            }
        };

        let outcome = drive(&service, &queue, &args);
        queue.close();

        let mut summaries = Vec::with_capacity(handles.len());
        for (id, handle) in handles.into_iter().enumerate() {
            let summary = handle.join().map_err(|_| CliError::WorkerPanicked(id))??;
            summaries.push(summary);
        }
        outcome?;
        Ok(summaries)
    })?;

    service.shutdown();
    report(&service, &runtime, &workers, &summaries)
}

/// Bootstrap, then feed the application workload and wait for it to drain.
fn drive(service: &CompilerService, queue: &CompileQueue, args: &Args) -> Result<(), CliError> {
    let registry = simulator::root_class();
    let mut sequencer = BootstrapSequencer::new(service, queue, &registry);
    if let Some(secs) = args.bootstrap_timeout {
        let token = CancellationToken::new();
        let deadline = token.clone();
        // Detached: the timer may outlive a bootstrap that finishes early.
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            deadline.cancel();
        });
        sequencer = sequencer.with_cancellation(token);
    }

    let mut stdout = std::io::stdout().lock();
    if let Some(report) = sequencer.run(&mut stdout)? {
        info!(
            submitted = report.methods_submitted,
            compiled = report.methods_compiled,
            elapsed = ?report.elapsed,
            "bootstrap report"
        );
    }
    drop(stdout);

    let queued = simulator::submit_workload(queue, args.app_methods);
    info!(queued, "application workload submitted");
    while !queue.is_empty() {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(args.linger));
    Ok(())
}

fn report(
    service: &CompilerService,
    runtime: &SimulatedRuntime,
    workers: &[WorkerThread],
    summaries: &[WorkerSummary],
) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    service.print_timers(&mut out)?;

    let counters = runtime.counters();
    writeln!(out)?;
    writeln!(out, "    External Runtime:")?;
    writeln!(
        out,
        "       attaches: {}, detaches: {}, repacks: {}, bootstrap notifications: {}",
        counters.attaches, counters.detaches, counters.repacks, counters.bootstrap_notifications
    )?;
    for (worker, summary) in workers.iter().zip(summaries) {
        writeln!(
            out,
            "       {}: compiled {}, simple tier {}, idle detaches {}, idle repacks {}",
            worker.name(),
            summary.compiled,
            summary.forced_simple,
            summary.idle_detaches,
            summary.idle_repacks
        )?;
    }
    writeln!(
        out,
        "    methods compiled: {}, compilation ticks: {}",
        service.methods_compiled(),
        service.global_compilation_ticks()
    )?;
    Ok(())
}

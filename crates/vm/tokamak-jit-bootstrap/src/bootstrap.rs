//! Compiler bootstrap.
//!
//! Before application code is compiled, the external compiler compiles a
//! small seed set of methods (every eligible method of the root class). This
//! pulls the compiler's own hot paths through compilation while the queue is
//! otherwise empty. The bootstrap thread submits the seed tasks, then polls
//! the top-tier queue until it drains; it never blocks the worker threads.
//!
//! There is no timeout: a compilation that never finishes hangs the
//! bootstrap. Embedders that need a bound (test harnesses) can attach a
//! [`CancellationToken`].

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutionMode;
use crate::error::BridgeError;
use crate::flags::FlagSetting;
use crate::method::MethodRegistry;
use crate::queue::{CompileBroker, CompileReason, CompileTaskRequest, CompileTier, EntryPoint};
use crate::service::CompilerService;

/// Hot count given to every seed task.
pub const BOOTSTRAP_HOT_COUNT: u32 = 10;

/// Interval between two reads of the queue size while draining.
pub const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One progress dot per this many compiled methods.
const PROGRESS_STEP: u64 = 100;

/// Summary of a finished bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Seed tasks accepted by the queue.
    pub methods_submitted: usize,
    /// Value of the service's compiled-methods counter when the queue drained.
    pub methods_compiled: u64,
    pub elapsed: Duration,
}

/// Runs the bootstrap for a [`CompilerService`].
pub struct BootstrapSequencer<'a> {
    service: &'a CompilerService,
    broker: &'a dyn CompileBroker,
    methods: &'a dyn MethodRegistry,
    cancel: Option<CancellationToken>,
}

impl<'a> BootstrapSequencer<'a> {
    pub fn new(
        service: &'a CompilerService,
        broker: &'a dyn CompileBroker,
        methods: &'a dyn MethodRegistry,
    ) -> Self {
        Self {
            service,
            broker,
            methods,
            cancel: None,
        }
    }

    /// Stop draining once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Seed the queue and block until it drains.
    ///
    /// Returns `Ok(None)` when the runtime is interpreter-only. Progress and
    /// the summary line go to `sink` when `print_bootstrap_progress` is set.
    /// A failure of the bootstrap-finished notification marks the service
    /// [`Failed`](crate::service::CompilerState::Failed) and is returned as is;
    /// startup cannot continue past it.
    pub fn run(&self, sink: &mut dyn Write) -> Result<Option<BootstrapReport>, BridgeError> {
        let config = self.service.config();
        if config.execution_mode == ExecutionMode::Interpreted {
            debug!("interpreter-only mode, skipping compiler bootstrap");
            return Ok(None);
        }
        let print = config.print_bootstrap_progress;

        let window = self.service.begin_bootstrap()?;
        // Compile-the-world makes the queue drop ordinary requests. Taken only
        // once the window is ours, so a rejected bootstrap never touches it.
        let _ctw_off = FlagSetting::new(&self.service.flags().compile_the_world, false);
        if print {
            write!(sink, "Bootstrapping external compiler")?;
            sink.flush()?;
        }
        let start = Instant::now();

        let methods_submitted = self.submit_seed_tasks();
        info!(methods_submitted, "bootstrap seed tasks queued");

        self.drain(start, print, sink)?;

        let methods_compiled = self.service.methods_compiled();
        let elapsed = start.elapsed();
        if print {
            writeln!(
                sink,
                " in {} ms (compiled {} methods)",
                elapsed.as_millis(),
                methods_compiled
            )?;
        }
        drop(window);

        info!(
            methods_compiled,
            elapsed = ?elapsed,
            "compiler bootstrap finished"
        );
        if let Err(error) = self.service.bridge().notify_bootstrap_finished() {
            warn!(%error, "external runtime did not accept bootstrap completion");
            self.service.mark_failed();
            return Err(error);
        }

        Ok(Some(BootstrapReport {
            methods_submitted,
            methods_compiled,
            elapsed,
        }))
    }

    fn submit_seed_tasks(&self) -> usize {
        self.methods
            .root_class_methods()
            .into_iter()
            .filter(|method| method.is_bootstrap_candidate())
            .map(|method| CompileTaskRequest {
                method,
                entry: EntryPoint::Invocation,
                tier: CompileTier::FullOptimization,
                hot_count: BOOTSTRAP_HOT_COUNT,
                reason: CompileReason::Bootstrap,
            })
            .map(|task| self.broker.submit(task))
            .filter(|accepted| *accepted)
            .count()
    }

    fn drain(&self, start: Instant, print: bool, sink: &mut dyn Write) -> Result<(), BridgeError> {
        let mut first_round = true;
        let mut dots: u64 = 0;
        loop {
            // Right after submission the queue can read empty before the first
            // task is picked up. In the first round only, keep waiting until
            // the size is non-zero or a bootstrap request has been handled.
            let size = loop {
                thread::sleep(BOOTSTRAP_POLL_INTERVAL);
                let size = self.broker.size(CompileTier::TOP);
                self.check_cancelled(start, size)?;
                if !(first_round && size == 0 && !self.service.bootstrap_request_handled()) {
                    break size;
                }
            };
            first_round = false;

            if print {
                let target = self.service.methods_compiled() / PROGRESS_STEP;
                while dots < target {
                    dots = dots.saturating_add(1);
                    write!(sink, ".")?;
                }
                sink.flush()?;
            }
            if size == 0 {
                return Ok(());
            }
        }
    }

    fn check_cancelled(&self, start: Instant, pending: usize) -> Result<(), BridgeError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(BridgeError::BootstrapCancelled {
                elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                pending,
            }),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for BootstrapSequencer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapSequencer")
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

//! The process-wide compiler service.
//!
//! `CompilerService` owns the bridge's global state: the initialization
//! state machine, the bootstrap flags, the monotonic compilation counters and
//! the install statistics. Exactly one instance exists per process. It is
//! created once by [`CompilerService::create`] and handed to the runtime's
//! collaborators by reference; nothing looks it up through a global.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bootstrap::{BootstrapReport, BootstrapSequencer};
use crate::bridge::ExternalRuntimeBridge;
use crate::config::CompilerConfig;
use crate::error::BridgeError;
use crate::flags::RuntimeFlags;
use crate::gate::{self, GateContext};
use crate::lifecycle::{IdleAction, WorkerLifecycleManager};
use crate::method::{Method, MethodRegistry};
use crate::queue::{CompileBroker, QueueGuard};
use crate::stats::{CodeInstallStats, ElapsedTimer, InstallSnapshot, TimerScope};
use crate::worker::WorkerThread;

/// Set once the process-wide service has been created.
static INSTANCE_CREATED: AtomicBool = AtomicBool::new(false);

/// Initialization state of the external compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerState {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
    ShutDown,
}

impl CompilerState {
    fn to_u8(self) -> u8 {
        match self {
            CompilerState::Uninitialized => 0,
            CompilerState::Initializing => 1,
            CompilerState::Initialized => 2,
            CompilerState::Failed => 3,
            CompilerState::ShutDown => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CompilerState::Initializing,
            2 => CompilerState::Initialized,
            3 => CompilerState::Failed,
            4 => CompilerState::ShutDown,
            _ => CompilerState::Uninitialized,
        }
    }
}

/// The runtime's compilation policy.
pub trait CompilationPolicy: Send + Sync {
    /// Startup is over as far as compilation is concerned: stop deferring
    /// compilation of application methods.
    fn completed_vm_startup(&self);
}

/// Plain values read from a [`CompilerService`]. Fields are read one at a
/// time and may not be mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub state: CompilerState,
    pub bootstrapping: bool,
    pub methods_compiled: u64,
    pub global_compilation_ticks: u64,
    pub jit_installs: InstallSnapshot,
    pub hosted_installs: InstallSnapshot,
}

/// Global state of the external compiler bridge.
pub struct CompilerService {
    config: CompilerConfig,
    flags: Arc<RuntimeFlags>,
    bridge: Arc<dyn ExternalRuntimeBridge>,
    lifecycle: WorkerLifecycleManager,
    state: AtomicU8,
    bootstrapping: AtomicBool,
    bootstrap_request_handled: AtomicBool,
    methods_compiled: AtomicU64,
    global_compilation_ticks: AtomicU64,
    compile_timer: ElapsedTimer,
    jit_installs: CodeInstallStats,
    hosted_installs: CodeInstallStats,
}

impl CompilerService {
    /// Create the process-wide service.
    ///
    /// Fails with [`BridgeError::AlreadyCreated`] if a service was already
    /// created in this process. `vm_start` is when the runtime started; it
    /// anchors the startup grace period for idle detaching.
    pub fn create(
        config: CompilerConfig,
        flags: Arc<RuntimeFlags>,
        bridge: Arc<dyn ExternalRuntimeBridge>,
        vm_start: Instant,
    ) -> Result<Self, BridgeError> {
        if INSTANCE_CREATED.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::AlreadyCreated);
        }
        Ok(Self::build(config, flags, bridge, vm_start))
    }

    /// Create a service without claiming the process-wide instance slot.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn unregistered(
        config: CompilerConfig,
        flags: Arc<RuntimeFlags>,
        bridge: Arc<dyn ExternalRuntimeBridge>,
        vm_start: Instant,
    ) -> Self {
        Self::build(config, flags, bridge, vm_start)
    }

    /// Release the process-wide instance slot so `create` can run again.
    ///
    /// Must be called at the start of every `#[serial]` test that uses
    /// `create`. Not available in production builds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset_instance_for_testing() {
        INSTANCE_CREATED.store(false, Ordering::Release);
    }

    fn build(
        config: CompilerConfig,
        flags: Arc<RuntimeFlags>,
        bridge: Arc<dyn ExternalRuntimeBridge>,
        vm_start: Instant,
    ) -> Self {
        let lifecycle = WorkerLifecycleManager::new(&config, Arc::clone(&bridge), vm_start);
        Self {
            config,
            flags,
            bridge,
            lifecycle,
            state: AtomicU8::new(CompilerState::Uninitialized.to_u8()),
            bootstrapping: AtomicBool::new(false),
            bootstrap_request_handled: AtomicBool::new(false),
            methods_compiled: AtomicU64::new(0),
            global_compilation_ticks: AtomicU64::new(0),
            compile_timer: ElapsedTimer::new(),
            jit_installs: CodeInstallStats::new(),
            hosted_installs: CodeInstallStats::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    pub fn bridge(&self) -> &dyn ExternalRuntimeBridge {
        &*self.bridge
    }

    // -- Initialization --

    /// Enable the external compiler.
    ///
    /// Does nothing unless compilation is on, the external compiler is enabled
    /// and selected as the default compiler, and this caller is the one that
    /// gets to initialize. Returns whether this call initialized the compiler.
    pub fn initialize(&self, policy: &dyn CompilationPolicy) -> bool {
        let config = &self.config;
        if !config.use_compiler
            || !config.external_compiler_enabled
            || !config.use_external_compiler_as_default
            || !self.should_perform_init()
        {
            debug!("external compiler initialization skipped");
            return false;
        }

        self.set_state(CompilerState::Initialized);

        // The external compiler counts as application code, so deferring
        // compilation until startup completes must stop now.
        policy.completed_vm_startup();
        info!(
            hosted = config.is_hosted(),
            "external compiler initialized"
        );
        true
    }

    /// Claim the right to initialize. Only the first caller wins.
    fn should_perform_init(&self) -> bool {
        self.state
            .compare_exchange(
                CompilerState::Uninitialized.to_u8(),
                CompilerState::Initializing.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn state(&self) -> CompilerState {
        CompilerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CompilerState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == CompilerState::Initialized
    }

    /// Mark the compiler as failed. Set when the external runtime rejects the
    /// end of the bootstrap.
    pub fn mark_failed(&self) {
        self.set_state(CompilerState::Failed);
    }

    pub fn shutdown(&self) {
        self.set_state(CompilerState::ShutDown);
        info!("external compiler shut down");
    }

    // -- Bootstrap --

    /// Compile the seed methods from `methods` and block until the queue drains.
    ///
    /// See [`BootstrapSequencer::run`].
    pub fn bootstrap(
        &self,
        broker: &dyn CompileBroker,
        methods: &dyn MethodRegistry,
        sink: &mut dyn Write,
    ) -> Result<Option<BootstrapReport>, BridgeError> {
        BootstrapSequencer::new(self, broker, methods).run(sink)
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    pub(crate) fn begin_bootstrap(&self) -> Result<BootstrapWindow<'_>, BridgeError> {
        self.bootstrapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::BootstrapInProgress)?;
        Ok(BootstrapWindow {
            bootstrapping: &self.bootstrapping,
        })
    }

    /// Called by a compiler thread when it handles a compile request. Only
    /// takes effect while bootstrapping; the drain loop uses it to tell an
    /// empty queue that was already worked on from one that was never filled.
    pub fn set_bootstrap_request_handled(&self) {
        if self.is_bootstrapping() {
            self.bootstrap_request_handled.store(true, Ordering::Release);
        }
    }

    pub fn bootstrap_request_handled(&self) -> bool {
        self.bootstrap_request_handled.load(Ordering::Acquire)
    }

    // -- Compilation policy --

    /// Whether `method` must be compiled at the simple tier instead of by the
    /// external compiler.
    pub fn forced_simple_compilation(&self, method: &Method) -> bool {
        let ctx = GateContext {
            bootstrapping: self.is_bootstrapping(),
            hosted: self.config.is_hosted(),
        };
        gate::forced_simple_compilation(ctx, &*self.bridge, method)
    }

    // -- Worker lifecycle --

    /// See [`WorkerLifecycleManager::stopping_thread`].
    pub fn stopping_thread<'q>(
        &self,
        guard: QueueGuard<'q>,
        thread: &WorkerThread,
    ) -> Result<QueueGuard<'q>, BridgeError> {
        self.lifecycle.stopping_thread(guard, thread)
    }

    /// See [`WorkerLifecycleManager::on_empty_queue`].
    pub fn on_empty_queue<'q>(
        &self,
        guard: QueueGuard<'q>,
        thread: &WorkerThread,
    ) -> Result<(QueueGuard<'q>, IdleAction), BridgeError> {
        self.lifecycle.on_empty_queue(guard, thread)
    }

    // -- Counters --

    /// A method finished compiling. Also advances the global compilation ticks.
    pub fn inc_methods_compiled(&self) {
        self.methods_compiled.fetch_add(1, Ordering::Relaxed);
        self.global_compilation_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_global_compilation_ticks(&self) {
        self.global_compilation_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn methods_compiled(&self) -> u64 {
        self.methods_compiled.load(Ordering::Relaxed)
    }

    pub fn global_compilation_ticks(&self) -> u64 {
        self.global_compilation_ticks.load(Ordering::Relaxed)
    }

    /// Add one compilation's wall time to the compile timer.
    pub fn record_compilation(&self, elapsed: Duration) {
        self.compile_timer.add(elapsed);
    }

    /// Time a compilation; recorded when the guard drops.
    pub fn time_compilation(&self) -> TimerScope<'_> {
        self.compile_timer.start()
    }

    /// Installs of code compiled for the application.
    pub fn jit_installs(&self) -> &CodeInstallStats {
        &self.jit_installs
    }

    /// Installs made by the hosted compiler runtime.
    pub fn hosted_installs(&self) -> &CodeInstallStats {
        &self.hosted_installs
    }

    // -- Diagnostics --

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            state: self.state(),
            bootstrapping: self.is_bootstrapping(),
            methods_compiled: self.methods_compiled(),
            global_compilation_ticks: self.global_compilation_ticks(),
            jit_installs: self.jit_installs.snapshot(),
            hosted_installs: self.hosted_installs.snapshot(),
        }
    }

    /// Write the compile and install timers to `sink`.
    pub fn print_timers(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        writeln!(sink, "    External Compiler CompileBroker Time:")?;
        writeln!(
            sink,
            "       Compile:        {:7.3} s",
            self.compile_timer.seconds()
        )?;
        self.jit_installs.print_on(sink, "       Install Code:   ")?;
        writeln!(sink)?;
        writeln!(sink, "    External Compiler Hosted Time:")?;
        self.hosted_installs.print_on(sink, "       Install Code:   ")
    }
}

impl std::fmt::Debug for CompilerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerService")
            .field("state", &self.state())
            .field("bootstrapping", &self.is_bootstrapping())
            .field("methods_compiled", &self.methods_compiled())
            .finish_non_exhaustive()
    }
}

/// Clears the bootstrapping flag when dropped.
pub(crate) struct BootstrapWindow<'a> {
    bootstrapping: &'a AtomicBool,
}

impl Drop for BootstrapWindow<'_> {
    fn drop(&mut self) {
        self.bootstrapping.store(false, Ordering::Release);
    }
}

// Compile-time assertion: CompilerService must be Send + Sync.
const _: fn() = || {
    fn must_be_send_sync<T: Send + Sync>() {}
    must_be_send_sync::<CompilerService>();
};

//! In-process stand-ins for the external compiler runtime and compiler threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use crate::bridge::{ExternalRuntimeBridge, RuntimeHandle};
use crate::error::BridgeError;
use crate::lifecycle::IdleAction;
use crate::method::{Method, MethodKind, ModuleId, StaticMethodRegistry};
use crate::queue::{
    CompileBroker, CompileQueue, CompileReason, CompileTaskRequest, CompileTier, EntryPoint,
};
use crate::service::CompilerService;
use crate::worker::WorkerThread;

/// Module holding the external compiler's own code.
pub const COMPILER_MODULE: &str = "jdk.internal.vm.compiler";
/// Module of the simulated application.
pub const APP_MODULE: &str = "app";

/// How long a detached worker sleeps between checks for new work.
const DETACHED_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Code blob sizes reported for every simulated install.
const BLOB_SIZE: u64 = 1024;
const CODE_SIZE: u64 = 640;

/// Counts the calls the compiler service makes into the external runtime.
#[derive(Debug)]
pub struct SimulatedRuntime {
    handle: Option<RuntimeHandle>,
    excluded: Vec<ModuleId>,
    attaches: AtomicU64,
    detaches: AtomicU64,
    repacks: AtomicU64,
    bootstrap_notifications: AtomicU64,
}

impl SimulatedRuntime {
    /// A runtime that is already up, keeping the compiler's own module for itself.
    pub fn live() -> Self {
        Self {
            handle: Some(RuntimeHandle(1)),
            excluded: vec![ModuleId::new(COMPILER_MODULE)],
            attaches: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
            repacks: AtomicU64::new(0),
            bootstrap_notifications: AtomicU64::new(0),
        }
    }

    /// Connect `thread` to the runtime before it compiles.
    pub fn attach(&self, thread: &WorkerThread) {
        if thread.is_attached() {
            return;
        }
        thread.mark_attached();
        self.attaches.fetch_add(1, Ordering::Relaxed);
        debug!(thread = %thread, "attached to external runtime");
    }

    pub fn counters(&self) -> RuntimeCounters {
        RuntimeCounters {
            attaches: self.attaches.load(Ordering::Relaxed),
            detaches: self.detaches.load(Ordering::Relaxed),
            repacks: self.repacks.load(Ordering::Relaxed),
            bootstrap_notifications: self.bootstrap_notifications.load(Ordering::Relaxed),
        }
    }
}

impl ExternalRuntimeBridge for SimulatedRuntime {
    fn probe_live_instance(&self) -> Option<RuntimeHandle> {
        self.handle
    }

    fn excluded_modules(&self, _handle: &RuntimeHandle) -> Option<Vec<ModuleId>> {
        Some(self.excluded.clone())
    }

    fn detach(&self, thread: &WorkerThread, reason: &str) -> Result<(), BridgeError> {
        self.detaches.fetch_add(1, Ordering::Relaxed);
        trace!(thread = %thread, reason, "runtime detach");
        Ok(())
    }

    fn repack(&self, thread: &WorkerThread) -> Result<(), BridgeError> {
        self.repacks.fetch_add(1, Ordering::Relaxed);
        trace!(thread = %thread, "runtime repack");
        Ok(())
    }

    fn notify_bootstrap_finished(&self) -> Result<(), BridgeError> {
        self.bootstrap_notifications.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeCounters {
    pub attaches: u64,
    pub detaches: u64,
    pub repacks: u64,
    pub bootstrap_notifications: u64,
}

/// The root class as seen by the bootstrap: public methods plus natives and
/// initializers that are never seeded.
pub fn root_class() -> StaticMethodRegistry {
    let base = ModuleId::new("java.base");
    StaticMethodRegistry::new([
        Method::new("Object", "<init>", base.clone()).with_kind(MethodKind::ObjectInitializer),
        Method::new("Object", "<clinit>", base.clone())
            .with_kind(MethodKind::ClassInitializer)
            .static_method(),
        Method::new("Object", "registerNatives", base.clone())
            .native()
            .static_method(),
        Method::new("Object", "getClass", base.clone()).native(),
        Method::new("Object", "hashCode", base.clone()).native(),
        Method::new("Object", "equals", base.clone()),
        Method::new("Object", "clone", base.clone()).native(),
        Method::new("Object", "toString", base.clone()),
        Method::new("Object", "notify", base.clone()).native(),
        Method::new("Object", "notifyAll", base.clone()).native(),
        Method::new("Object", "wait", base.clone()),
        Method::new("Object", "finalize", base),
    ])
}

/// Queue `count` hot methods, alternating between application code and the
/// compiler's own code. Returns how many were accepted.
pub fn submit_workload(broker: &dyn CompileBroker, count: usize) -> usize {
    let app = ModuleId::new(APP_MODULE);
    let compiler = ModuleId::new(COMPILER_MODULE);
    (0..count)
        .map(|i| {
            let (holder, module) = if i % 2 == 0 {
                ("Main", app.clone())
            } else {
                ("GraphBuilder", compiler.clone())
            };
            CompileTaskRequest {
                method: Method::new(holder, format!("m{i}"), module).into(),
                entry: EntryPoint::Invocation,
                tier: CompileTier::TOP,
                hot_count: 1,
                reason: CompileReason::Tiered,
            }
        })
        .map(|task| broker.submit(task))
        .filter(|accepted| *accepted)
        .count()
}

/// What one worker did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub compiled: u64,
    pub forced_simple: u64,
    pub idle_detaches: u64,
    pub idle_repacks: u64,
}

/// Compiler thread loop: compile until the queue closes, idling out through
/// the service when there is nothing to do.
pub fn run_worker(
    service: &CompilerService,
    queue: &CompileQueue,
    thread: &WorkerThread,
    runtime: &SimulatedRuntime,
    compile_time: Duration,
) -> Result<WorkerSummary, BridgeError> {
    let mut summary = WorkerSummary::default();
    let mut guard = queue.lock();
    loop {
        if let Some(task) = guard.pop() {
            let queue = guard.unlock();
            compile(service, thread, runtime, &task, compile_time, &mut summary);
            guard = queue.lock();
            continue;
        }
        if guard.is_closed() {
            break;
        }

        let (relocked, action) = service.on_empty_queue(guard, thread)?;
        guard = relocked;
        match action {
            IdleAction::Detached => summary.idle_detaches += 1,
            IdleAction::Repacked => summary.idle_repacks += 1,
            IdleAction::None => {
                if guard.is_empty() && !guard.is_closed() {
                    guard = guard.wait_for_work(DETACHED_POLL_INTERVAL).0;
                }
            }
        }
    }

    drop(service.stopping_thread(guard, thread)?);
    debug!(thread = %thread, compiled = summary.compiled, "compiler thread stopped");
    Ok(summary)
}

fn compile(
    service: &CompilerService,
    thread: &WorkerThread,
    runtime: &SimulatedRuntime,
    task: &CompileTaskRequest,
    compile_time: Duration,
    summary: &mut WorkerSummary,
) {
    service.set_bootstrap_request_handled();

    if service.forced_simple_compilation(&task.method) {
        trace!(method = %task.method, "compiled at simple tier");
        summary.forced_simple += 1;
        service.inc_global_compilation_ticks();
        return;
    }

    if service.config().is_hosted() && !thread.is_attached() {
        runtime.attach(thread);
        // Re-entering the runtime installs its entry stub for this thread.
        service.hosted_installs().on_install(BLOB_SIZE / 4, CODE_SIZE / 4);
    }

    {
        let _compiling = service.time_compilation();
        std::thread::sleep(compile_time);
    }
    {
        let _installing = service.jit_installs().time_install();
        service.jit_installs().on_install(BLOB_SIZE, CODE_SIZE);
    }
    service.inc_methods_compiled();
    summary.compiled += 1;
    trace!(thread = %thread, method = %task.method, "compiled");
}

//! Shared test doubles for the compiler service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::bridge::{ExternalRuntimeBridge, RuntimeHandle};
use crate::config::CompilerConfig;
use crate::error::BridgeError;
use crate::flags::RuntimeFlags;
use crate::method::{Method, MethodKind, ModuleId, StaticMethodRegistry};
use crate::queue::{CompileBroker, CompileQueue, CompileTaskRequest, CompileTier};
use crate::service::{CompilationPolicy, CompilerService};
use crate::worker::WorkerThread;

/// Bridge that records every call and checks the queue lock is not held.
#[derive(Default)]
pub struct RecordingBridge {
    pub live: bool,
    pub excluded: Option<Vec<ModuleId>>,
    pub detaches: AtomicU64,
    pub repacks: AtomicU64,
    pub bootstrap_finished: AtomicU64,
    pub detach_reasons: Mutex<Vec<String>>,
    pub fail_detach: AtomicBool,
    pub fail_notify: AtomicBool,
    /// Calls made while the watched queue's lock was held by the caller.
    pub lock_violations: AtomicU64,
    watched: Mutex<Option<Arc<CompileQueue>>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_excluding(modules: &[&str]) -> Self {
        Self {
            live: true,
            excluded: Some(modules.iter().map(|m| ModuleId::new(*m)).collect()),
            ..Default::default()
        }
    }

    /// No live runtime, but an exclusion list that would match if there were one.
    pub fn dead_excluding(modules: &[&str]) -> Self {
        Self {
            live: false,
            ..Self::live_excluding(modules)
        }
    }

    pub fn watch(&self, queue: &Arc<CompileQueue>) {
        *self.watched.lock().unwrap() = Some(Arc::clone(queue));
    }

    fn check_lock(&self) {
        let watched = self.watched.lock().unwrap();
        if watched
            .as_ref()
            .is_some_and(|queue| queue.is_locked_by_current_thread())
        {
            self.lock_violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn detach_count(&self) -> u64 {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn repack_count(&self) -> u64 {
        self.repacks.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u64 {
        self.lock_violations.load(Ordering::SeqCst)
    }
}

impl ExternalRuntimeBridge for RecordingBridge {
    fn probe_live_instance(&self) -> Option<RuntimeHandle> {
        self.live.then_some(RuntimeHandle(7))
    }

    fn excluded_modules(&self, _handle: &RuntimeHandle) -> Option<Vec<ModuleId>> {
        self.excluded.clone()
    }

    fn detach(&self, _thread: &WorkerThread, reason: &str) -> Result<(), BridgeError> {
        self.check_lock();
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(BridgeError::communication("detach", "runtime unreachable"));
        }
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.detach_reasons.lock().unwrap().push(reason.to_string());
        Ok(())
    }

    fn repack(&self, _thread: &WorkerThread) -> Result<(), BridgeError> {
        self.check_lock();
        self.repacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_bootstrap_finished(&self) -> Result<(), BridgeError> {
        self.check_lock();
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(BridgeError::communication(
                "bootstrap finished",
                "runtime unreachable",
            ));
        }
        self.bootstrap_finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Broker that replays a scripted sequence of top-tier sizes.
///
/// Once the script runs out, the last value repeats (0 for an empty script).
#[derive(Default)]
pub struct ScriptedBroker {
    sizes: Mutex<VecDeque<usize>>,
    last: Mutex<usize>,
    pub polls: AtomicU64,
    pub submitted: Mutex<Vec<CompileTaskRequest>>,
}

impl ScriptedBroker {
    pub fn new(sizes: &[usize]) -> Self {
        Self {
            sizes: Mutex::new(sizes.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl CompileBroker for ScriptedBroker {
    fn submit(&self, task: CompileTaskRequest) -> bool {
        self.submitted.lock().unwrap().push(task);
        true
    }

    fn size(&self, tier: CompileTier) -> usize {
        assert_eq!(tier, CompileTier::TOP);
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.sizes.lock().unwrap().pop_front() {
            *last = next;
        }
        *last
    }
}

#[derive(Default)]
pub struct CountingPolicy {
    pub calls: AtomicU64,
}

impl CompilationPolicy for CountingPolicy {
    fn completed_vm_startup(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hosted-mode config with the startup grace period turned off.
pub fn hosted_config(idle_delay_millis: i64) -> CompilerConfig {
    CompilerConfig {
        use_native_library_compiler: true,
        idle_delay_millis,
        startup_grace_millis: 0,
        ..Default::default()
    }
}

pub fn make_service(config: CompilerConfig, bridge: Arc<RecordingBridge>) -> CompilerService {
    make_service_with_flags(config, bridge, Arc::new(RuntimeFlags::new()))
}

pub fn make_service_with_flags(
    config: CompilerConfig,
    bridge: Arc<RecordingBridge>,
    flags: Arc<RuntimeFlags>,
) -> CompilerService {
    CompilerService::unregistered(config, flags, bridge, Instant::now())
}

/// Root class methods: four bootstrap candidates and three that are skipped.
pub fn root_class() -> StaticMethodRegistry {
    let base = ModuleId::new("java.base");
    StaticMethodRegistry::new([
        Method::new("Object", "hashCode", base.clone()),
        Method::new("Object", "equals", base.clone()),
        Method::new("Object", "toString", base.clone()),
        Method::new("Object", "finalize", base.clone()),
        Method::new("Object", "clone", base.clone()).native(),
        Method::new("Object", "registerNatives", base.clone())
            .native()
            .static_method(),
        Method::new("Object", "<init>", base).with_kind(MethodKind::ObjectInitializer),
    ])
}

pub const ROOT_CLASS_CANDIDATES: usize = 4;

/// Compile loop run by test worker threads until `stop` is set.
pub fn run_test_worker(service: &CompilerService, queue: &CompileQueue, stop: &AtomicBool) {
    loop {
        let mut guard = queue.lock();
        match guard.pop() {
            Some(task) => {
                drop(guard);
                service.set_bootstrap_request_handled();
                {
                    let _timer = service.time_compilation();
                    std::thread::sleep(Duration::from_millis(2));
                }
                if !service.forced_simple_compilation(&task.method) {
                    service.jit_installs().on_install(512, 256);
                }
                service.inc_methods_compiled();
            }
            None => {
                drop(guard);
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

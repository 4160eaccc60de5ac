//! Idle-out of compiler threads in hosted mode.
//!
//! In hosted mode every compiler thread holds a connection to the external
//! runtime, and that connection pins memory in the runtime. When a thread
//! finds the queue empty for longer than the idle delay it gives the
//! connection up; when work shows up during the wait the thread only repacks
//! its runtime resources and keeps the connection.
//!
//! Detach and repack can shut down or call into the external runtime, which
//! takes runtime-level locks. Both are always made with the compile queue
//! lock released; the hooks take the caller's [`QueueGuard`], release it
//! around the call and hand a fresh guard back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bridge::ExternalRuntimeBridge;
use crate::config::CompilerConfig;
use crate::error::BridgeError;
use crate::queue::{CompileQueue, QueueGuard, WaitOutcome};
use crate::worker::WorkerThread;

const STOPPING_REASON: &str = "stopping idle compiler thread";
const IDLE_REASON: &str = "releasing idle compiler thread";

/// What [`WorkerLifecycleManager::on_empty_queue`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Idling is off, the thread is detached, or the process is still starting up.
    None,
    /// The idle delay elapsed and the thread was detached.
    Detached,
    /// Work arrived during the wait and the thread was repacked.
    Repacked,
}

/// Hooks the compiler thread scheduler calls around idle periods.
pub struct WorkerLifecycleManager {
    bridge: Arc<dyn ExternalRuntimeBridge>,
    hosted: bool,
    idle_delay: Option<Duration>,
    startup_grace: Duration,
    vm_start: Instant,
}

impl WorkerLifecycleManager {
    pub fn new(
        config: &CompilerConfig,
        bridge: Arc<dyn ExternalRuntimeBridge>,
        vm_start: Instant,
    ) -> Self {
        Self {
            bridge,
            hosted: config.is_hosted(),
            idle_delay: config.idle_delay(),
            startup_grace: config.startup_grace(),
            vm_start,
        }
    }

    /// A compiler thread is being stopped by the scheduler.
    ///
    /// In hosted mode the thread is detached from the external runtime. The
    /// queue lock is released for the detach and re-acquired afterwards.
    pub fn stopping_thread<'q>(
        &self,
        guard: QueueGuard<'q>,
        thread: &WorkerThread,
    ) -> Result<QueueGuard<'q>, BridgeError> {
        if !self.hosted || !thread.is_attached() {
            return Ok(guard);
        }
        let queue = guard.unlock();
        self.detach(queue, thread, STOPPING_REASON)?;
        Ok(queue.lock())
    }

    /// `thread` found the queue empty while holding `guard`.
    ///
    /// Waits up to the idle delay for new work with the lock held only while
    /// waiting, then detaches (no work) or repacks (work arrived) with the
    /// lock released. Returns the re-acquired guard. On error the lock is
    /// left released.
    pub fn on_empty_queue<'q>(
        &self,
        guard: QueueGuard<'q>,
        thread: &WorkerThread,
    ) -> Result<(QueueGuard<'q>, IdleAction), BridgeError> {
        if !self.hosted || !thread.is_attached() {
            return Ok((guard, IdleAction::None));
        }
        let Some(delay) = self.idle_delay else {
            return Ok((guard, IdleAction::None));
        };
        // Threads are not detached during the startup grace period.
        if self.vm_start.elapsed() < self.startup_grace {
            return Ok((guard, IdleAction::None));
        }

        let (guard, outcome) = guard.wait_for_work(delay);
        let queue = guard.unlock();
        let action = match outcome {
            WaitOutcome::TimedOut => {
                self.detach(queue, thread, IDLE_REASON)?;
                IdleAction::Detached
            }
            WaitOutcome::Notified => {
                self.repack(queue, thread)?;
                IdleAction::Repacked
            }
        };
        Ok((queue.lock(), action))
    }

    fn detach(
        &self,
        queue: &CompileQueue,
        thread: &WorkerThread,
        reason: &'static str,
    ) -> Result<(), BridgeError> {
        debug_assert!(
            !queue.is_locked_by_current_thread(),
            "compile queue lock held across detach"
        );
        if let Err(error) = self.bridge.detach(thread, reason) {
            warn!(thread = %thread, %error, "failed to detach compiler thread");
            return Err(error);
        }
        thread.mark_detached();
        info!(thread = %thread, reason, "detached compiler thread from external runtime");
        Ok(())
    }

    fn repack(&self, queue: &CompileQueue, thread: &WorkerThread) -> Result<(), BridgeError> {
        debug_assert!(
            !queue.is_locked_by_current_thread(),
            "compile queue lock held across repack"
        );
        if let Err(error) = self.bridge.repack(thread) {
            warn!(thread = %thread, %error, "failed to repack compiler thread");
            return Err(error);
        }
        thread.record_repack();
        debug!(thread = %thread, "repacked compiler thread");
        Ok(())
    }
}

impl std::fmt::Debug for WorkerLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycleManager")
            .field("hosted", &self.hosted)
            .field("idle_delay", &self.idle_delay)
            .field("startup_grace", &self.startup_grace)
            .finish_non_exhaustive()
    }
}

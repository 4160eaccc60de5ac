//! Compile tasks and the method compile queue.
//!
//! The bridge only needs two things from the queue on the submission side,
//! expressed by [`CompileBroker`]: submit a task, and count the tasks waiting
//! at a tier. Worker threads additionally take the queue lock through a
//! [`QueueGuard`], pop tasks from it, and wait on its new-work condition.
//!
//! The queue tracks which thread currently holds its lock so that calls that
//! must never run under the lock (detach, repack, bootstrap notification) can
//! check the precondition.

use std::cell::Cell;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::flags::RuntimeFlags;
use crate::method::MethodRef;

/// Compilation tiers, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompileTier {
    /// Interpreter.
    None,
    /// Fast compiler without profiling.
    Simple,
    /// Fast compiler with invocation and backedge counters.
    LimitedProfile,
    /// Fast compiler with full profiling.
    FullProfile,
    /// Optimizing compiler.
    FullOptimization,
}

impl CompileTier {
    pub const TOP: CompileTier = CompileTier::FullOptimization;
}

/// Where compiled code is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Normal method invocation.
    Invocation,
    /// On-stack replacement at the given bytecode index.
    Osr(u32),
}

/// Why a compilation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileReason {
    /// Invocation or backedge counter overflow.
    Tiered,
    /// Explicit request from the runtime or a whitebox API.
    MustBeCompiled,
    /// Seed task queued while bootstrapping the external compiler.
    Bootstrap,
}

/// A request to compile one method.
#[derive(Debug, Clone)]
pub struct CompileTaskRequest {
    pub method: MethodRef,
    pub entry: EntryPoint,
    pub tier: CompileTier,
    /// Synthetic hotness used for queue ordering.
    pub hot_count: u32,
    pub reason: CompileReason,
}

/// Submission side of the compile queue.
pub trait CompileBroker: Send + Sync {
    /// Queue a task. Returns `false` when the request was dropped.
    fn submit(&self, task: CompileTaskRequest) -> bool;

    /// Number of tasks waiting at `tier`.
    fn size(&self, tier: CompileTier) -> usize;
}

/// Outcome of waiting on the queue's new-work condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full timeout elapsed without any submission.
    TimedOut,
    /// New work was submitted (or the queue was closed) while waiting.
    Notified,
}

#[derive(Debug, Default)]
pub struct QueueState {
    tasks: VecDeque<CompileTaskRequest>,
    /// Total accepted submissions; bumps on every new task.
    submitted: u64,
    closed: bool,
}

impl QueueState {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Method compile queue shared by the bootstrap thread and the compiler workers.
#[derive(Debug)]
pub struct CompileQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    /// Token of the thread currently holding `state`, 0 when unlocked.
    owner: AtomicU64,
    flags: Arc<RuntimeFlags>,
}

impl CompileQueue {
    pub fn new(flags: Arc<RuntimeFlags>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            owner: AtomicU64::new(0),
            flags,
        }
    }

    /// Take the queue lock.
    pub fn lock(&self) -> QueueGuard<'_> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        QueueGuard {
            mark: OwnerMark::acquire(self),
            state,
            queue: self,
        }
    }

    /// True when the calling thread holds the queue lock.
    pub fn is_locked_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    /// Stop accepting work and wake every waiter.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.state.closed = true;
        drop(guard);
        self.not_empty.notify_all();
    }

    /// Total number of queued tasks across all tiers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompileBroker for CompileQueue {
    fn submit(&self, task: CompileTaskRequest) -> bool {
        if self.flags.compile_the_world() {
            tracing::debug!(method = %task.method, "compile-the-world active, dropping request");
            return false;
        }
        let mut guard = self.lock();
        if guard.state.closed {
            return false;
        }
        guard.state.tasks.push_back(task);
        guard.state.submitted = guard.state.submitted.wrapping_add(1);
        drop(guard);
        self.not_empty.notify_all();
        true
    }

    fn size(&self, tier: CompileTier) -> usize {
        self.lock()
            .state
            .tasks
            .iter()
            .filter(|task| task.tier == tier)
            .count()
    }
}

/// Scoped holder of the queue lock.
///
/// Dropping the guard (or calling [`QueueGuard::unlock`]) releases the lock.
pub struct QueueGuard<'a> {
    // Field order matters: the owner mark is cleared before the mutex unlocks.
    mark: OwnerMark<'a>,
    state: MutexGuard<'a, QueueState>,
    queue: &'a CompileQueue,
}

impl<'a> QueueGuard<'a> {
    /// The queue this guard locks; use it to re-acquire after [`unlock`](Self::unlock).
    pub fn queue(&self) -> &'a CompileQueue {
        self.queue
    }

    /// Remove the oldest task.
    pub fn pop(&mut self) -> Option<CompileTaskRequest> {
        self.state.tasks.pop_front()
    }

    /// Release the lock, handing back the queue so the caller can re-lock it later.
    pub fn unlock(self) -> &'a CompileQueue {
        self.queue
    }

    /// Wait up to `timeout` for a submission, holding the lock only while not waiting.
    pub fn wait_for_work(self, timeout: Duration) -> (QueueGuard<'a>, WaitOutcome) {
        let QueueGuard { mark, state, queue } = self;
        let seen = state.submitted;
        drop(mark);
        let (state, result) = queue
            .not_empty
            .wait_timeout_while(state, timeout, |s| s.submitted == seen && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = if result.timed_out() {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Notified
        };
        let guard = QueueGuard {
            mark: OwnerMark::acquire(queue),
            state,
            queue,
        };
        (guard, outcome)
    }
}

impl Deref for QueueGuard<'_> {
    type Target = QueueState;

    fn deref(&self) -> &QueueState {
        &self.state
    }
}

impl std::fmt::Debug for QueueGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGuard")
            .field("queued", &self.state.len())
            .finish()
    }
}

struct OwnerMark<'a> {
    owner: &'a AtomicU64,
}

impl<'a> OwnerMark<'a> {
    fn acquire(queue: &'a CompileQueue) -> Self {
        queue.owner.store(current_thread_token(), Ordering::Release);
        Self {
            owner: &queue.owner,
        }
    }
}

impl Drop for OwnerMark<'_> {
    fn drop(&mut self) {
        self.owner.store(0, Ordering::Release);
    }
}

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Method, ModuleId};
    use std::time::Instant;

    fn task(tier: CompileTier) -> CompileTaskRequest {
        CompileTaskRequest {
            method: Arc::new(Method::new("Object", "toString", ModuleId::new("java.base"))),
            entry: EntryPoint::Invocation,
            tier,
            hot_count: 1,
            reason: CompileReason::Tiered,
        }
    }

    #[test]
    fn test_size_counts_per_tier() {
        let queue = CompileQueue::new(Arc::new(RuntimeFlags::new()));
        assert!(queue.submit(task(CompileTier::TOP)));
        assert!(queue.submit(task(CompileTier::TOP)));
        assert!(queue.submit(task(CompileTier::Simple)));

        assert_eq!(queue.size(CompileTier::TOP), 2);
        assert_eq!(queue.size(CompileTier::Simple), 1);
        assert_eq!(queue.len(), 3);

        let mut guard = queue.lock();
        assert_eq!(guard.pop().map(|t| t.tier), Some(CompileTier::TOP));
        drop(guard);
        assert_eq!(queue.size(CompileTier::TOP), 1);
    }

    #[test]
    fn test_compile_the_world_drops_requests() {
        let flags = Arc::new(RuntimeFlags::new());
        flags.compile_the_world.store(true, Ordering::Release);
        let queue = CompileQueue::new(flags);

        assert!(!queue.submit(task(CompileTier::TOP)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_lock_owner_tracking() {
        let queue = CompileQueue::new(Arc::new(RuntimeFlags::new()));
        assert!(!queue.is_locked_by_current_thread());

        let guard = queue.lock();
        assert!(queue.is_locked_by_current_thread());
        std::thread::scope(|s| {
            s.spawn(|| assert!(!queue.is_locked_by_current_thread()));
        });

        let queue = guard.unlock();
        assert!(!queue.is_locked_by_current_thread());
    }

    #[test]
    fn test_wait_times_out_without_work() {
        let queue = CompileQueue::new(Arc::new(RuntimeFlags::new()));
        let start = Instant::now();
        let (guard, outcome) = queue.lock().wait_for_work(Duration::from_millis(30));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(queue.is_locked_by_current_thread());
        drop(guard);
    }

    #[test]
    fn test_wait_wakes_on_submission() {
        let queue = CompileQueue::new(Arc::new(RuntimeFlags::new()));
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(10));
                queue.submit(task(CompileTier::TOP));
            });
            let (guard, outcome) = queue.lock().wait_for_work(Duration::from_secs(5));
            assert_eq!(outcome, WaitOutcome::Notified);
            assert_eq!(guard.len(), 1);
        });
    }

    #[test]
    fn test_close_rejects_and_wakes() {
        let queue = CompileQueue::new(Arc::new(RuntimeFlags::new()));
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(10));
                queue.close();
            });
            let (guard, outcome) = queue.lock().wait_for_work(Duration::from_secs(5));
            assert_eq!(outcome, WaitOutcome::Notified);
            assert!(guard.is_closed());
        });
        assert!(!queue.submit(task(CompileTier::TOP)));
    }
}

//! Compiler worker threads and their connection to the external runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Whether a worker currently holds a connection to the external runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Attached,
    Detached,
}

/// A compiler worker thread as tracked by the scheduler.
///
/// The scheduler owns the worker; the bridge only flips its connection state
/// when it detaches the worker, and counts repacks for diagnostics.
#[derive(Debug)]
pub struct WorkerThread {
    id: usize,
    name: String,
    attached: AtomicBool,
    repacks: AtomicU64,
}

impl WorkerThread {
    /// A new worker, initially attached.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            name: format!("jit-compiler-{id}"),
            attached: AtomicBool::new(true),
            repacks: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> ConnectionState {
        if self.attached.load(Ordering::Acquire) {
            ConnectionState::Attached
        } else {
            ConnectionState::Detached
        }
    }

    pub fn is_attached(&self) -> bool {
        self.connection() == ConnectionState::Attached
    }

    /// Re-attach after a detach. Done by the scheduler before the worker compiles again.
    pub fn mark_attached(&self) {
        self.attached.store(true, Ordering::Release);
    }

    pub(crate) fn mark_detached(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub(crate) fn record_repack(&self) {
        self.repacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times this worker's runtime resources were repacked.
    pub fn repack_count(&self) -> u64 {
        self.repacks.load(Ordering::Relaxed)
    }
}

impl fmt::Display for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

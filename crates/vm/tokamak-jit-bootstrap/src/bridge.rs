//! Interface to the external compiler's runtime.
//!
//! The external compiler lives in its own runtime (a separate heap, or a
//! precompiled shared library in hosted mode). Every call through this trait
//! may cross into that runtime and take runtime-level locks, so none of them
//! may be made while the compile queue lock is held.

use crate::error::BridgeError;
use crate::method::ModuleId;
use crate::worker::WorkerThread;

/// Handle to a live external runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeHandle(pub u64);

/// Trait for the external compiler runtime.
///
/// The bridge crate defines this interface; the embedding runtime provides
/// the implementation.
pub trait ExternalRuntimeBridge: Send + Sync {
    /// The live runtime instance, if one has been created.
    fn probe_live_instance(&self) -> Option<RuntimeHandle>;

    /// Modules whose methods must not be compiled by the external compiler.
    ///
    /// `None` when the runtime has no exclusion list configured.
    fn excluded_modules(&self, handle: &RuntimeHandle) -> Option<Vec<ModuleId>>;

    /// Release `thread`'s connection to the runtime.
    ///
    /// Must not be called while the compile queue lock is held.
    fn detach(&self, thread: &WorkerThread, reason: &str) -> Result<(), BridgeError>;

    /// Reclaim `thread`'s runtime resources without detaching it.
    ///
    /// Must not be called while the compile queue lock is held.
    fn repack(&self, thread: &WorkerThread) -> Result<(), BridgeError>;

    /// Tell the runtime that bootstrap compilation has drained.
    ///
    /// Must not be called while the compile queue lock is held.
    fn notify_bootstrap_finished(&self) -> Result<(), BridgeError>;
}

//! Tokamak JIT bootstrap: lifecycle bridge between the runtime's compile
//! pipeline and a pluggable external compiler.
//!
//! The external compiler is scheduled by the runtime's compile broker like
//! any other compiler, but it is itself managed code (or, in hosted mode, a
//! precompiled library with its own runtime). This crate covers the parts of
//! that arrangement that need care:
//!
//! ```text
//! CompilerService (one per process)
//!   ├── bootstrap  : seed the queue with the compiler's own methods, wait for drain
//!   ├── gate       : keep the compiler from compiling itself with itself
//!   ├── lifecycle  : detach idle compiler threads from the external runtime
//!   └── stats      : lock-free install counters and timers
//! ```
//!
//! The compile queue, method metadata and the external runtime are
//! collaborators: this crate defines the interfaces ([`queue::CompileBroker`],
//! [`method::MethodRegistry`], [`bridge::ExternalRuntimeBridge`]) and ships
//! in-memory implementations used by the tests and the `jit-bootstrap` demo.
//!
//! # Feature Flags
//!
//! - `cli`: builds the `jit-bootstrap` simulator binary.
//! - `test-utils`: exposes [`CompilerService::unregistered`] and
//!   [`CompilerService::reset_instance_for_testing`].

pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod error;
pub mod flags;
pub mod gate;
pub mod lifecycle;
pub mod method;
pub mod queue;
pub mod service;
pub mod stats;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;

// Re-exports for convenience
pub use bootstrap::{BootstrapReport, BootstrapSequencer};
pub use bridge::{ExternalRuntimeBridge, RuntimeHandle};
pub use config::{CompilerConfig, ExecutionMode};
pub use error::{BridgeError, ConfigError};
pub use service::{CompilationPolicy, CompilerService, CompilerState};
pub use stats::CodeInstallStats;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests;

//! Error types for the compiler bootstrap subsystem.

use std::path::PathBuf;

/// Errors surfaced by the compiler service and its lifecycle hooks.
///
/// Configuration gates that are not met are never errors: the affected
/// operation is simply a no-op.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A `CompilerService` already exists for this process.
    #[error("compiler service already created for this process")]
    AlreadyCreated,

    /// `bootstrap()` was entered while another bootstrap was still running.
    #[error("bootstrap already in progress")]
    BootstrapInProgress,

    /// The bootstrap drain loop was stopped through its cancellation token.
    #[error("bootstrap cancelled after {elapsed_ms}ms ({pending} tasks still queued)")]
    BootstrapCancelled { elapsed_ms: u64, pending: usize },

    /// A call into the external compiler runtime failed.
    #[error("external runtime {operation} failed: {reason}")]
    Communication {
        operation: &'static str,
        reason: String,
    },

    /// Writing to the diagnostic sink failed.
    #[error("diagnostic output failed: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Shorthand for a cross-runtime failure of `operation`.
    pub fn communication(operation: &'static str, reason: impl Into<String>) -> Self {
        BridgeError::Communication {
            operation,
            reason: reason.into(),
        }
    }
}

/// Errors produced while loading or validating a [`CompilerConfig`](crate::config::CompilerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

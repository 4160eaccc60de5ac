//! TOML-compatible configuration for the compiler bootstrap subsystem.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! use_compiler = true
//! external_compiler_enabled = true
//! use_external_compiler_as_default = true
//! use_native_library_compiler = true
//! execution_mode = "mixed"
//! idle_delay_millis = 1000
//! print_bootstrap_progress = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Uptime after which idle compiler threads may be detached, and the default idle delay.
pub const DEFAULT_COMPILER_IDLE_DELAY: u64 = 1000;

/// How the runtime executes code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Interpreter plus compiled code.
    #[default]
    Mixed,
    /// Interpreter only; nothing is ever compiled.
    Interpreted,
    /// Compile everything before it runs.
    Compiled,
}

/// Configuration of the external compiler bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Master switch for dynamic compilation.
    pub use_compiler: bool,
    /// The external compiler interface is available.
    pub external_compiler_enabled: bool,
    /// The external compiler is the default top-tier compiler.
    pub use_external_compiler_as_default: bool,
    /// The external compiler is a precompiled shared library (hosted mode).
    pub use_native_library_compiler: bool,
    /// Runtime execution mode.
    pub execution_mode: ExecutionMode,
    /// Idle time in milliseconds after which a hosted-mode compiler thread is
    /// detached from the external runtime. Zero or negative disables idling.
    pub idle_delay_millis: i64,
    /// Print progress dots and a summary line while bootstrapping.
    pub print_bootstrap_progress: bool,
    /// No compiler thread is detached before the process has been up this long.
    pub startup_grace_millis: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            use_compiler: true,
            external_compiler_enabled: true,
            use_external_compiler_as_default: true,
            use_native_library_compiler: false,
            execution_mode: ExecutionMode::Mixed,
            idle_delay_millis: 1000,
            print_bootstrap_progress: false,
            startup_grace_millis: DEFAULT_COMPILER_IDLE_DELAY,
        }
    }
}

impl CompilerConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject combinations the runtime cannot start with.
    ///
    /// Gates that merely switch the external compiler off are not errors;
    /// `CompilerService::initialize` treats them as a no-op.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_native_library_compiler && !self.external_compiler_enabled {
            return Err(ConfigError::Invalid(
                "use_native_library_compiler requires external_compiler_enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// True when the external compiler runs as a precompiled library.
    pub fn is_hosted(&self) -> bool {
        self.use_native_library_compiler
    }

    /// The idle delay, or `None` when idling out is disabled.
    pub fn idle_delay(&self) -> Option<Duration> {
        u64::try_from(self.idle_delay_millis)
            .ok()
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_millis)
    }
}

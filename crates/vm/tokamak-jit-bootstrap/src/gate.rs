//! Decides whether a method must be compiled at the simple tier.
//!
//! When the external compiler runs on the managed heap, its own methods are
//! ordinary application methods. Compiling them with the external compiler
//! itself makes every compilation slower until the compiler has compiled
//! itself, so methods from the modules the runtime excludes are routed to the
//! simple tier instead. Every lookup failure falls back to normal compilation.

use crate::bridge::ExternalRuntimeBridge;
use crate::method::Method;

/// Inputs to [`forced_simple_compilation`] that come from the compiler service.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    /// Bootstrap is running.
    pub bootstrapping: bool,
    /// The external compiler is a precompiled library (hosted mode).
    pub hosted: bool,
}

/// Whether `method` must be forced to the simple compilation tier.
///
/// Side-effect free; safe to call from any thread on the submission path.
pub fn forced_simple_compilation(
    ctx: GateContext,
    bridge: &dyn ExternalRuntimeBridge,
    method: &Method,
) -> bool {
    // The bootstrap exists to compile the compiler's own methods.
    if ctx.bootstrapping {
        return false;
    }
    // A precompiled compiler is never compiled by this runtime.
    if ctx.hosted {
        return false;
    }
    let Some(handle) = bridge.probe_live_instance() else {
        return false;
    };
    let Some(excluded) = bridge.excluded_modules(&handle) else {
        return false;
    };
    let module = method.holder_module();
    excluded.iter().any(|candidate| candidate == module)
}

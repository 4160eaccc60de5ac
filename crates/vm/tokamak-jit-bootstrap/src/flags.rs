//! Mutable runtime flags and the scoped override used to change them.

use std::sync::atomic::{AtomicBool, Ordering};

/// Debug and stress flags that can flip while the runtime is running.
#[derive(Debug, Default)]
pub struct RuntimeFlags {
    /// Stress mode that compiles every loaded class eagerly. While set, the
    /// compile queue ignores ordinary compilation requests.
    pub compile_the_world: AtomicBool,
}

impl RuntimeFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_the_world(&self) -> bool {
        self.compile_the_world.load(Ordering::Acquire)
    }
}

/// Sets a flag for the lifetime of the guard and restores the previous value
/// on drop, including on early returns and unwinding.
#[derive(Debug)]
pub struct FlagSetting<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> FlagSetting<'a> {
    pub fn new(flag: &'a AtomicBool, value: bool) -> Self {
        let previous = flag.swap(value, Ordering::AcqRel);
        Self { flag, previous }
    }
}

impl Drop for FlagSetting<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

//! Lock-free statistics for installed code.
//!
//! All counters are independent `AtomicU64`s updated with `Relaxed`
//! ordering. Readers get each counter exactly, but a line printed while
//! installs are in flight may mix values from before and after an install.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Accumulated wall time across many timed regions.
#[derive(Debug, Default)]
pub struct ElapsedTimer {
    nanos: AtomicU64,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Time a region; the elapsed time is added when the returned guard drops.
    pub fn start(&self) -> TimerScope<'_> {
        TimerScope {
            timer: self,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

/// Adds the time since its creation to an [`ElapsedTimer`] on drop.
#[derive(Debug)]
pub struct TimerScope<'a> {
    timer: &'a ElapsedTimer,
    started: Instant,
}

impl Drop for TimerScope<'_> {
    fn drop(&mut self) {
        self.timer.add(self.started.elapsed());
    }
}

/// Counters for one install origin.
#[derive(Debug, Default)]
pub struct CodeInstallStats {
    count: AtomicU64,
    total_blob_size: AtomicU64,
    code_size: AtomicU64,
    timer: ElapsedTimer,
}

impl CodeInstallStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one installed code blob.
    pub fn on_install(&self, blob_size: u64, code_size: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_blob_size.fetch_add(blob_size, Ordering::Relaxed);
        self.code_size.fetch_add(code_size, Ordering::Relaxed);
    }

    /// Time an install; the elapsed time is added to this origin's timer.
    pub fn time_install(&self) -> TimerScope<'_> {
        self.timer.start()
    }

    pub fn timer(&self) -> &ElapsedTimer {
        &self.timer
    }

    /// Read all counters. Not a consistent snapshot across fields.
    pub fn snapshot(&self) -> InstallSnapshot {
        InstallSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_blob_size: self.total_blob_size.load(Ordering::Relaxed),
            code_size: self.code_size.load(Ordering::Relaxed),
            elapsed: self.timer.elapsed(),
        }
    }

    /// Write one diagnostic line, starting with `prefix`.
    pub fn print_on(&self, sink: &mut dyn Write, prefix: &str) -> std::io::Result<()> {
        writeln!(sink, "{prefix}{}", self.snapshot())
    }
}

/// Plain values read from a [`CodeInstallStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallSnapshot {
    pub count: u64,
    pub total_blob_size: u64,
    pub code_size: u64,
    pub elapsed: Duration,
}

impl std::fmt::Display for InstallSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:7.3} s (installs: {}, CodeBlob total size: {}, CodeBlob code size: {})",
            self.elapsed.as_secs_f64(),
            self.count,
            self.total_blob_size,
            self.code_size
        )
    }
}

// Compile-time assertion: CodeInstallStats must be Send + Sync.
const _: fn() = || {
    fn must_be_send_sync<T: Send + Sync>() {}
    must_be_send_sync::<CodeInstallStats>();
};

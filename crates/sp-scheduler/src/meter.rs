//! Concurrency signal feeding the booster's adaptive sizing.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of the measured concurrency signal the booster retunes from.
///
/// Injectable so tests (and embedders with their own notion of load) can
/// drive the adaptive sizing directly.
pub trait ConcurrencySource: Send + Sync + 'static {
    fn measured_concurrency(&self) -> usize;
}

/// Default signal: tracks the number of concurrently active worker threads
/// across a context's pools and reports the peak observed since the
/// previous reading, decaying to the current level.
#[derive(Debug, Default)]
pub struct ActiveThreadMeter {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveThreadMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_started(&self) {
        let now = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    pub(crate) fn task_finished(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

impl ConcurrencySource for ActiveThreadMeter {
    fn measured_concurrency(&self) -> usize {
        let current = self.current.load(Ordering::Relaxed);
        self.peak.swap(current, Ordering::Relaxed).max(current)
    }
}

//! Live count of threads inside a scheduler's worker pool.

use {
    crate::observer::SchedulerObserver,
    log::warn,
    std::sync::atomic::{AtomicUsize, Ordering},
};

/// Counts entry events minus exit events.
///
/// The value is a diagnostic snapshot: nothing orders one thread's exit against
/// another thread's entry beyond the atomicity of each update.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    num_threads: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_concurrency(&self) -> usize {
        self.num_threads.load(Ordering::Relaxed)
    }
}

impl SchedulerObserver for ConcurrencyTracker {
    fn on_scheduler_entry(&self, _slot: Option<usize>) {
        self.num_threads.fetch_add(1, Ordering::Relaxed);
    }

    fn on_scheduler_exit(&self, slot: Option<usize>) {
        // never drop below zero, even if an exit arrives without its entry
        if self
            .num_threads
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            warn!("Scheduler exit without matching entry (slot {slot:?}), ignoring");
        }
    }
}

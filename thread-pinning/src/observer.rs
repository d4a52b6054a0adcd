//! Callbacks a host scheduler invokes as worker threads join and leave its pool.

use std::sync::Arc;

/// Receives worker-pool membership events.
///
/// Both callbacks run on the worker thread itself. `slot` is the scheduler's
/// own index for that worker when it has one (rayon's thread index, for example).
pub trait SchedulerObserver: Send + Sync {
    fn on_scheduler_entry(&self, slot: Option<usize>);

    fn on_scheduler_exit(&self, slot: Option<usize>);
}

/// Fans each event out to every registered observer, in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn SchedulerObserver>>,
}

impl ObserverSet {
    pub fn push(&mut self, observer: Arc<dyn SchedulerObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SchedulerObserver for ObserverSet {
    fn on_scheduler_entry(&self, slot: Option<usize>) {
        for observer in &self.observers {
            observer.on_scheduler_entry(slot);
        }
    }

    fn on_scheduler_exit(&self, slot: Option<usize>) {
        for observer in &self.observers {
            observer.on_scheduler_exit(slot);
        }
    }
}

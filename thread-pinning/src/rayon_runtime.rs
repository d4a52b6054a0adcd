use {
    crate::{
        config::RayonConfig,
        error::ThreadingError,
        observer::{ObserverSet, SchedulerObserver},
        pinning::PinningObserver,
        tracker::ConcurrencyTracker,
    },
    log::debug,
    std::{ops::Deref, sync::Arc},
};

/// Rayon pools use the worker index as thread name suffix, keep the total
/// within what Linux allows for a thread name.
pub const MAX_THREAD_NAME_CHARS: usize = 12;

#[derive(Debug)]
pub struct RayonRuntimeInner {
    pub rayon_pool: rayon::ThreadPool,
    pub config: RayonConfig,
    pub tracker: Arc<ConcurrencyTracker>,
}

impl Deref for RayonRuntimeInner {
    type Target = rayon::ThreadPool;

    fn deref(&self) -> &Self::Target {
        &self.rayon_pool
    }
}

/// Rayon thread pool whose workers report to scheduler observers.
///
/// Every worker notifies the observers from rayon's start and exit handlers,
/// passing its rayon thread index as the slot id. A [`ConcurrencyTracker`] is
/// always attached.
#[derive(Debug, Clone)]
pub struct RayonRuntime {
    inner: Arc<RayonRuntimeInner>,
}

impl Deref for RayonRuntime {
    type Target = RayonRuntimeInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl RayonRuntime {
    /// Builds the pool, pinning workers when the config asks for a striped core allocation.
    pub fn new(name: String, config: RayonConfig) -> Result<Self, ThreadingError> {
        let mut observers = ObserverSet::default();
        if let Some(pinning) = config.core_allocation.pinning() {
            observers.push(Arc::new(PinningObserver::new(pinning)?));
        }
        Self::with_observers(name, config, observers)
    }

    /// Builds the pool with a caller-supplied set of observers. The config's
    /// core allocation is not consulted.
    pub fn with_observers(
        name: String,
        config: RayonConfig,
        mut observers: ObserverSet,
    ) -> Result<Self, ThreadingError> {
        debug_assert!(
            name.len() < MAX_THREAD_NAME_CHARS,
            "Thread name too long"
        );
        let tracker = Arc::new(ConcurrencyTracker::new());
        observers.push(tracker.clone());
        let observers = Arc::new(observers);

        let (on_entry, on_exit) = (observers.clone(), observers);
        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .stack_size(config.stack_size_bytes)
            .thread_name(move |i| format!("{name}{i:02}"))
            .start_handler(move |idx| on_entry.on_scheduler_entry(Some(idx)))
            .exit_handler(move |idx| on_exit.on_scheduler_exit(Some(idx)))
            .build()?;
        debug!(
            "Started rayon pool with {} workers",
            rayon_pool.current_num_threads()
        );

        Ok(Self {
            inner: Arc::new(RayonRuntimeInner {
                rayon_pool,
                config,
                tracker,
            }),
        })
    }

    /// Number of workers currently inside the pool.
    pub fn current_concurrency(&self) -> usize {
        self.tracker.current_concurrency()
    }
}

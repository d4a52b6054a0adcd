//! Pins worker threads to single CPUs as they enter a scheduler.
//!
//! The process affinity mask is captured once, when the pinner is built. Each
//! thread entering the scheduler then receives a logical index, which the
//! striping rule turns into a position within that mask, and the thread is
//! restricted to the CPU found at that position. Pinning is never undone.

use {
    crate::{
        config::PinningConfig,
        cpu_mask::CpuMask,
        error::ThreadingError,
        observer::SchedulerObserver,
        platform::{AffinityPlatform, OsAffinity},
        striping::stripe_position,
    },
    log::{debug, error, warn},
    std::{
        cell::Cell,
        sync::atomic::{AtomicUsize, Ordering},
    },
};

static NEXT_PINNER_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// `(pinner id, logical index)` from the last pinner this thread entered.
    static THREAD_INDEX: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Scheduler observer that applies striped CPU affinity on thread entry.
///
/// If the affinity mask cannot be read when the pinner is built, a warning is
/// logged and every later entry event is ignored. Once the mask has been read,
/// failing to apply it is fatal: [`on_scheduler_entry`](SchedulerObserver::on_scheduler_entry)
/// terminates the process. Use [`try_pin_current_thread`](Self::try_pin_current_thread)
/// to handle that error instead.
///
/// The logical index comes from a counter shared by all threads of this pinner,
/// handed out the first time each thread enters. Builds with the
/// `scheduler-slot` feature use the scheduler's slot id instead. A thread
/// remembers only the index from the last pinner it entered, so entering a
/// different pinner in between hands it a fresh index on return.
#[derive(Debug)]
pub struct PinningObserver<P: AffinityPlatform = OsAffinity> {
    id: usize,
    platform: P,
    mask: Option<CpuMask>,
    pinning_step: usize,
    index_offset: usize,
    thread_index: AtomicUsize,
}

impl PinningObserver<OsAffinity> {
    pub fn new(config: &PinningConfig) -> Result<Self, ThreadingError> {
        Self::with_platform(config, OsAffinity)
    }
}

impl<P: AffinityPlatform> PinningObserver<P> {
    pub fn with_platform(config: &PinningConfig, platform: P) -> Result<Self, ThreadingError> {
        if config.pinning_step == 0 {
            return Err(ThreadingError::InvalidPinningStep);
        }

        let mask = if cfg!(feature = "affinity") {
            Self::capture_mask(&platform)
        } else {
            debug!("Built without the affinity feature, threads will not be pinned");
            None
        };

        Ok(Self {
            id: NEXT_PINNER_ID.fetch_add(1, Ordering::Relaxed),
            platform,
            mask,
            pinning_step: config.pinning_step,
            index_offset: config.index_offset,
            thread_index: AtomicUsize::new(0),
        })
    }

    fn capture_mask(platform: &P) -> Option<CpuMask> {
        match platform.capture_process_affinity_mask() {
            Ok(mask) if !mask.is_empty() => {
                debug!("Captured process affinity mask: {mask}");
                Some(mask)
            }
            Ok(_) => {
                warn!("Process affinity mask is empty. Thread affinitization is disabled.");
                None
            }
            Err(err) => {
                warn!(
                    "Failed to obtain process affinity mask: {err}. Thread affinitization is \
                     disabled."
                );
                None
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of CPUs threads are striped over, 0 when pinning is disabled.
    pub fn num_cpus(&self) -> usize {
        self.mask.as_ref().map_or(0, CpuMask::len)
    }

    pub fn pinning_step(&self) -> usize {
        self.pinning_step
    }

    /// The mask captured at construction, if any.
    pub fn mask(&self) -> Option<&CpuMask> {
        self.mask.as_ref()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// CPU ID the thread with logical index `thread_index` is pinned to.
    ///
    /// `None` when pinning is disabled.
    pub fn target_cpu(&self, thread_index: usize) -> Option<usize> {
        let mask = self.mask.as_ref()?;
        let num_cpus = mask.len();
        let thr_idx = thread_index.wrapping_add(self.index_offset) % num_cpus;
        let cpu_pos = stripe_position(thr_idx, num_cpus, self.pinning_step)?;
        mask.nth_cpu(cpu_pos)
    }

    #[cfg(not(feature = "scheduler-slot"))]
    fn logical_thread_index(&self, _slot: Option<usize>) -> Option<usize> {
        let index = self.current_thread_index().unwrap_or_else(|| {
            let index = self.thread_index.fetch_add(1, Ordering::Relaxed);
            THREAD_INDEX.set(Some((self.id, index)));
            index
        });
        Some(index)
    }

    #[cfg(feature = "scheduler-slot")]
    fn logical_thread_index(&self, slot: Option<usize>) -> Option<usize> {
        if let Some(slot) = slot {
            THREAD_INDEX.set(Some((self.id, slot)));
        }
        slot
    }

    /// Logical index the calling thread received from this pinner, if this
    /// pinner is the last one it entered.
    pub fn current_thread_index(&self) -> Option<usize> {
        match THREAD_INDEX.get() {
            Some((id, index)) if id == self.id => Some(index),
            _ => None,
        }
    }

    /// Pins the calling thread and returns the CPU it now runs on.
    ///
    /// Returns `Ok(None)` without touching the OS when pinning is disabled, or
    /// when a `scheduler-slot` build is given no slot.
    pub fn try_pin_current_thread(
        &self,
        slot: Option<usize>,
    ) -> Result<Option<usize>, ThreadingError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let Some(thread_index) = self.logical_thread_index(slot) else {
            warn!("Scheduler entry without a slot id, leaving thread affinity unchanged");
            return Ok(None);
        };
        let Some(cpu) = self.target_cpu(thread_index) else {
            return Ok(None);
        };

        self.platform.set_current_thread_affinity(cpu)?;
        debug!("Set thread affinity: Thread {thread_index}: CPU {cpu}");
        Ok(Some(cpu))
    }
}

impl<P: AffinityPlatform> SchedulerObserver for PinningObserver<P> {
    fn on_scheduler_entry(&self, slot: Option<usize>) {
        if let Err(err) = self.try_pin_current_thread(slot) {
            error!("Failed to set thread affinity: {err}");
            std::process::exit(1);
        }
    }

    fn on_scheduler_exit(&self, _slot: Option<usize>) {}
}

#[cfg(all(test, feature = "affinity"))]
mod tests {
    use {
        super::*,
        crate::{error::CpuAffinityError, platform::MockAffinity},
        assert_matches::assert_matches,
        std::{collections::HashSet, env, process::Command, sync::Arc, thread},
        test_case::test_case,
    };

    const FATAL_ENTRY_CHILD: &str = "AGAVE_THREAD_PINNING_FATAL_ENTRY_CHILD";

    fn pinner(mask: &[usize], pinning_step: usize) -> PinningObserver<MockAffinity> {
        PinningObserver::with_platform(
            &PinningConfig {
                pinning_step,
                ..PinningConfig::default()
            },
            MockAffinity::with_mask(CpuMask::from_cpus(mask.iter().copied())),
        )
        .unwrap()
    }

    #[test_case(&[0, 1, 2, 3], 1, &[0, 1, 2, 3]; "dense unit step")]
    #[test_case(&[0, 1, 2, 3, 4], 2, &[0, 2, 4, 1, 3]; "dense step two")]
    #[test_case(&[2, 5, 7], 1, &[2, 5, 7]; "sparse mask")]
    #[test_case(&[1, 3, 8, 9, 12], 2, &[1, 8, 12, 3, 9]; "sparse step two")]
    fn test_target_cpus(mask: &[usize], step: usize, expected: &[usize]) {
        let pinner = pinner(mask, step);
        assert!(pinner.is_enabled());
        assert_eq!(pinner.num_cpus(), mask.len());
        let cpus: Vec<_> = (0..mask.len())
            .map(|index| pinner.target_cpu(index).unwrap())
            .collect();
        assert_eq!(cpus, expected);
    }

    #[test]
    fn test_sparse_position_translates_to_cpu_id() {
        let pinner = pinner(&[2, 5, 7], 1);
        assert_eq!(pinner.target_cpu(1), Some(5));
    }

    #[test]
    fn test_thread_index_wraps_around_mask() {
        let pinner = pinner(&[0, 1, 2, 3, 4], 2);
        for index in 0..5 {
            assert_eq!(pinner.target_cpu(index), pinner.target_cpu(index + 5));
        }
    }

    #[test]
    fn test_index_offset_skips_first_cpu() {
        let pinner = PinningObserver::with_platform(
            &PinningConfig {
                pinning_step: 1,
                index_offset: 1,
            },
            MockAffinity::with_mask(CpuMask::from_cpus(0..4)),
        )
        .unwrap();
        assert_eq!(pinner.target_cpu(0), Some(1));
        assert_eq!(pinner.target_cpu(3), Some(0));
    }

    #[test]
    fn test_zero_step_rejected() {
        let result = PinningObserver::with_platform(
            &PinningConfig {
                pinning_step: 0,
                index_offset: 0,
            },
            MockAffinity::with_mask(CpuMask::from_cpus(0..4)),
        );
        assert_matches!(result, Err(ThreadingError::InvalidPinningStep));
    }

    #[test]
    fn test_capture_failure_disables_pinning() {
        solana_logger::setup();
        let pinner =
            PinningObserver::with_platform(&PinningConfig::default(), MockAffinity::failing_capture())
                .unwrap();
        assert!(!pinner.is_enabled());
        assert_eq!(pinner.num_cpus(), 0);
        assert_eq!(pinner.target_cpu(0), None);

        for slot in 0..4 {
            pinner.on_scheduler_entry(Some(slot));
            pinner.on_scheduler_exit(Some(slot));
        }
        assert_eq!(pinner.platform().capture_calls(), 1);
        assert!(pinner.platform().applied().is_empty());
    }

    #[test]
    fn test_empty_mask_disables_pinning() {
        let pinner = pinner(&[], 1);
        assert!(!pinner.is_enabled());
        assert_matches!(pinner.try_pin_current_thread(Some(0)), Ok(None));
        assert!(pinner.platform().applied().is_empty());
    }

    #[test]
    fn test_each_thread_pinned_once_in_stripe_order() {
        let pinner = Arc::new(pinner(&[0, 1, 2, 3, 4], 2));
        for slot in 0..5 {
            let pinner = pinner.clone();
            thread::spawn(move || {
                pinner.on_scheduler_entry(Some(slot));
                assert_eq!(pinner.current_thread_index(), Some(slot));
            })
            .join()
            .unwrap();
        }
        assert_eq!(pinner.platform().applied_cpus(), vec![0, 2, 4, 1, 3]);

        let threads: HashSet<_> = pinner
            .platform()
            .applied()
            .into_iter()
            .map(|(thread, _)| thread)
            .collect();
        assert_eq!(threads.len(), 5);
    }

    #[test]
    fn test_set_failure_is_reported() {
        let pinner = PinningObserver::with_platform(
            &PinningConfig::default(),
            MockAffinity::failing_set(CpuMask::from_cpus(0..2)),
        )
        .unwrap();
        assert!(pinner.is_enabled());
        assert_matches!(
            pinner.try_pin_current_thread(Some(0)),
            Err(ThreadingError::Affinity(CpuAffinityError::Io(_)))
        );
    }

    #[test]
    fn test_entry_exits_process_when_pinning_fails() {
        if env::var_os(FATAL_ENTRY_CHILD).is_some() {
            let pinner = PinningObserver::with_platform(
                &PinningConfig::default(),
                MockAffinity::failing_set(CpuMask::from_cpus(0..2)),
            )
            .unwrap();
            pinner.on_scheduler_entry(Some(0));
            unreachable!("scheduler entry returned after failing to set affinity");
        }

        // rerun just this test in a child process, which must die on entry
        let output = Command::new(env::current_exe().unwrap())
            .args([
                "pinning::tests::test_entry_exits_process_when_pinning_fails",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(FATAL_ENTRY_CHILD, "1")
            .output()
            .unwrap();
        assert_eq!(
            output.status.code(),
            Some(1),
            "child stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[test]
    #[cfg(not(feature = "scheduler-slot"))]
    fn test_reentry_keeps_logical_index() {
        let pinner = pinner(&[0, 1, 2, 3], 1);
        thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(pinner.current_thread_index(), None);
                assert_matches!(pinner.try_pin_current_thread(None), Ok(Some(0)));
                assert_matches!(pinner.try_pin_current_thread(None), Ok(Some(0)));
                assert_eq!(pinner.current_thread_index(), Some(0));
            });
        });
        thread::scope(|scope| {
            scope.spawn(|| {
                assert_matches!(pinner.try_pin_current_thread(Some(7)), Ok(Some(1)));
            });
        });
        assert_eq!(pinner.platform().applied_cpus(), vec![0, 0, 1]);
    }

    #[test]
    #[cfg(not(feature = "scheduler-slot"))]
    fn test_indices_are_unique_across_threads() {
        const THREADS: usize = 16;
        let pinner = pinner(&(0..THREADS).collect::<Vec<_>>(), 1);
        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| pinner.on_scheduler_entry(None));
            }
        });
        let mut cpus = pinner.platform().applied_cpus();
        cpus.sort_unstable();
        assert_eq!(cpus, (0..THREADS).collect::<Vec<_>>());
    }

    #[test]
    #[cfg(not(feature = "scheduler-slot"))]
    fn test_thread_keeps_only_last_pinner_index() {
        let first = pinner(&[0, 1, 2, 3], 1);
        let second = pinner(&[4, 5, 6, 7], 1);
        thread::scope(|scope| {
            scope.spawn(|| {
                assert_matches!(first.try_pin_current_thread(None), Ok(Some(0)));
                assert_matches!(second.try_pin_current_thread(None), Ok(Some(4)));
                assert_eq!(first.current_thread_index(), None);
                assert_eq!(second.current_thread_index(), Some(0));

                // coming back to the first pinner draws a fresh index
                assert_matches!(first.try_pin_current_thread(None), Ok(Some(1)));
                assert_eq!(first.current_thread_index(), Some(1));
                assert_eq!(second.current_thread_index(), None);
            });
        });
        assert_eq!(first.platform().applied_cpus(), vec![0, 1]);
        assert_eq!(second.platform().applied_cpus(), vec![4]);
    }

    #[test]
    #[cfg(feature = "scheduler-slot")]
    fn test_thread_keeps_only_last_pinner_slot() {
        let first = pinner(&[0, 1, 2, 3], 1);
        let second = pinner(&[4, 5, 6, 7], 1);
        thread::scope(|scope| {
            scope.spawn(|| {
                assert_matches!(first.try_pin_current_thread(Some(2)), Ok(Some(2)));
                assert_matches!(second.try_pin_current_thread(Some(1)), Ok(Some(5)));
                assert_eq!(first.current_thread_index(), None);
                assert_eq!(second.current_thread_index(), Some(1));
            });
        });
    }

    #[test]
    #[cfg(feature = "scheduler-slot")]
    fn test_slot_selects_logical_index() {
        let pinner = pinner(&[0, 1, 2, 3, 4], 2);
        assert_matches!(pinner.try_pin_current_thread(Some(3)), Ok(Some(1)));
        assert_eq!(pinner.current_thread_index(), Some(3));
        assert_matches!(pinner.try_pin_current_thread(None), Ok(None));
        assert_eq!(pinner.platform().applied_cpus(), vec![1]);
    }
}

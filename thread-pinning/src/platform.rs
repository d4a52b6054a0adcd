//! Operating system affinity capability used by the pinner.

use crate::{cpu_mask::CpuMask, error::CpuAffinityError};
#[cfg(target_os = "linux")]
use std::{io, mem::size_of};

/// Upper bound on the mask size tried while capturing the affinity mask.
///
/// glibc's `cpu_set_t` is fixed at 1024 CPUs, but the kernel may be built for
/// more. Capture starts at `CPU_SETSIZE` and doubles the buffer while the
/// kernel rejects it as too small, stopping here.
pub const MAX_MASK_CPUS: usize = 16 * 1024;

#[cfg(target_os = "linux")]
const CPU_SETSIZE: usize = 8 * size_of::<libc::cpu_set_t>();

#[cfg(target_os = "linux")]
const BITS_PER_WORD: usize = 8 * size_of::<libc::c_ulong>();

/// Minimal OS surface needed to pin threads.
///
/// The striping logic never talks to the OS directly, which keeps it testable
/// against a fixed mask.
pub trait AffinityPlatform: Send + Sync {
    /// Reads the set of CPUs the calling thread is currently allowed to run on.
    ///
    /// Called once, from the thread constructing the pinner, before any worker
    /// has been pinned, so it observes the mask the process started with.
    fn capture_process_affinity_mask(&self) -> Result<CpuMask, CpuAffinityError>;

    /// Restricts the calling thread to exactly one CPU.
    fn set_current_thread_affinity(&self, cpu: usize) -> Result<(), CpuAffinityError>;
}

/// Real affinity calls (`sched_getaffinity`/`sched_setaffinity` on Linux).
///
/// Every call returns [`CpuAffinityError::NotSupported`] on other platforms.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsAffinity;

#[cfg(target_os = "linux")]
impl AffinityPlatform for OsAffinity {
    fn capture_process_affinity_mask(&self) -> Result<CpuMask, CpuAffinityError> {
        let mut ncpus = CPU_SETSIZE;
        loop {
            let mut words: Vec<libc::c_ulong> = vec![0; ncpus.div_ceil(BITS_PER_WORD)];
            let size = words.len() * size_of::<libc::c_ulong>();

            // safety: the kernel writes at most `size` bytes, which is exactly the
            // length of `words`; cpu_set_t is a plain bitmap of unsigned longs
            let result = unsafe {
                libc::sched_getaffinity(
                    0, // 0 means current thread
                    size,
                    words.as_mut_ptr().cast::<libc::cpu_set_t>(),
                )
            };

            if result == 0 {
                return Ok(mask_from_words(&words));
            }

            let err = io::Error::last_os_error();
            // EINVAL means the buffer is smaller than the kernel's cpumask
            if err.raw_os_error() != Some(libc::EINVAL) || ncpus >= MAX_MASK_CPUS {
                return Err(CpuAffinityError::Io(err));
            }
            ncpus <<= 1;
        }
    }

    fn set_current_thread_affinity(&self, cpu: usize) -> Result<(), CpuAffinityError> {
        if cpu >= MAX_MASK_CPUS {
            return Err(CpuAffinityError::InvalidCpu {
                cpu,
                max: MAX_MASK_CPUS - 1,
            });
        }

        let ncpus = CPU_SETSIZE.max(cpu + 1);
        let mut words: Vec<libc::c_ulong> = vec![0; ncpus.div_ceil(BITS_PER_WORD)];
        words[cpu / BITS_PER_WORD] |= 1 << (cpu % BITS_PER_WORD);
        let size = words.len() * size_of::<libc::c_ulong>();

        // safety: the kernel reads at most `size` bytes from `words`
        let result = unsafe {
            libc::sched_setaffinity(
                0, // 0 means current thread
                size,
                words.as_ptr().cast::<libc::cpu_set_t>(),
            )
        };

        if result != 0 {
            return Err(CpuAffinityError::Io(io::Error::last_os_error()));
        }

        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl AffinityPlatform for OsAffinity {
    fn capture_process_affinity_mask(&self) -> Result<CpuMask, CpuAffinityError> {
        Err(CpuAffinityError::NotSupported)
    }

    fn set_current_thread_affinity(&self, _cpu: usize) -> Result<(), CpuAffinityError> {
        Err(CpuAffinityError::NotSupported)
    }
}

/// Extracts set CPU IDs from a kernel cpumask bitmap.
#[cfg(target_os = "linux")]
fn mask_from_words(words: &[libc::c_ulong]) -> CpuMask {
    words
        .iter()
        .enumerate()
        .flat_map(|(word_idx, &word)| {
            (0..BITS_PER_WORD)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| word_idx * BITS_PER_WORD + bit)
        })
        .collect()
}

#[cfg(feature = "dev-context-only-utils")]
pub use mock::MockAffinity;

#[cfg(feature = "dev-context-only-utils")]
mod mock {
    use {super::*, parking_lot::Mutex, std::thread::ThreadId};

    /// In-memory platform that records pin requests instead of issuing them.
    #[derive(Debug, Default)]
    pub struct MockAffinity {
        mask: Option<CpuMask>,
        fail_set: bool,
        capture_calls: Mutex<usize>,
        applied: Mutex<Vec<(ThreadId, usize)>>,
    }

    impl MockAffinity {
        /// A platform reporting `mask` as the process affinity.
        pub fn with_mask(mask: CpuMask) -> Self {
            Self {
                mask: Some(mask),
                ..Self::default()
            }
        }

        /// A platform whose mask capture always fails.
        pub fn failing_capture() -> Self {
            Self::default()
        }

        /// A platform that captures `mask` but rejects every pin request.
        pub fn failing_set(mask: CpuMask) -> Self {
            Self {
                mask: Some(mask),
                fail_set: true,
                ..Self::default()
            }
        }

        pub fn capture_calls(&self) -> usize {
            *self.capture_calls.lock()
        }

        /// Every successful pin request, in the order they arrived.
        pub fn applied(&self) -> Vec<(ThreadId, usize)> {
            self.applied.lock().clone()
        }

        pub fn applied_cpus(&self) -> Vec<usize> {
            self.applied.lock().iter().map(|&(_, cpu)| cpu).collect()
        }
    }

    impl AffinityPlatform for MockAffinity {
        fn capture_process_affinity_mask(&self) -> Result<CpuMask, CpuAffinityError> {
            *self.capture_calls.lock() += 1;
            self.mask.clone().ok_or(CpuAffinityError::NotSupported)
        }

        fn set_current_thread_affinity(&self, cpu: usize) -> Result<(), CpuAffinityError> {
            if self.fail_set {
                return Err(CpuAffinityError::Io(std::io::Error::from_raw_os_error(22)));
            }
            self.applied
                .lock()
                .push((std::thread::current().id(), cpu));
            Ok(())
        }
    }
}

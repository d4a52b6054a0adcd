#![cfg_attr(
    not(feature = "agave-unstable-api"),
    deprecated(
        since = "3.1.0",
        note = "This crate has been marked for formal inclusion in the Agave Unstable API. From \
                v4.0.0 onward, the `agave-unstable-api` crate feature must be specified to \
                acknowledge use of an interface that may break without warning."
    )
)]
// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(missing_unsafe_on_extern)]
#![warn(rust_2024_guarded_string_incompatible_syntax)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

//! Locking and thread placement primitives for parallel compute pools.
//!
//! Two independent pieces live here:
//!
//! * [`ScopedLock`] over an [`ExclusionPrimitive`]. The waiting strategy of
//!   [`Mutex`] (spin, blocking or queuing) is selected by crate features and
//!   is the same for every lock in the binary.
//! * [`SchedulerObserver`]s a worker pool notifies as threads join and leave
//!   it: [`ConcurrencyTracker`] counts them, [`PinningObserver`] pins each
//!   one to a single CPU of the process affinity mask using a striped layout.
//!
//! [`RayonRuntime`] wires both observers into a rayon thread pool.
//!
//! # Platform Support
//!
//! Pinning is implemented for Linux. Elsewhere the affinity mask cannot be
//! captured and pinners stay disabled.
//!
//! # Examples
//!
//! ```no_run
//! use agave_thread_pinning::*;
//!
//! # fn main() -> Result<(), ThreadingError> {
//! let config = RayonConfig {
//!     worker_threads: 8,
//!     core_allocation: CoreAllocation::Striped(PinningConfig {
//!         pinning_step: 2,
//!         ..PinningConfig::default()
//!     }),
//!     ..RayonConfig::default()
//! };
//! let runtime = RayonRuntime::new("solCompute".to_string(), config)?;
//! runtime.broadcast(|_| ());
//! println!("{} workers running", runtime.current_concurrency());
//! # Ok(())
//! # }
//! ```
//!

mod config;
mod cpu_mask;
mod error;
mod lock;
mod observer;
mod pinning;
mod platform;
mod rayon_runtime;
mod striping;
mod tracker;

#[cfg(feature = "dev-context-only-utils")]
pub use platform::MockAffinity;
pub use {
    config::{CoreAllocation, PinningConfig, RayonConfig},
    cpu_mask::CpuMask,
    error::{CpuAffinityError, ThreadingError},
    lock::{
        with_lock, BlockingPrimitive, ExclusionPrimitive, Mutex, QueuingPrimitive, ScopedLock,
        SpinPrimitive, MUTEX_STRATEGY,
    },
    observer::{ObserverSet, SchedulerObserver},
    pinning::PinningObserver,
    platform::{AffinityPlatform, OsAffinity, MAX_MASK_CPUS},
    rayon_runtime::{RayonRuntime, RayonRuntimeInner, MAX_THREAD_NAME_CHARS},
    striping::{stripe_cycle, stripe_position, DEFAULT_PINNING_STEP},
    tracker::ConcurrencyTracker,
};

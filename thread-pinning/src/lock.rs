//! Exclusion primitives with scoped acquisition.
//!
//! The waiting strategy is a build-time decision shared by every lock in the
//! binary: [`Mutex`] spins unless the `blocking-lock` feature is enabled, in
//! which case it parks waiting threads. `queuing-lock` additionally hands the
//! lock to waiters in arrival order.
//!
//! ```
//! use agave_thread_pinning::{Mutex, ExclusionPrimitive, ScopedLock};
//!
//! let mutex = Mutex::new();
//! {
//!     let _guard = ScopedLock::new(&mutex);
//!     assert!(mutex.is_held());
//! }
//! assert!(!mutex.is_held());
//! ```

use {
    parking_lot::lock_api::{self, RawMutex as _, RawMutexFair as _},
    std::marker::PhantomData,
};

/// A lock that guards no data of its own.
///
/// Callers normally go through [`ScopedLock`], which pairs every `acquire`
/// with exactly one `release`.
pub trait ExclusionPrimitive: Send + Sync {
    /// Strategy name, for diagnostics.
    const NAME: &'static str;

    fn new() -> Self;

    /// Waits until no other thread holds the lock, then takes it.
    fn acquire(&self);

    /// Takes the lock if it is free. Never waits.
    fn try_acquire(&self) -> bool;

    /// Gives the lock up, letting at most one waiter proceed.
    ///
    /// # Safety
    ///
    /// The calling context must currently hold the lock.
    unsafe fn release(&self);

    /// Whether some thread holds the lock right now. The answer may be stale
    /// by the time it is read.
    fn is_held(&self) -> bool;
}

/// Busy-waits without yielding the processor. Suited to critical sections
/// shorter than a context switch.
pub struct SpinPrimitive(spin::mutex::SpinMutex<()>);

impl ExclusionPrimitive for SpinPrimitive {
    const NAME: &'static str = "spin";

    fn new() -> Self {
        Self(spin::mutex::SpinMutex::new(()))
    }

    fn acquire(&self) {
        lock_api::RawMutex::lock(&self.0)
    }

    fn try_acquire(&self) -> bool {
        lock_api::RawMutex::try_lock(&self.0)
    }

    unsafe fn release(&self) {
        // safety: forwarded from the caller
        unsafe { lock_api::RawMutex::unlock(&self.0) }
    }

    fn is_held(&self) -> bool {
        self.0.is_locked()
    }
}

/// Parks waiting threads. Unfair: a releasing thread may immediately retake it.
pub struct BlockingPrimitive(parking_lot::RawMutex);

impl ExclusionPrimitive for BlockingPrimitive {
    const NAME: &'static str = "blocking";

    fn new() -> Self {
        Self(parking_lot::RawMutex::INIT)
    }

    fn acquire(&self) {
        self.0.lock()
    }

    fn try_acquire(&self) -> bool {
        self.0.try_lock()
    }

    unsafe fn release(&self) {
        // safety: forwarded from the caller
        unsafe { self.0.unlock() }
    }

    fn is_held(&self) -> bool {
        self.0.is_locked()
    }
}

/// Parks waiting threads and hands the lock directly to the longest waiter on
/// release.
pub struct QueuingPrimitive(parking_lot::RawFairMutex);

impl ExclusionPrimitive for QueuingPrimitive {
    const NAME: &'static str = "queuing";

    fn new() -> Self {
        Self(parking_lot::RawFairMutex::INIT)
    }

    fn acquire(&self) {
        self.0.lock()
    }

    fn try_acquire(&self) -> bool {
        self.0.try_lock()
    }

    unsafe fn release(&self) {
        // safety: forwarded from the caller
        unsafe { self.0.unlock_fair() }
    }

    fn is_held(&self) -> bool {
        self.0.is_locked()
    }
}

#[cfg(not(feature = "blocking-lock"))]
pub type Mutex = SpinPrimitive;
#[cfg(all(feature = "blocking-lock", not(feature = "queuing-lock")))]
pub type Mutex = BlockingPrimitive;
#[cfg(feature = "queuing-lock")]
pub type Mutex = QueuingPrimitive;

/// Name of the strategy [`Mutex`] was built with.
pub const MUTEX_STRATEGY: &str = <Mutex as ExclusionPrimitive>::NAME;

/// Holds an [`ExclusionPrimitive`] for exactly as long as the guard lives.
///
/// Constructing the guard acquires; dropping it releases, whether the scope
/// ends normally, returns early or unwinds from a panic.
///
/// The guard must be released on the thread that acquired it, so it cannot
/// be sent to another thread:
///
/// ```compile_fail
/// use agave_thread_pinning::{BlockingPrimitive, ExclusionPrimitive, ScopedLock};
///
/// let lock: &'static BlockingPrimitive = Box::leak(Box::new(BlockingPrimitive::new()));
/// let guard = ScopedLock::new(lock);
/// std::thread::spawn(move || drop(guard));
/// ```
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, M: ExclusionPrimitive = Mutex> {
    primitive: &'a M,
    _not_send: PhantomData<*const ()>,
}

// safety: a shared guard only exposes `&M`, and `M: Sync`
unsafe impl<M: ExclusionPrimitive> Sync for ScopedLock<'_, M> {}

impl<'a, M: ExclusionPrimitive> ScopedLock<'a, M> {
    pub fn new(primitive: &'a M) -> Self {
        primitive.acquire();
        Self::held(primitive)
    }

    /// Returns `None` instead of waiting when the lock is taken.
    pub fn try_new(primitive: &'a M) -> Option<Self> {
        primitive.try_acquire().then(|| Self::held(primitive))
    }

    fn held(primitive: &'a M) -> Self {
        Self {
            primitive,
            _not_send: PhantomData,
        }
    }
}

impl<M: ExclusionPrimitive> Drop for ScopedLock<'_, M> {
    fn drop(&mut self) {
        // safety: the guard is !Send, so this runs on the thread that acquired the lock
        unsafe { self.primitive.release() }
    }
}

/// Runs `f` while holding `primitive`.
pub fn with_lock<M: ExclusionPrimitive, R>(primitive: &M, f: impl FnOnce() -> R) -> R {
    let _guard = ScopedLock::new(primitive);
    f()
}

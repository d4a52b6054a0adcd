//! Error types for exclusion primitives and thread pinning.

use {std::io, thiserror::Error};

/// Errors that can occur during CPU affinity operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CpuAffinityError {
    /// I/O or system call error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not supported on this platform
    #[error("CPU affinity operations are not supported on this platform")]
    NotSupported,

    /// Invalid CPU ID
    #[error("CPU {cpu} is invalid (max CPU is {max})")]
    InvalidCpu { cpu: usize, max: usize },

    /// Failed to parse CPU range or ID
    #[error("Failed to parse CPU specification: {0}")]
    ParseError(String),
}

/// Errors surfaced while setting up or driving a pinned worker pool.
#[derive(Error, Debug)]
pub enum ThreadingError {
    /// Striping needs a stride of at least one core
    #[error("pinning step must be a positive integer")]
    InvalidPinningStep,

    #[error(transparent)]
    Affinity(#[from] CpuAffinityError),

    #[error("failed to build thread pool: {0}")]
    ThreadPoolBuild(#[from] rayon::ThreadPoolBuildError),
}

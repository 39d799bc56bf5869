//! Error types for ramfiller.

use std::collections::TryReserveError;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for ramfiller operations.
pub type Result<T> = std::result::Result<T, FillerError>;

/// Main error type for ramfiller.
#[derive(Debug, Error)]
pub enum FillerError {
    /// Configuration rejected before anything was allocated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The underlying allocation for one block failed.
    #[error("failed to allocate memory for block {index}")]
    Allocation {
        /// Position of the failing block in the chain.
        index: usize,
        #[source]
        source: TryReserveError,
    },

    /// A refresher was started while one was already running.
    #[error("refresher is already running")]
    AlreadyRunning,

    /// The refresher did not acknowledge a stop request in time.
    /// Memory stays with the stuck task and is not released.
    #[error("refresher did not stop within {waited:?}")]
    StopTimeout {
        /// How long the stop request waited.
        waited: Duration,
    },

    /// The refresher task died before handing the chain back.
    #[error("refresher task failed")]
    RefresherPanic(#[source] tokio::task::JoinError),

    /// Reading the release trigger failed.
    #[error("release trigger failed")]
    Io(#[from] std::io::Error),
}

impl FillerError {
    /// Process exit code for this failure. Configuration problems get
    /// their own code so callers can tell them from runtime failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            FillerError::Config(_) => 2,
            _ => 1,
        }
    }
}

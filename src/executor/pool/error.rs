//! Worker pool error types.

use std::fmt;
use std::time::Duration;

/// Errors that can occur when handing work to a pool.
#[derive(Debug, Clone)]
pub enum PoolError {
    /// The job queue is full.
    QueueFull {
        /// Maximum queue capacity.
        capacity: usize,
        /// Jobs waiting in the queue.
        pending: usize,
    },

    /// The job did not complete in time.
    Timeout(Duration),

    /// The pool has been shut down.
    Shutdown,

    /// The job was dropped before it produced a result.
    ChannelClosed,

    /// A worker thread could not be spawned.
    Spawn(String),
}

impl PoolError {
    /// Check if this is a queue full error.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }

    /// Check if this is a shutdown error.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }

    /// Short message for logging.
    pub fn message(&self) -> &str {
        match self {
            PoolError::QueueFull { .. } => "Queue full",
            PoolError::Timeout(_) => "Job timeout",
            PoolError::Shutdown => "Pool shutdown",
            PoolError::ChannelClosed => "Channel closed",
            PoolError::Spawn(_) => "Spawn failed",
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::QueueFull { capacity, pending } => {
                write!(f, "queue full: {}/{} pending jobs", pending, capacity)
            }
            PoolError::Timeout(duration) => {
                write!(f, "job timeout after {}ms", duration.as_millis())
            }
            PoolError::Shutdown => write!(f, "pool has been shut down"),
            PoolError::ChannelClosed => write!(f, "job dropped before completion"),
            PoolError::Spawn(msg) => write!(f, "failed to spawn worker: {}", msg),
        }
    }
}

impl std::error::Error for PoolError {}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

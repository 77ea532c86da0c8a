//! Executors that run dispatched route pipelines off the event loop.
//!
//! The runtime owns one default [`ThreadPool`] (threads named `worker-N`).
//! Routers can register more executors by name and dispatch route groups to
//! them.

pub mod pool;

use std::fmt;
use std::sync::Arc;

pub use pool::{PoolError, PoolResult, ThreadPool, DEFAULT_QUEUE_MULTIPLIER};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs on threads where blocking is allowed.
///
/// `submit` must not block the caller: rejection is reported as an error
/// and surfaces as a dispatch failure.
pub trait Executor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Queue a job.
    fn submit(&self, job: Job) -> PoolResult<()>;
}

/// Where a dispatched route runs.
#[derive(Clone)]
pub enum DispatchTarget {
    /// The runtime's default worker pool.
    Worker,
    /// A specific executor.
    Executor(Arc<dyn Executor>),
}

impl DispatchTarget {
    /// Executor name for logs.
    pub fn name(&self) -> &str {
        match self {
            DispatchTarget::Worker => "worker",
            DispatchTarget::Executor(executor) => executor.name(),
        }
    }
}

impl fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DispatchTarget").field(&self.name()).finish()
    }
}

//! Bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      ThreadPool                            │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐                │
//! │  │ worker-0 │   │ worker-1 │   │ worker-2 │  ...           │
//! │  └────┬─────┘   └────┬─────┘   └────┬─────┘                │
//! │       └──────────────┴──────────────┘                      │
//! │                      │                                     │
//! │              ┌───────▼───────┐                             │
//! │              │  mpsc channel │  (bounded queue)            │
//! │              └───────┬───────┘                             │
//! │                      │                                     │
//! │              ┌───────▼───────┐                             │
//! │              │   submit()    │  (fails fast when full)     │
//! │              └───────────────┘                             │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod thread;

pub use error::{PoolError, PoolResult};
pub use thread::{ThreadPool, DEFAULT_QUEUE_MULTIPLIER};

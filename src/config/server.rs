//! Server and runtime configuration.

use std::net::SocketAddr;
use std::time::Duration;

use super::parse::{env_bool, env_duration, env_parse};
use super::ConfigError;
use crate::executor::DEFAULT_QUEUE_MULTIPLIER;

/// Worker threads per event-loop thread when `worker_threads` is 0.
pub const DEFAULT_WORKERS_PER_IO_THREAD: usize = 8;

/// Server and thread-group configuration.
///
/// Zero thread counts and queue capacity mean "derive a default", see the
/// resolving accessors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Acceptor group size (default: 1).
    pub acceptor_threads: usize,
    /// Event-loop group size; 0 = CPU count.
    pub io_threads: usize,
    /// Worker pool size; 0 = io threads × 8.
    pub worker_threads: usize,
    /// Worker queue bound; 0 = workers × 100.
    pub queue_capacity: usize,
    /// How long `stop` waits for connections and queued work.
    pub drain_timeout: Duration,
    /// Largest accepted request body; bigger bodies get 413.
    pub max_request_size: usize,
    /// SSE keep-alive interval; zero disables keep-alives.
    pub sse_keep_alive: Duration,
    /// Add `Server` and `Date` headers.
    pub default_headers: bool,
    /// Log every request under the `access` target.
    pub access_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            acceptor_threads: 1,
            io_threads: 0,
            worker_threads: 0,
            queue_capacity: 0,
            drain_timeout: Duration::from_secs(30),
            max_request_size: 10 * 1024 * 1024,
            sse_keep_alive: Duration::from_secs(15),
            default_headers: true,
            access_log: false,
        }
    }
}

impl ServerConfig {
    /// Defaults bound to `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            listen_addr: env_parse("LISTEN_ADDR", defaults.listen_addr)?,
            acceptor_threads: env_parse("ACCEPTOR_THREADS", defaults.acceptor_threads)?,
            io_threads: env_parse("IO_THREADS", defaults.io_threads)?,
            worker_threads: env_parse("WORKER_THREADS", defaults.worker_threads)?,
            queue_capacity: env_parse("QUEUE_CAPACITY", defaults.queue_capacity)?,
            drain_timeout: env_duration("DRAIN_TIMEOUT", defaults.drain_timeout)?,
            max_request_size: env_parse("MAX_REQUEST_SIZE", defaults.max_request_size)?,
            sse_keep_alive: env_duration("SSE_KEEP_ALIVE", defaults.sse_keep_alive)?,
            default_headers: env_bool("DEFAULT_HEADERS", defaults.default_headers)?,
            access_log: env_bool("ACCESS_LOG", defaults.access_log)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acceptor_threads == 0 {
            return Err(ConfigError::invalid("ACCEPTOR_THREADS", "must be at least 1"));
        }
        if self.max_request_size == 0 {
            return Err(ConfigError::invalid("MAX_REQUEST_SIZE", "must be positive"));
        }
        Ok(())
    }

    pub fn with_acceptor_threads(mut self, threads: usize) -> Self {
        self.acceptor_threads = threads;
        self
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    pub fn with_sse_keep_alive(mut self, interval: Duration) -> Self {
        self.sse_keep_alive = interval;
        self
    }

    pub fn with_default_headers(mut self, enabled: bool) -> Self {
        self.default_headers = enabled;
        self
    }

    pub fn with_access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    /// Event-loop threads after defaulting.
    pub fn io_thread_count(&self) -> usize {
        if self.io_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.io_threads
        }
    }

    /// Worker threads after defaulting.
    pub fn worker_count(&self) -> usize {
        if self.worker_threads == 0 {
            self.io_thread_count() * DEFAULT_WORKERS_PER_IO_THREAD
        } else {
            self.worker_threads
        }
    }

    /// Worker queue bound after defaulting.
    pub fn actual_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.worker_count() * DEFAULT_QUEUE_MULTIPLIER
        } else {
            self.queue_capacity
        }
    }
}

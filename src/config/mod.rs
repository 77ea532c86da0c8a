//! Environment-driven configuration.
//!
//! ```rust,ignore
//! use tokio_dispatch::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Workers: {}", config.server.worker_count());
//! ```

mod error;
mod logging;
mod parse;
mod router;
mod server;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig, DEFAULT_FILTER};
pub use parse::{env_bool, env_duration, env_opt, env_or, env_parse, parse_duration};
pub use router::RouterConfig;
pub use server::{ServerConfig, DEFAULT_WORKERS_PER_IO_THREAD};

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            router: RouterConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!(
            "  Threads: acceptor={} eventloop={} worker={}",
            self.server.acceptor_threads,
            self.server.io_thread_count(),
            self.server.worker_count()
        );
        info!("  Queue capacity: {}", self.server.actual_queue_capacity());
        info!("  Execution mode: {}", self.router.execution_mode);
        info!("  Context path: {}", self.router.context_path);
        info!("  Max request size: {} bytes", self.server.max_request_size);

        if self.server.sse_keep_alive.is_zero() {
            info!("  SSE keep-alive: disabled");
        } else {
            info!("  SSE keep-alive: {:?}", self.server.sse_keep_alive);
        }

        if self.server.access_log {
            info!("  Access log: enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ExecutionMode;

    #[test]
    fn test_config_defaults() {
        for key in [
            "LISTEN_ADDR",
            "ACCEPTOR_THREADS",
            "IO_THREADS",
            "WORKER_THREADS",
            "QUEUE_CAPACITY",
            "DRAIN_TIMEOUT",
            "MAX_REQUEST_SIZE",
            "SSE_KEEP_ALIVE",
            "DEFAULT_HEADERS",
            "LOG_FORMAT",
        ] {
            std::env::remove_var(key);
        }

        let server = ServerConfig::from_env().expect("Should load config");
        assert_eq!(server, ServerConfig::default());
        assert_eq!(server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(server.io_threads, 0);
        assert_eq!(server.queue_capacity, 0);
        assert!(server.default_headers);

        let router = RouterConfig::default();
        assert_eq!(router.context_path, "/");
        assert_eq!(router.execution_mode, ExecutionMode::EventLoop);
    }
}

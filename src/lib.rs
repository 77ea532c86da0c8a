//! tokio_dispatch - HTTP routing and dispatch engine on Tokio and hyper.
//!
//! Routes are registered on a [`Router`](router::Router): path patterns
//! with variables, regex constraints and wildcards, wrapped by before/after
//! steps and decorators, with scoped error handlers. A
//! [`DispatchRuntime`](runtime::DispatchRuntime) freezes the router and
//! serves it.
//!
//! # Architecture
//!
//! - **Acceptor group**: single-thread runtimes accepting connections
//! - **Event loop**: multi-thread runtime (`eventloop-N`) parsing HTTP and
//!   running inline routes
//! - **Worker pool**: blocking threads (`worker-N`) for dispatched routes
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_dispatch::config::ServerConfig;
//! use tokio_dispatch::router::Router;
//! use tokio_dispatch::runtime::DispatchRuntime;
//!
//! let mut router = Router::new();
//! router.get("/hello/{name}", |ctx| {
//!     Ok(format!("hello {}", ctx.path_var("name").unwrap_or("?")))
//! })?;
//! router.dispatch(|r| {
//!     r.get("/report", |_| Ok(build_report()))?;
//!     Ok(())
//! })?;
//!
//! let mut runtime = DispatchRuntime::new(ServerConfig::new("0.0.0.0:8080".parse()?));
//! runtime.start(router)?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod config;
pub mod core;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod router;
pub mod runtime;
pub mod sse;

// Re-exports for convenience
pub use config::{Config, ServerConfig};
pub use router::{App, Router};
pub use runtime::{DispatchRuntime, RuntimeError};

//! Core types shared by routes, pipelines and the runtime.
//!
//! - [`Request`] - decoded HTTP request
//! - [`Response`] - HTTP response with builder pattern
//! - [`Context`] - per-request state passed to every step
//! - [`HandlerError`] - error type of every step
//! - [`Attributes`] / [`ServiceRegistry`] - thread-safe application state
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_dispatch::core::{Context, HandlerError, Response};
//!
//! fn show(ctx: &mut Context) -> Result<Response, HandlerError> {
//!     let id: u64 = ctx.path_param("id")?;
//!     ctx.set_response_header("X-Order", id.to_string());
//!     Ok(Response::ok(format!("order {}", id)))
//! }
//! ```

mod context;
mod error;
mod registry;
mod request;
mod response;

pub(crate) use context::mark_io_thread;
pub use context::{generate_request_id, is_io_thread, Context, ContextBuilder};
pub use error::{HandlerError, PanicError, Result, StatusError};
pub use registry::{Attributes, ServiceRegistry};
pub use request::Request;
pub use response::{Body, IntoResponse, Json, Response, ResponseBuilder};

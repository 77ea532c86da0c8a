//! Route pipelines: decorators, before/after steps and error handlers.
//!
//! Every route owns an ordered list of [`Step`]s captured when it was
//! registered. Execution order for decorators `D1, D2`, befores `B1, B2`,
//! handler `H` and after `A1`:
//!
//! ```text
//! D1 ─▶ D2 ─▶ B1 ─▶ B2 ─▶ H ─▶ A1
//!  ◀──── ◀──────────────────────┘
//! ```
//!
//! Decorators wrap the whole chain in registration order (first registered
//! is outermost) and must call [`Next::run`] to continue. A before step may
//! short-circuit with [`Flow::Stop`]. After steps run only when the handler
//! succeeded.

mod chain;
mod error;

use std::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::core::{Context, HandlerError, IntoResponse, Response};

pub use chain::{execute, Next};
pub use error::{default_error_response, ErrorChain, ErrorCodes, ErrorMatcher};

/// Terminal route handler.
pub type Handler = Arc<dyn Fn(&mut Context) -> Result<Response, HandlerError> + Send + Sync>;

pub type BeforeFn = Arc<dyn Fn(&mut Context) -> Result<Flow, HandlerError> + Send + Sync>;

pub type AfterFn =
    Arc<dyn Fn(&mut Context, Response) -> Result<Response, HandlerError> + Send + Sync>;

pub type DecoratorFn =
    Arc<dyn Fn(&mut Context, Next<'_>) -> Result<Response, HandlerError> + Send + Sync>;

/// Returns `None` to let the next error handler try.
pub type ErrorHandlerFn =
    Arc<dyn Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync>;

/// Outcome of a before step.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the next step.
    Next,
    /// Stop here and send this response.
    Stop(Response),
}

/// One pipeline step.
#[derive(Clone)]
pub enum Step {
    Before(BeforeFn),
    After(AfterFn),
    Decorator(DecoratorFn),
    /// Route-scoped error handler, tried before the router's global ones.
    ErrorHandler(ErrorHandlerFn),
}

impl Step {
    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&mut Context) -> Result<Flow, HandlerError> + Send + Sync + 'static,
    {
        Step::Before(Arc::new(f))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(&mut Context, Response) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        Step::After(Arc::new(f))
    }

    pub fn decorator<F>(f: F) -> Self
    where
        F: Fn(&mut Context, Next<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        Step::Decorator(Arc::new(f))
    }

    pub fn error_handler<F>(f: F) -> Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        Step::ErrorHandler(Arc::new(f))
    }

    /// Step kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Before(_) => "before",
            Step::After(_) => "after",
            Step::Decorator(_) => "decorator",
            Step::ErrorHandler(_) => "error",
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Wrap a closure returning anything convertible into a response.
pub fn handler<F, R>(f: F) -> Handler
where
    F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
    R: IntoResponse,
{
    Arc::new(move |ctx: &mut Context| f(ctx).map(IntoResponse::into_response))
}

//! Route definition.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use http::{Method, StatusCode};

use super::pattern::PathPattern;
use crate::core::{Context, HandlerError, Response};
use crate::executor::DispatchTarget;
use crate::pipeline::{Flow, Handler, Next, Step};

/// Route method: the HTTP verbs plus WebSocket and server-sent events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Ws,
    Sse,
}

impl RouteMethod {
    pub const ALL: [RouteMethod; 10] = [
        RouteMethod::Get,
        RouteMethod::Post,
        RouteMethod::Put,
        RouteMethod::Delete,
        RouteMethod::Patch,
        RouteMethod::Head,
        RouteMethod::Options,
        RouteMethod::Trace,
        RouteMethod::Ws,
        RouteMethod::Sse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Delete => "DELETE",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Head => "HEAD",
            RouteMethod::Options => "OPTIONS",
            RouteMethod::Trace => "TRACE",
            RouteMethod::Ws => "WS",
            RouteMethod::Sse => "SSE",
        }
    }

    /// Route method for a plain HTTP method. `WS` and `SSE` are never
    /// returned; they are selected from request headers.
    pub fn from_http(method: &Method) -> Option<Self> {
        let route_method = match *method {
            Method::GET => RouteMethod::Get,
            Method::POST => RouteMethod::Post,
            Method::PUT => RouteMethod::Put,
            Method::DELETE => RouteMethod::Delete,
            Method::PATCH => RouteMethod::Patch,
            Method::HEAD => RouteMethod::Head,
            Method::OPTIONS => RouteMethod::Options,
            Method::TRACE => RouteMethod::Trace,
            _ => return None,
        };
        Some(route_method)
    }

    /// HTTP method used on the wire; `WS` and `SSE` travel as `GET`.
    pub fn http_method(self) -> Method {
        match self {
            RouteMethod::Get | RouteMethod::Ws | RouteMethod::Sse => Method::GET,
            RouteMethod::Post => Method::POST,
            RouteMethod::Put => Method::PUT,
            RouteMethod::Delete => Method::DELETE,
            RouteMethod::Patch => Method::PATCH,
            RouteMethod::Head => Method::HEAD,
            RouteMethod::Options => Method::OPTIONS,
            RouteMethod::Trace => Method::TRACE,
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown route method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMethodError(pub String);

impl fmt::Display for ParseMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown route method: {}", self.0)
    }
}

impl std::error::Error for ParseMethodError {}

impl FromStr for RouteMethod {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RouteMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseMethodError(s.to_string()))
    }
}

static NOT_FOUND: LazyLock<Arc<Route>> = LazyLock::new(|| {
    Arc::new(Route::new(
        RouteMethod::Get,
        PathPattern::catch_all(),
        Arc::new(|_ctx: &mut Context| -> Result<Response, HandlerError> {
            Err(HandlerError::status(StatusCode::NOT_FOUND))
        }),
    ))
});

static METHOD_NOT_ALLOWED: LazyLock<Arc<Route>> = LazyLock::new(|| {
    Arc::new(Route::new(
        RouteMethod::Get,
        PathPattern::catch_all(),
        Arc::new(|_ctx: &mut Context| -> Result<Response, HandlerError> {
            Err(HandlerError::status(StatusCode::METHOD_NOT_ALLOWED))
        }),
    ))
});

/// A registered route: method, pattern, handler and pipeline steps.
///
/// Routes are mutable only while the router is being built.
#[derive(Clone)]
pub struct Route {
    method: RouteMethod,
    pattern: PathPattern,
    handler: Handler,
    steps: Vec<Step>,
    dispatch: Option<DispatchTarget>,
    attributes: HashMap<String, serde_json::Value>,
}

impl Route {
    pub fn new(method: RouteMethod, pattern: PathPattern, handler: Handler) -> Self {
        Self {
            method,
            pattern,
            handler,
            steps: Vec::new(),
            dispatch: None,
            attributes: HashMap::new(),
        }
    }

    /// Shared sentinel for requests no route matched.
    pub fn not_found() -> Arc<Route> {
        Arc::clone(&NOT_FOUND)
    }

    /// Shared sentinel for paths that match under other methods only.
    pub fn method_not_allowed() -> Arc<Route> {
        Arc::clone(&METHOD_NOT_ALLOWED)
    }

    pub fn is_not_found(&self) -> bool {
        std::ptr::eq(self, &**NOT_FOUND)
    }

    pub fn is_method_not_allowed(&self) -> bool {
        std::ptr::eq(self, &**METHOD_NOT_ALLOWED)
    }

    #[inline]
    pub fn method(&self) -> RouteMethod {
        self.method
    }

    #[inline]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Variable names in declaration order.
    pub fn path_keys(&self) -> Vec<&str> {
        self.pattern.keys().collect()
    }

    #[inline]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[inline]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Where the pipeline runs; `None` means inline on the event loop.
    #[inline]
    pub fn dispatch_target(&self) -> Option<&DispatchTarget> {
        self.dispatch.as_ref()
    }

    pub fn attributes(&self) -> &HashMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn push_step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub(crate) fn set_steps(&mut self, steps: Vec<Step>) {
        self.steps = steps;
    }

    pub fn before<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<Flow, HandlerError> + Send + Sync + 'static,
    {
        self.push_step(Step::before(f))
    }

    pub fn after<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Response) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.push_step(Step::after(f))
    }

    pub fn decorator<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Next<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.push_step(Step::decorator(f))
    }

    /// Error handler for this route only.
    pub fn error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        self.push_step(Step::error_handler(f))
    }

    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Run this route's pipeline on `target`.
    pub fn set_dispatch(&mut self, target: Option<DispatchTarget>) -> &mut Self {
        self.dispatch = target;
        self
    }

    /// Same route under another pattern.
    pub(crate) fn with_pattern(&self, pattern: PathPattern) -> Self {
        Self {
            pattern,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("steps", &self.steps)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

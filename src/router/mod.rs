//! Route registration and lookup.
//!
//! [`Router`] is the build-time surface: routes, scoped pipeline steps,
//! error handlers, executors and lifecycle hooks. [`Router::into_app`]
//! freezes it into an [`App`], which the runtime shares across threads.
//!
//! # Example
//!
//! ```ignore
//! use tokio_dispatch::router::Router;
//!
//! let mut router = Router::new();
//! router.get("/", |_ctx| Ok("hello"))?;
//! router.path("/api", |r| {
//!     r.before(|ctx| {
//!         ctx.set_response_header("X-Api", "1");
//!         Ok(Flow::Next)
//!     });
//!     r.get("/orders/{id:[0-9]+}", |ctx| {
//!         let id: u64 = ctx.path_param("id")?;
//!         Ok(format!("order {}", id))
//!     })?;
//!     r.dispatch(|r| {
//!         r.post("/reports", build_report)?;
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//! let app = router.into_app();
//! ```

mod app;
mod pattern;
mod reverse;
mod route;
mod table;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::config::RouterConfig;
use crate::core::{Attributes, Context, HandlerError, IntoResponse, Response, ServiceRegistry};
use crate::executor::{DispatchTarget, Executor};
use crate::pipeline::{handler, ErrorChain, ErrorMatcher, Flow, Handler, Next, Step};
use crate::sse::{self, SseEmitter};

pub use app::{App, HookError, Phase};
pub use pattern::{
    compile, leading_slash, no_trailing_slash, normalize_path, path_keys, PathPattern,
    PatternSyntaxError, Segment,
};
pub use reverse::{reverse, reverse_positional, MissingValueError, PathValues};
pub use route::{ParseMethodError, Route, RouteMethod};
pub use table::{PathVars, RouteMatch, RouteTable, RouterOptions};

pub(crate) use app::Hooks;

/// Events buffered between an SSE handler and the connection.
const SSE_BUFFER: usize = 64;

/// Where routes run unless a dispatch scope says otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Inline on the event-loop thread that owns the connection.
    #[default]
    EventLoop,
    /// On the default worker pool.
    Worker,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::EventLoop => "event_loop",
            ExecutionMode::Worker => "worker",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "event_loop" | "eventloop" | "event-loop" => Ok(ExecutionMode::EventLoop),
            "worker" => Ok(ExecutionMode::Worker),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Route registration error.
#[derive(Debug)]
pub enum RouterError {
    /// Malformed pattern.
    Pattern(PatternSyntaxError),
    /// `dispatch_named` with a name no executor was registered under.
    UnknownExecutor(String),
    /// Context path with variables or a wildcard.
    InvalidContextPath(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Pattern(e) => write!(f, "{}", e),
            RouterError::UnknownExecutor(name) => write!(f, "unknown executor: {}", name),
            RouterError::InvalidContextPath(path) => {
                write!(f, "context path must be a static path: {}", path)
            }
        }
    }
}

impl StdError for RouterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RouterError::Pattern(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PatternSyntaxError> for RouterError {
    fn from(e: PatternSyntaxError) -> Self {
        RouterError::Pattern(e)
    }
}

/// Registration state inherited by nested scopes.
#[derive(Clone, Default)]
struct Scope {
    prefix: String,
    steps: Vec<Step>,
    dispatch: Option<DispatchTarget>,
}

/// Build-time route registry.
///
/// Steps added with [`before`](Router::before), [`after`](Router::after),
/// [`decorator`](Router::decorator) and [`step`](Router::step) apply to
/// routes registered after them in the same scope. Scopes opened with
/// [`group`](Router::group), [`path`](Router::path) and the dispatch
/// methods restore the outer state when their body returns.
pub struct Router {
    table: RouteTable,
    scope: Scope,
    errors: ErrorChain,
    attributes: Arc<Attributes>,
    services: Arc<ServiceRegistry>,
    executors: HashMap<String, Arc<dyn Executor>>,
    hooks: Hooks,
    context_path: String,
    mode: ExecutionMode,
}

impl Router {
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            table: RouteTable::new(options),
            scope: Scope::default(),
            errors: ErrorChain::new(),
            attributes: Arc::new(Attributes::new()),
            services: Arc::new(ServiceRegistry::new()),
            executors: HashMap::new(),
            hooks: Hooks::default(),
            context_path: String::new(),
            mode: ExecutionMode::default(),
        }
    }

    /// Router with options, context path and execution mode from config.
    pub fn from_config(config: &RouterConfig) -> Result<Self, RouterError> {
        let mut router = Self::with_options(RouterOptions {
            ignore_case: config.ignore_case,
            ignore_trailing_slash: config.ignore_trailing_slash,
        });
        router.set_context_path(&config.context_path)?;
        router.set_execution_mode(config.execution_mode);
        Ok(router)
    }

    /// Base path for routes registered from now on.
    pub fn set_context_path(&mut self, path: &str) -> Result<&mut Self, RouterError> {
        let compiled = compile(path)?;
        if !compiled.is_static() {
            return Err(RouterError::InvalidContextPath(path.to_string()));
        }
        self.context_path = match no_trailing_slash(compiled.as_str()) {
            "/" => String::new(),
            base => base.to_string(),
        };
        Ok(self)
    }

    pub fn context_path(&self) -> &str {
        if self.context_path.is_empty() {
            "/"
        } else {
            &self.context_path
        }
    }

    /// Default execution for routes registered from now on.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    // ------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------

    /// Register a route for `method`.
    pub fn route<F, R>(
        &mut self,
        method: RouteMethod,
        pattern: &str,
        f: F,
    ) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.add_route(method, pattern, handler(f))
    }

    pub fn get<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Get, pattern, f)
    }

    pub fn post<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Post, pattern, f)
    }

    pub fn put<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Put, pattern, f)
    }

    pub fn delete<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Delete, pattern, f)
    }

    pub fn patch<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Patch, pattern, f)
    }

    pub fn head<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Head, pattern, f)
    }

    pub fn options<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Options, pattern, f)
    }

    pub fn trace<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Trace, pattern, f)
    }

    /// Route matched for `GET` requests asking for a WebSocket upgrade.
    pub fn ws<F, R>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: IntoResponse,
    {
        self.route(RouteMethod::Ws, pattern, f)
    }

    /// Server-sent events route, matched for `GET`. A plain `GET` route on
    /// the same path wins unless the request accepts `text/event-stream`.
    ///
    /// The handler gets an [`SseEmitter`] and returns immediately; events
    /// are sent from wherever the emitter ends up. Inline handlers run on
    /// the event loop and must not use [`SseEmitter::send_blocking`].
    pub fn sse<F>(&mut self, pattern: &str, f: F) -> Result<&mut Route, RouterError>
    where
        F: Fn(&mut Context, SseEmitter) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: &mut Context| {
            let (emitter, stream) = sse::channel(SSE_BUFFER);
            f(ctx, emitter)?;
            Ok(Response::event_stream(stream))
        });
        self.add_route(RouteMethod::Sse, pattern, handler)
    }

    fn add_route(
        &mut self,
        method: RouteMethod,
        pattern: &str,
        handler: Handler,
    ) -> Result<&mut Route, RouterError> {
        let full = self.join(&self.scope.prefix, pattern);
        let mut route = Route::new(method, compile(&full)?, handler);
        route.set_steps(self.scope.steps.clone());
        route.set_dispatch(self.default_dispatch());

        debug!(
            method = %method,
            route = %route.pattern(),
            dispatch = route.dispatch_target().map(DispatchTarget::name),
            "route registered"
        );

        let index = self.table.add(route);
        Ok(self.table.route_mut(index))
    }

    fn default_dispatch(&self) -> Option<DispatchTarget> {
        self.scope.dispatch.clone().or(match self.mode {
            ExecutionMode::Worker => Some(DispatchTarget::Worker),
            ExecutionMode::EventLoop => None,
        })
    }

    /// Context path + scope prefix + pattern.
    fn join(&self, prefix: &str, pattern: &str) -> String {
        let base = format!("{}{}", self.context_path, prefix);
        if pattern.is_empty() || pattern == "/" {
            return if base.is_empty() {
                "/".to_string()
            } else {
                base
            };
        }
        normalize_path(&format!("{}{}", base, leading_slash(pattern))).into_owned()
    }

    // ------------------------------------------------------------------
    // Scoped steps
    // ------------------------------------------------------------------

    pub fn before<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<Flow, HandlerError> + Send + Sync + 'static,
    {
        self.step(Step::before(f))
    }

    pub fn after<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Response) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.step(Step::after(f))
    }

    pub fn decorator<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Next<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.step(Step::decorator(f))
    }

    /// Add any step to the current scope; error steps become route-scoped
    /// error handlers.
    pub fn step(&mut self, step: Step) -> &mut Self {
        self.scope.steps.push(step);
        self
    }

    // ------------------------------------------------------------------
    // Error handling
    // ------------------------------------------------------------------

    /// Global error handler for every error.
    pub fn error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        self.errors.push(ErrorMatcher::Any, Arc::new(f));
        self
    }

    /// Global error handler for one status code.
    pub fn error_for_status<F>(&mut self, status: StatusCode, f: F) -> &mut Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        self.errors.push(ErrorMatcher::Status(status), Arc::new(f));
        self
    }

    /// Global error handler for errors of type `E` anywhere in the source
    /// chain.
    pub fn error_for<E, F>(&mut self, f: F) -> &mut Self
    where
        E: StdError + 'static,
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        self.errors.push(ErrorMatcher::of_type::<E>(), Arc::new(f));
        self
    }

    pub fn error_when<P, F>(&mut self, predicate: P, f: F) -> &mut Self
    where
        P: Fn(&HandlerError, StatusCode) -> bool + Send + Sync + 'static,
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Option<Response> + Send + Sync + 'static,
    {
        self.errors
            .push(ErrorMatcher::Predicate(Arc::new(predicate)), Arc::new(f));
        self
    }

    /// Map errors of type `E` to `status`.
    pub fn error_code<E: StdError + 'static>(&mut self, status: StatusCode) -> &mut Self {
        self.errors.codes_mut().insert::<E>(status);
        self
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Nested scope: steps added inside stay inside.
    pub fn group<F>(&mut self, body: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        self.scoped(|_| {}, body)
    }

    /// Nested scope under a path prefix.
    pub fn path<F>(&mut self, prefix: &str, body: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        let prefix = match no_trailing_slash(&normalize_path(prefix)) {
            "/" => String::new(),
            p => p.to_string(),
        };
        self.scoped(move |scope| scope.prefix.push_str(&prefix), body)
    }

    /// Routes registered in `body` run on the default worker pool.
    pub fn dispatch<F>(&mut self, body: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        self.dispatch_with(DispatchTarget::Worker, body)
    }

    /// Routes registered in `body` run on `executor`.
    pub fn dispatch_to<F>(
        &mut self,
        executor: Arc<dyn Executor>,
        body: F,
    ) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        self.dispatch_with(DispatchTarget::Executor(executor), body)
    }

    /// Routes registered in `body` run on the executor registered as `name`.
    pub fn dispatch_named<F>(&mut self, name: &str, body: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        let executor = self
            .executors
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownExecutor(name.to_string()))?;
        self.dispatch_to(executor, body)
    }

    fn dispatch_with<F>(&mut self, target: DispatchTarget, body: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        self.scoped(
            move |scope| match &scope.dispatch {
                Some(outer) => debug!(
                    outer = outer.name(),
                    ignored = target.name(),
                    "nested dispatch ignored"
                ),
                None => scope.dispatch = Some(target),
            },
            body,
        )
    }

    fn scoped<S, F>(&mut self, setup: S, body: F) -> Result<&mut Self, RouterError>
    where
        S: FnOnce(&mut Scope),
        F: FnOnce(&mut Router) -> Result<(), RouterError>,
    {
        let saved = self.scope.clone();
        setup(&mut self.scope);
        let result = body(self);
        self.scope = saved;
        result.map(|()| self)
    }

    /// Import every route of `other` under `prefix`.
    ///
    /// Imported routes get this scope's steps ahead of their own. An
    /// enclosing dispatch scope replaces their dispatch target; otherwise
    /// they keep it. Error handlers, error codes, executors and hooks of
    /// `other` are appended to ours. Attributes and services of `other` are
    /// copied unless we already hold the same key.
    pub fn mount(&mut self, prefix: &str, other: Router) -> Result<&mut Self, RouterError> {
        let prefix = match no_trailing_slash(&normalize_path(prefix)) {
            "/" => String::new(),
            p => p.to_string(),
        };
        let base = format!("{}{}", self.scope.prefix, prefix);

        for route in other.table.routes() {
            let pattern = compile(&self.join(&base, route.pattern().as_str()))?;
            let mut mounted = route.with_pattern(pattern);

            let mut steps = self.scope.steps.clone();
            steps.extend_from_slice(route.steps());
            mounted.set_steps(steps);
            if self.scope.dispatch.is_some() || mounted.dispatch_target().is_none() {
                mounted.set_dispatch(self.default_dispatch());
            }
            self.table.add(mounted);
        }

        self.attributes.absorb(&other.attributes);
        self.services.absorb(&other.services);
        self.errors.extend(other.errors);
        self.executors.extend(other.executors);
        self.hooks.extend(other.hooks);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Registries and hooks
    // ------------------------------------------------------------------

    /// Register a named executor for [`dispatch_named`](Router::dispatch_named).
    pub fn executor(&mut self, name: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(name.into(), executor);
        self
    }

    /// Set an application attribute.
    pub fn attribute<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        value: T,
    ) -> &mut Self {
        self.attributes.set(name, value);
        self
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Runs after the worker pool exists and before the socket is bound.
    pub fn on_start<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&App) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.start.push(Box::new(f));
        self
    }

    /// Runs once the server accepts connections.
    pub fn on_ready<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&App) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.ready.push(Box::new(f));
        self
    }

    /// Runs first thing on shutdown.
    pub fn on_stop<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&App) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.stop.push(Box::new(f));
        self
    }

    /// Runs once per closed connection.
    pub fn on_connection_close<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.hooks.connection_close.push(Box::new(f));
        self
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        self.table.routes()
    }

    /// Freeze the router.
    pub fn into_app(self) -> App {
        App::new(
            self.table,
            self.errors,
            self.attributes,
            self.services,
            self.hooks,
            self.context_path,
        )
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.table.len())
            .field("context_path", &self.context_path())
            .field("mode", &self.mode)
            .finish()
    }
}

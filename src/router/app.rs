//! Frozen router shared by the runtime.

use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use http::header;
use http::{Method, StatusCode};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::route::{Route, RouteMethod};
use super::table::{RouteMatch, RouteTable};
use crate::core::{Attributes, Context, HandlerError, Request, Response, ServiceRegistry};
use crate::executor::{DispatchTarget, Executor, PoolError};
use crate::pipeline::{self, ErrorChain};

/// Error returned by a lifecycle hook.
pub type HookError = Box<dyn StdError + Send + Sync>;

type Hook = Box<dyn Fn(&App) -> Result<(), HookError> + Send + Sync>;
type ConnectionListener = Box<dyn Fn(SocketAddr) + Send + Sync>;

/// Lifecycle hooks, fired in registration order.
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) start: Vec<Hook>,
    pub(crate) ready: Vec<Hook>,
    pub(crate) stop: Vec<Hook>,
    pub(crate) connection_close: Vec<ConnectionListener>,
}

impl Hooks {
    pub(crate) fn extend(&mut self, other: Hooks) {
        self.start.extend(other.start);
        self.ready.extend(other.ready);
        self.stop.extend(other.stop);
        self.connection_close.extend(other.connection_close);
    }
}

/// Lifecycle phase of a hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    Ready,
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Start => "start",
            Phase::Ready => "ready",
            Phase::Stop => "stop",
        })
    }
}

/// Read-only application: route table, error chain and shared state.
pub struct App {
    table: RouteTable,
    errors: ErrorChain,
    attributes: Arc<Attributes>,
    services: Arc<ServiceRegistry>,
    hooks: Hooks,
    context_path: String,
    worker: OnceLock<Arc<dyn Executor>>,
}

impl App {
    pub(crate) fn new(
        table: RouteTable,
        errors: ErrorChain,
        attributes: Arc<Attributes>,
        services: Arc<ServiceRegistry>,
        hooks: Hooks,
        context_path: String,
    ) -> Self {
        Self {
            table,
            errors,
            attributes,
            services,
            hooks,
            context_path,
            worker: OnceLock::new(),
        }
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        self.table.routes()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn context_path(&self) -> &str {
        if self.context_path.is_empty() {
            "/"
        } else {
            &self.context_path
        }
    }

    /// Default worker pool for `DispatchTarget::Worker`. Set once.
    pub(crate) fn attach_worker(&self, worker: Arc<dyn Executor>) {
        if self.worker.set(worker).is_err() {
            warn!("worker pool already attached");
        }
    }

    /// Run the hooks of `phase`, stopping at the first failure.
    pub(crate) fn fire(&self, phase: Phase) -> Result<(), HookError> {
        let hooks = match phase {
            Phase::Start => &self.hooks.start,
            Phase::Ready => &self.hooks.ready,
            Phase::Stop => &self.hooks.stop,
        };
        for (index, hook) in hooks.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(phase = %phase, hook = index, error = %e, "hook failed");
                    return Err(e);
                }
                Err(payload) => {
                    let e = HandlerError::panic(payload).into_inner();
                    error!(phase = %phase, hook = index, error = %e, "hook panicked");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Run every stop hook; failures are logged and skipped.
    pub(crate) fn fire_stop(&self) {
        for (index, hook) in self.hooks.stop.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(hook = index, error = %e, "stop hook failed"),
                Err(_) => warn!(hook = index, "stop hook panicked"),
            }
        }
    }

    pub(crate) fn fire_connection_close(&self, remote: SocketAddr) {
        for listener in &self.hooks.connection_close {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(remote))).is_err() {
                warn!(remote = %remote, "connection close listener panicked");
            }
        }
    }

    /// Match a request.
    ///
    /// `GET` tries WebSocket and SSE routes first when the headers ask for
    /// them, and reaches SSE routes after plain `GET` routes otherwise.
    /// `HEAD` falls back to `GET`. A path that matches only under other
    /// methods resolves to the method-not-allowed route.
    pub fn resolve(&self, request: &Request) -> RouteMatch {
        let path = request.path();
        for method in candidate_methods(request) {
            let found = self.table.find(method, path);
            if found.matched() {
                return found;
            }
        }

        let elsewhere = self
            .table
            .allowed_methods(path)
            .into_iter()
            .any(|method| method != RouteMethod::Ws);
        if elsewhere {
            RouteMatch::method_not_allowed()
        } else {
            RouteMatch::not_found()
        }
    }

    /// Context for `request` bound to its route.
    fn context(&self, request: Request, remote: Option<SocketAddr>) -> Context {
        let found = self.resolve(&request);
        let not_allowed = found.route().is_method_not_allowed();
        let (route, vars) = found.into_parts();

        let mut ctx = Context::builder(request)
            .route(route)
            .vars(vars)
            .remote_addr(remote)
            .attributes(Arc::clone(&self.attributes))
            .services(Arc::clone(&self.services))
            .build();

        if not_allowed {
            let allow = self.allow_header(ctx.path());
            ctx.set_response_header(header::ALLOW.as_str(), allow);
        }
        ctx
    }

    fn allow_header(&self, path: &str) -> String {
        let mut methods: Vec<&str> = Vec::new();
        for method in self.table.allowed_methods(path) {
            match method {
                RouteMethod::Ws => continue,
                RouteMethod::Get | RouteMethod::Sse => methods.extend(["GET", "HEAD"]),
                other => methods.push(other.as_str()),
            }
        }
        methods.sort_unstable();
        methods.dedup();
        methods.join(", ")
    }

    /// Run a request inline on the calling thread, ignoring dispatch.
    pub fn call(&self, request: Request) -> Response {
        let mut ctx = self.context(request, None);
        self.execute(&mut ctx)
    }

    /// Run a request, handing dispatched routes to their executor.
    ///
    /// The response always comes back to the calling task.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        request: Request,
        remote: Option<SocketAddr>,
    ) -> Response {
        let mut ctx = self.context(request, remote);
        let route = Arc::clone(ctx.route());

        let executor = match route.dispatch_target() {
            None => return self.execute(&mut ctx),
            Some(DispatchTarget::Executor(executor)) => Arc::clone(executor),
            Some(DispatchTarget::Worker) => match self.worker.get() {
                Some(worker) => Arc::clone(worker),
                None => {
                    debug!(route = %route, "no worker pool attached, running inline");
                    return self.execute(&mut ctx);
                }
            },
        };

        let slot = Arc::new(Mutex::new(Some(ctx)));
        let (tx, rx) = oneshot::channel();

        let job_slot = Arc::clone(&slot);
        let app = Arc::clone(self);
        let submitted = executor.submit(Box::new(move || {
            let taken = job_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(mut ctx) = taken {
                let response = app.execute(&mut ctx);
                let _ = tx.send(response);
            }
        }));

        if let Err(e) = submitted {
            warn!(
                route = %route,
                pool = executor.name(),
                error = %e,
                "dispatch rejected"
            );
            let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            return match taken {
                Some(mut ctx) => self.reject(&mut ctx, e),
                None => unavailable(),
            };
        }

        match rx.await {
            Ok(response) => response,
            Err(_) => {
                error!(route = %route, pool = executor.name(), "dispatched job dropped");
                unavailable()
            }
        }
    }

    fn reject(&self, ctx: &mut Context, e: PoolError) -> Response {
        let route = Arc::clone(ctx.route());
        let response = self.errors.render(ctx, &route, e.into());
        self.finish(ctx, response)
    }

    /// Pipeline, error chain and response headers for a bound context.
    fn execute(&self, ctx: &mut Context) -> Response {
        let route = Arc::clone(ctx.route());
        let response = match pipeline::execute(&route, ctx) {
            Ok(response) => response,
            Err(e) => self.errors.render(ctx, &route, e),
        };
        self.finish(ctx, response)
    }

    fn finish(&self, ctx: &mut Context, mut response: Response) -> Response {
        let headers = ctx.take_response_headers();
        for (name, value) in headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        if ctx.method() == Method::HEAD {
            response.strip_body();
        }
        response
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.table.len())
            .field("context_path", &self.context_path())
            .field("worker", &self.worker.get().map(|w| w.name().to_string()))
            .finish()
    }
}

fn candidate_methods(request: &Request) -> Vec<RouteMethod> {
    let method = request.method();
    if method == Method::GET {
        if request.is_websocket_upgrade() {
            return vec![RouteMethod::Ws, RouteMethod::Get, RouteMethod::Sse];
        }
        if request.accepts_event_stream() {
            return vec![RouteMethod::Sse, RouteMethod::Get];
        }
        return vec![RouteMethod::Get, RouteMethod::Sse];
    }
    if method == Method::HEAD {
        return vec![RouteMethod::Head, RouteMethod::Get, RouteMethod::Sse];
    }
    RouteMethod::from_http(method).into_iter().collect()
}

/// 503 built without a context, for jobs lost inside an executor.
fn unavailable() -> Response {
    let status = StatusCode::SERVICE_UNAVAILABLE;
    Response::json(&serde_json::json!({
        "message": status.canonical_reason(),
        "status": status.as_u16(),
        "reason": status.canonical_reason(),
    }))
    .with_status(status)
    .with_header(header::RETRY_AFTER.as_str(), "1")
}

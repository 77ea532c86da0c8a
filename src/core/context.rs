//! Per-request context handed to every route step.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::percent_decode_str;

use super::error::HandlerError;
use super::registry::{Attributes, ServiceRegistry};
use super::request::Request;
use crate::router::{MissingValueError, PathVars, Route};

thread_local! {
    static IO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as an event-loop thread.
pub(crate) fn mark_io_thread() {
    IO_THREAD.with(|flag| flag.set(true));
}

/// True when called from an event-loop thread.
pub fn is_io_thread() -> bool {
    IO_THREAD.with(Cell::get)
}

/// Request context shared across the steps of one route pipeline.
///
/// Carries the request, the matched route and its path variables, handles
/// to application attributes and services, headers to add to the final
/// response, and a typed key-value store for step communication.
pub struct Context {
    request: Request,
    route: Arc<Route>,
    vars: PathVars,
    remote_addr: Option<SocketAddr>,

    /// Request id (from `X-Request-ID` or generated).
    pub request_id: String,

    /// Request start time.
    pub started_at: Instant,

    attributes: Arc<Attributes>,
    services: Arc<ServiceRegistry>,
    response_headers: HeaderMap,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Context bound to the not-found route, with empty registries.
    pub fn new(request: Request) -> Self {
        ContextBuilder::new(request).build()
    }

    #[inline]
    pub fn builder(request: Request) -> ContextBuilder {
        ContextBuilder::new(request)
    }

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[inline]
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[inline]
    pub fn method(&self) -> &http::Method {
        self.request.method()
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// The route being executed.
    #[inline]
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    #[inline]
    pub fn path_vars(&self) -> &PathVars {
        &self.vars
    }

    /// Raw (decoded) path variable.
    #[inline]
    pub fn path_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name)
    }

    /// Path variable converted with `FromStr`.
    ///
    /// A missing variable or a failed conversion is reported as a client
    /// error by the default error codes.
    pub fn path_param<T>(&self, name: &str) -> Result<T, HandlerError>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self.vars.get(name).ok_or_else(|| MissingValueError {
            key: name.to_string(),
        })?;
        Ok(raw.parse::<T>()?)
    }

    /// First query parameter named `name`, decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.request.query()?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key) == name).then(|| decode_component(value))
        })
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[inline]
    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    /// Application attribute of type `T`.
    pub fn attribute<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.attributes.get(name)
    }

    #[inline]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Registered service of type `T`, or a 500 error.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, HandlerError> {
        self.services.get::<T>().ok_or_else(|| {
            HandlerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("service not registered: {}", std::any::type_name::<T>()),
            )
        })
    }

    /// True when running on an event-loop thread.
    ///
    /// Blocking calls should happen only when this is false.
    #[inline]
    pub fn is_in_io_thread(&self) -> bool {
        is_io_thread()
    }

    /// Set a custom value.
    #[inline]
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    /// Get a custom value.
    #[inline]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    /// Get a mutable reference to a custom value.
    #[inline]
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut())
    }

    /// Remove a custom value.
    #[inline]
    pub fn remove<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Add a header to the final response, whatever step produces it.
    pub fn set_response_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.response_headers.insert(name, value);
        }
    }

    #[inline]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub(crate) fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get elapsed time in milliseconds.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Builder for creating a Context bound to a route.
pub struct ContextBuilder {
    request: Request,
    route: Option<Arc<Route>>,
    vars: PathVars,
    remote_addr: Option<SocketAddr>,
    attributes: Option<Arc<Attributes>>,
    services: Option<Arc<ServiceRegistry>>,
}

impl ContextBuilder {
    #[inline]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            route: None,
            vars: PathVars::default(),
            remote_addr: None,
            attributes: None,
            services: None,
        }
    }

    #[inline]
    pub fn route(mut self, route: Arc<Route>) -> Self {
        self.route = Some(route);
        self
    }

    #[inline]
    pub fn vars(mut self, vars: PathVars) -> Self {
        self.vars = vars;
        self
    }

    #[inline]
    pub fn remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    #[inline]
    pub fn attributes(mut self, attributes: Arc<Attributes>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    #[inline]
    pub fn services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn build(self) -> Context {
        let request_id = self
            .request
            .request_id()
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);

        Context {
            request: self.request,
            route: self.route.unwrap_or_else(Route::not_found),
            vars: self.vars,
            remote_addr: self.remote_addr,
            request_id,
            started_at: Instant::now(),
            attributes: self.attributes.unwrap_or_default(),
            services: self.services.unwrap_or_default(),
            response_headers: HeaderMap::new(),
            values: HashMap::new(),
        }
    }
}

/// Short random request id (16 hex chars).
pub fn generate_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

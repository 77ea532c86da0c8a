//! Error status mapping, error handler chain and the default error page.

use std::error::Error as StdError;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::panic::{self, AssertUnwindSafe};
use std::str::ParseBoolError;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error, warn};

use super::{ErrorHandlerFn, Step};
use crate::core::{Context, HandlerError, Request, Response, StatusError};
use crate::executor::PoolError;
use crate::router::{MissingValueError, Route};

type StatusMapper = Box<dyn Fn(&(dyn StdError + 'static)) -> Option<StatusCode> + Send + Sync>;

/// Maps error types to HTTP status codes.
///
/// The whole source chain of an error is searched; at each level the most
/// recently registered mapping wins. Unmapped errors are 500.
pub struct ErrorCodes {
    mappers: Vec<StatusMapper>,
}

impl ErrorCodes {
    /// Mappings for the crate's own errors and std parse errors.
    pub fn new() -> Self {
        let mut codes = Self::empty();
        codes.insert::<ParseIntError>(StatusCode::BAD_REQUEST);
        codes.insert::<ParseFloatError>(StatusCode::BAD_REQUEST);
        codes.insert::<ParseBoolError>(StatusCode::BAD_REQUEST);
        codes.insert::<MissingValueError>(StatusCode::BAD_REQUEST);
        codes.insert_with(|err| {
            err.downcast_ref::<PoolError>()
                .map(|_| StatusCode::SERVICE_UNAVAILABLE)
        });
        codes.insert_with(|err| err.downcast_ref::<StatusError>().map(|e| e.status));
        codes
    }

    /// No mappings at all.
    pub fn empty() -> Self {
        Self {
            mappers: Vec::new(),
        }
    }

    /// Map every `E` to `status`.
    pub fn insert<E: StdError + 'static>(&mut self, status: StatusCode) {
        self.insert_with(move |err| err.is::<E>().then_some(status));
    }

    /// Custom mapping, tried before earlier ones.
    pub fn insert_with<F>(&mut self, mapper: F)
    where
        F: Fn(&(dyn StdError + 'static)) -> Option<StatusCode> + Send + Sync + 'static,
    {
        self.mappers.push(Box::new(mapper));
    }

    /// Status for `err`: explicit status first, then mappings, then 500.
    pub fn status_of(&self, err: &HandlerError) -> StatusCode {
        if let Some(status) = err.explicit_status() {
            return status;
        }

        let mut current: Option<&(dyn StdError + 'static)> = Some(err.source_error());
        while let Some(e) = current {
            if let Some(status) = self.mappers.iter().rev().find_map(|mapper| mapper(e)) {
                return status;
            }
            current = e.source();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects which errors a global error handler receives.
#[derive(Clone)]
pub enum ErrorMatcher {
    Any,
    Status(StatusCode),
    Predicate(Arc<dyn Fn(&HandlerError, StatusCode) -> bool + Send + Sync>),
}

impl ErrorMatcher {
    /// Errors of type `E` anywhere in the source chain.
    pub fn of_type<E: StdError + 'static>() -> Self {
        ErrorMatcher::Predicate(Arc::new(|err: &HandlerError, _| err.is::<E>()))
    }

    pub fn matches(&self, err: &HandlerError, status: StatusCode) -> bool {
        match self {
            ErrorMatcher::Any => true,
            ErrorMatcher::Status(expected) => *expected == status,
            ErrorMatcher::Predicate(predicate) => predicate(err, status),
        }
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMatcher::Any => f.write_str("Any"),
            ErrorMatcher::Status(status) => write!(f, "Status({})", status.as_u16()),
            ErrorMatcher::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Global error handlers plus the status mapping.
///
/// Handlers are tried in registration order; the first one returning a
/// response wins. Route-scoped error steps are tried before all of them.
#[derive(Default)]
pub struct ErrorChain {
    handlers: Vec<(ErrorMatcher, ErrorHandlerFn)>,
    codes: ErrorCodes,
}

impl ErrorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, matcher: ErrorMatcher, handler: ErrorHandlerFn) {
        self.handlers.push((matcher, handler));
    }

    pub fn codes(&self) -> &ErrorCodes {
        &self.codes
    }

    pub fn codes_mut(&mut self) -> &mut ErrorCodes {
        &mut self.codes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Append the handlers of `other` after ours.
    pub(crate) fn extend(&mut self, other: ErrorChain) {
        self.handlers.extend(other.handlers);
        self.codes.mappers.extend(other.codes.mappers);
    }

    /// Turn a pipeline error into a response.
    pub fn render(&self, ctx: &mut Context, route: &Route, err: HandlerError) -> Response {
        let status = self.codes.status_of(&err);
        log_error(ctx, route, &err, status);

        let scoped = route.steps().iter().filter_map(|step| match step {
            Step::ErrorHandler(handler) => Some(handler),
            _ => None,
        });
        for handler in scoped {
            if let Some(response) = call_handler(handler, ctx, &err, status) {
                return response;
            }
        }

        for (matcher, handler) in &self.handlers {
            if !matcher.matches(&err, status) {
                continue;
            }
            if let Some(response) = call_handler(handler, ctx, &err, status) {
                return response;
            }
        }

        default_error_response(ctx.request(), &err, status)
    }
}

fn call_handler(
    handler: &ErrorHandlerFn,
    ctx: &mut Context,
    err: &HandlerError,
    status: StatusCode,
) -> Option<Response> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, err, status))) {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %ctx.path(), "error handler panicked, trying next");
            None
        }
    }
}

fn log_error(ctx: &Context, route: &Route, err: &HandlerError, status: StatusCode) {
    if status.is_server_error() {
        error!(
            method = %ctx.method(),
            path = %ctx.path(),
            route = %route.pattern(),
            status = status.as_u16(),
            request_id = %ctx.request_id,
            error = %err,
            "request failed"
        );
    } else {
        debug!(
            method = %ctx.method(),
            path = %ctx.path(),
            route = %route.pattern(),
            status = status.as_u16(),
            error = %err,
            "request rejected"
        );
    }
}

/// HTML when the client lists `text/html`, JSON otherwise.
///
/// Server errors only expose the reason phrase.
pub fn default_error_response(request: &Request, err: &HandlerError, status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Unknown Status");
    let message = if status.is_server_error() {
        reason.to_string()
    } else {
        err.to_string()
    };

    if request.accepts_html() {
        let body = format!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{code} {reason}</title>\n</head>\n\
             <body>\n<h1>{reason}</h1>\n<p>{message}</p>\n<hr>\n<p>status code: {code}</p>\n</body>\n</html>\n",
            code = status.as_u16(),
            reason = reason,
            message = escape_html(&message),
        );
        Response::html(body).with_status(status)
    } else {
        Response::json(&serde_json::json!({
            "message": message,
            "status": status.as_u16(),
            "reason": reason,
        }))
        .with_status(status)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handler;
    use crate::router::{compile, RouteMethod};
    use bytes::Bytes;

    #[derive(Debug)]
    struct Conflict;

    impl fmt::Display for Conflict {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("conflict")
        }
    }

    impl StdError for Conflict {}

    #[derive(Debug)]
    struct Wrapper(Conflict);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("wrapped")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn context(accept: &str) -> Context {
        let req = http::Request::builder()
            .uri("/x")
            .header("accept", accept)
            .body(Bytes::new())
            .unwrap();
        Context::new(Request::from(req))
    }

    fn route() -> Route {
        Route::new(
            RouteMethod::Get,
            compile("/x").unwrap(),
            handler(|_ctx: &mut Context| Ok("")),
        )
    }

    #[test]
    fn test_builtin_codes() {
        let codes = ErrorCodes::new();

        let err: HandlerError = "x".parse::<i32>().unwrap_err().into();
        assert_eq!(codes.status_of(&err), StatusCode::BAD_REQUEST);

        let err: HandlerError = MissingValueError { key: "id".into() }.into();
        assert_eq!(codes.status_of(&err), StatusCode::BAD_REQUEST);

        let err: HandlerError = PoolError::Shutdown.into();
        assert_eq!(codes.status_of(&err), StatusCode::SERVICE_UNAVAILABLE);

        let err: HandlerError = StatusError::new(StatusCode::GONE).into();
        assert_eq!(codes.status_of(&err), StatusCode::GONE);

        let err: HandlerError = Conflict.into();
        assert_eq!(codes.status_of(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_custom_codes_follow_source_chain() {
        let mut codes = ErrorCodes::new();
        codes.insert::<Conflict>(StatusCode::CONFLICT);

        let err: HandlerError = Wrapper(Conflict).into();
        assert_eq!(codes.status_of(&err), StatusCode::CONFLICT);

        // explicit status beats the mapping
        let err = HandlerError::from(Conflict).with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(codes.status_of(&err), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_later_mapping_wins() {
        let mut codes = ErrorCodes::new();
        codes.insert::<ParseIntError>(StatusCode::UNPROCESSABLE_ENTITY);

        let err: HandlerError = "x".parse::<i32>().unwrap_err().into();
        assert_eq!(codes.status_of(&err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_chain_order() {
        let mut chain = ErrorChain::new();
        chain.push(
            ErrorMatcher::Status(StatusCode::NOT_FOUND),
            Arc::new(|_, _, _| Some(Response::ok("not found handler"))),
        );
        chain.push(
            ErrorMatcher::of_type::<Conflict>(),
            Arc::new(|_, _, status| Some(Response::ok("conflict handler").with_status(status))),
        );
        chain.push(ErrorMatcher::Any, Arc::new(|_, _, _| None));

        let response = chain.render(
            &mut context("*/*"),
            &route(),
            HandlerError::status(StatusCode::NOT_FOUND),
        );
        assert_eq!(response.body().as_ref(), b"not found handler");

        let response = chain.render(&mut context("*/*"), &route(), Conflict.into());
        assert_eq!(response.body().as_ref(), b"conflict handler");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Any handler declines, so the default responder answers
        let response = chain.render(
            &mut context("application/json"),
            &route(),
            HandlerError::status(StatusCode::FORBIDDEN),
        );
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.content_type(), Some("application/json"));
    }

    #[test]
    fn test_route_scoped_handler_first() {
        let mut chain = ErrorChain::new();
        chain.push(ErrorMatcher::Any, Arc::new(|_, _, _| Some(Response::ok("global"))));

        let mut route = route();
        route.push_step(Step::error_handler(|_, _, _| Some(Response::ok("scoped"))));

        let response = chain.render(&mut context("*/*"), &route, HandlerError::msg("x"));
        assert_eq!(response.body().as_ref(), b"scoped");
    }

    #[test]
    fn test_panicking_error_handler_is_skipped() {
        let mut chain = ErrorChain::new();
        chain.push(ErrorMatcher::Any, Arc::new(|_, _, _| panic!("bad handler")));
        chain.push(ErrorMatcher::Any, Arc::new(|_, _, _| Some(Response::ok("second"))));

        let response = chain.render(&mut context("*/*"), &route(), HandlerError::msg("x"));
        assert_eq!(response.body().as_ref(), b"second");
    }

    #[test]
    fn test_default_json_response() {
        let ctx = context("application/json");
        let response = default_error_response(
            ctx.request(),
            &HandlerError::new(StatusCode::BAD_REQUEST, "bad id"),
            StatusCode::BAD_REQUEST,
        );

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["message"], "bad id");
        assert_eq!(body["status"], 400);
        assert_eq!(body["reason"], "Bad Request");
    }

    #[test]
    fn test_wildcard_accept_gets_json() {
        let ctx = context("*/*");
        let response = default_error_response(
            ctx.request(),
            &HandlerError::status(StatusCode::NOT_FOUND),
            StatusCode::NOT_FOUND,
        );

        assert_eq!(response.content_type(), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], 404);
    }

    #[test]
    fn test_default_html_response_escapes() {
        let ctx = context("text/html");
        let response = default_error_response(
            ctx.request(),
            &HandlerError::new(StatusCode::NOT_FOUND, "<script>"),
            StatusCode::NOT_FOUND,
        );

        let body = String::from_utf8_lossy(response.body()).into_owned();
        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("status code: 404"));
    }

    #[test]
    fn test_server_errors_hide_message() {
        let ctx = context("application/json");
        let response = default_error_response(
            ctx.request(),
            &HandlerError::msg("db password wrong"),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        let body = String::from_utf8_lossy(response.body()).into_owned();
        assert!(!body.contains("password"));
        assert!(body.contains("Internal Server Error"));
    }
}

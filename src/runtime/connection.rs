//! Per-connection serving on the event loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode, Uri, Version};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::core::{Body, Request, Response};
use crate::logging::{self, AccessRecord, CivilTime};
use crate::router::App;

/// Body type written to hyper.
pub(crate) type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

static SERVER_NAME: HeaderValue =
    HeaderValue::from_static(concat!("tokio_dispatch/", env!("CARGO_PKG_VERSION")));

/// State shared by every connection of one runtime.
pub(crate) struct ConnectionContext {
    pub(crate) app: Arc<App>,
    pub(crate) active: Arc<AtomicUsize>,
    max_request_size: usize,
    sse_keep_alive: Duration,
    default_headers: bool,
    access_log: bool,
}

impl ConnectionContext {
    pub(crate) fn new(app: Arc<App>, active: Arc<AtomicUsize>, config: &ServerConfig) -> Self {
        Self {
            app,
            active,
            max_request_size: config.max_request_size,
            sse_keep_alive: config.sse_keep_alive,
            default_headers: config.default_headers,
            access_log: config.access_log,
        }
    }

    async fn handle(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
        remote: SocketAddr,
    ) -> hyper::Response<ResponseBody> {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let line = self.access_log.then(|| RequestLine {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });

        let response = match self.read_body(&parts.headers, body).await {
            Ok(bytes) => {
                let request = Request::from(http::Request::from_parts(parts, bytes));
                self.app.dispatch(request, Some(remote)).await
            }
            Err(status) => status_response(status),
        };

        if let Some(line) = line {
            logging::log_access(&AccessRecord {
                remote: Some(remote),
                method: line.method.as_str(),
                path: line.uri.path(),
                query: line.uri.query(),
                http: version_str(line.version),
                status: response.status().as_u16(),
                duration: started.elapsed(),
                user_agent: line.user_agent.as_deref(),
            });
        }

        self.into_hyper(response)
    }

    /// Collect the request body, rejecting anything over the size limit.
    pub(crate) async fn read_body<B>(&self, headers: &HeaderMap, body: B) -> Result<Bytes, StatusCode>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_request_size as u64) {
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }

        match Limited::new(body, self.max_request_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(StatusCode::PAYLOAD_TOO_LARGE)
            }
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }

    pub(crate) fn into_hyper(&self, response: Response) -> hyper::Response<ResponseBody> {
        let (status, mut headers, body) = response.into_parts();
        if self.default_headers {
            headers
                .entry(header::SERVER)
                .or_insert_with(|| SERVER_NAME.clone());
            if !headers.contains_key(header::DATE) {
                if let Ok(date) = HeaderValue::from_str(&CivilTime::now().http_date()) {
                    headers.insert(header::DATE, date);
                }
            }
        }

        let body = match body {
            Body::Full(bytes) => Full::new(bytes).boxed_unsync(),
            Body::Events(stream) => {
                StreamBody::new(stream.into_frames(self.sse_keep_alive)).boxed_unsync()
            }
        };

        let mut res = hyper::Response::new(body);
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }
}

struct RequestLine {
    method: Method,
    uri: Uri,
    version: Version,
    user_agent: Option<String>,
}

/// Counts a live connection and reports its close exactly once.
pub(crate) struct ConnectionGuard {
    ctx: Arc<ConnectionContext>,
    remote: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(ctx: Arc<ConnectionContext>, remote: SocketAddr) -> Self {
        ctx.active.fetch_add(1, Ordering::SeqCst);
        Self { ctx, remote }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.ctx.active.fetch_sub(1, Ordering::SeqCst);
        self.ctx.app.fire_connection_close(self.remote);
    }
}

/// Serve one connection until it closes or shutdown completes it.
pub(crate) async fn serve(
    ctx: Arc<ConnectionContext>,
    stream: std::net::TcpStream,
    guard: ConnectionGuard,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let remote = guard.remote;
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(remote = %remote, error = %e, "failed to register connection");
            return;
        }
    };

    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { Ok::<_, Infallible>(ctx.handle(req, remote).await) }
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .keep_alive(true);
    builder
        .http2()
        .timer(TokioTimer::new())
        .max_concurrent_streams(250);

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        let message = e.to_string();
        if !is_connection_error(&message) {
            debug!(remote = %remote, error = %message, "connection error");
        }
    }
}

/// Client went away; not worth logging.
fn is_connection_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("connection reset")
        || message.contains("broken pipe")
        || message.contains("os error 104")
        || message.contains("os error 32")
        || message.contains("timed out")
        || message.contains("canceled")
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

fn status_response(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    Response::json(&serde_json::json!({
        "message": reason,
        "status": status.as_u16(),
        "reason": reason,
    }))
    .with_status(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use crate::sse;

    fn context(config: &ServerConfig) -> ConnectionContext {
        ConnectionContext::new(
            Arc::new(Router::new().into_app()),
            Arc::new(AtomicUsize::new(0)),
            config,
        )
    }

    #[tokio::test]
    async fn test_body_limit() {
        let ctx = context(&ServerConfig::default().with_max_request_size(4));

        let body = ctx
            .read_body(&HeaderMap::new(), Full::new(Bytes::from_static(b"abcd")))
            .await;
        assert_eq!(body.unwrap(), Bytes::from_static(b"abcd"));

        let body = ctx
            .read_body(&HeaderMap::new(), Full::new(Bytes::from_static(b"abcde")))
            .await;
        assert_eq!(body.unwrap_err(), StatusCode::PAYLOAD_TOO_LARGE);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1000"));
        let body = ctx.read_body(&headers, Full::new(Bytes::new())).await;
        assert_eq!(body.unwrap_err(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_default_headers() {
        let ctx = context(&ServerConfig::default());
        let res = ctx.into_hyper(Response::ok("hi"));
        assert_eq!(res.headers()[header::SERVER], SERVER_NAME);
        assert!(res.headers()[header::DATE]
            .to_str()
            .unwrap()
            .ends_with(" GMT"));

        let res = ctx.into_hyper(Response::ok("hi").with_header("server", "custom"));
        assert_eq!(res.headers()[header::SERVER], "custom");

        let ctx = context(&ServerConfig::default().with_default_headers(false));
        let res = ctx.into_hyper(Response::ok("hi"));
        assert!(res.headers().get(header::SERVER).is_none());
        assert!(res.headers().get(header::DATE).is_none());
    }

    #[tokio::test]
    async fn test_event_stream_body() {
        let ctx = context(&ServerConfig::default().with_sse_keep_alive(Duration::ZERO));
        let (emitter, stream) = sse::channel(4);
        emitter.send(sse::SseEvent::data("x")).await.unwrap();
        drop(emitter);

        let res = ctx.into_hyper(Response::event_stream(stream));
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/event-stream");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"data: x\n\n"));
    }

    #[test]
    fn test_guard_counts_and_fires_once() {
        use std::sync::Mutex;

        let closed = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        let seen = Arc::clone(&closed);
        router.on_connection_close(move |addr| seen.lock().unwrap().push(addr));

        let ctx = Arc::new(ConnectionContext::new(
            Arc::new(router.into_app()),
            Arc::new(AtomicUsize::new(0)),
            &ServerConfig::default(),
        ));
        let remote: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        let guard = ConnectionGuard::new(Arc::clone(&ctx), remote);
        assert_eq!(ctx.active.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(ctx.active.load(Ordering::SeqCst), 0);
        assert_eq!(*closed.lock().unwrap(), vec![remote]);
    }

    #[test]
    fn test_connection_errors() {
        assert!(is_connection_error("Connection reset by peer (os error 104)"));
        assert!(is_connection_error("broken pipe"));
        assert!(!is_connection_error("invalid HTTP method parsed"));
    }
}

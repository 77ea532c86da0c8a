//! Decoded HTTP request handed to route pipelines.

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, Method, Uri, Version};

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request with a fully collected body. Not `Clone`: bodies can be large.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    /// Bodiless request, mostly for tests and `App::call`.
    pub fn get(uri: Uri) -> Self {
        Self {
            method: Method::GET,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw (still percent-encoded) path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header value as text; `None` when absent or not visible ASCII.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(&X_REQUEST_ID)
    }

    /// `Accept` lists `text/html` explicitly. Wildcards do not count, so
    /// generic clients get machine-readable errors.
    pub fn accepts_html(&self) -> bool {
        self.accepts("text/html")
    }

    pub fn accepts_event_stream(&self) -> bool {
        self.accepts("text/event-stream")
    }

    /// `Upgrade: websocket`, case-insensitive.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header(header::UPGRADE)
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    fn accepts(&self, media_type: &str) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|range| range.split(';').next().unwrap_or("").trim())
            .any(|range| range.eq_ignore_ascii_case(media_type))
    }
}

impl<B> From<http::Request<B>> for Request
where
    B: Into<Bytes>,
{
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: body.into(),
        }
    }
}

//! Test helpers and utilities

use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use tokio_dispatch::config::ServerConfig;
use tokio_dispatch::router::Router;
use tokio_dispatch::runtime::DispatchRuntime;

/// Small server config on an ephemeral port.
pub fn test_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_io_threads(2)
        .with_worker_threads(2)
        .with_drain_timeout(Duration::from_secs(2))
}

/// Running runtime plus a client pointed at it. Stops on drop.
pub struct TestServer {
    pub runtime: DispatchRuntime,
    pub base_url: String,
    pub client: Client,
}

#[allow(dead_code)]
impl TestServer {
    pub fn start(router: Router) -> Self {
        Self::start_with(test_config(), router)
    }

    pub fn start_with(config: ServerConfig, router: Router) -> Self {
        let mut runtime = DispatchRuntime::new(config);
        runtime.start(router).expect("Failed to start runtime");
        let addr = runtime.local_addr().expect("Runtime has no address");

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            runtime,
            base_url: format!("http://{}", addr),
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request to the server
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    /// Make a GET request with custom headers
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> Response {
        let mut req = self.client.get(self.url(path));
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        req.send().await.expect("GET request failed")
    }

    /// Make a request with any method
    pub async fn request(&self, method: reqwest::Method, path: &str) -> Response {
        self.client
            .request(method, self.url(path))
            .send()
            .await
            .expect("request failed")
    }

    /// Make a POST request with JSON body
    pub async fn post_json<T: serde::Serialize + ?Sized>(&self, path: &str, json: &T) -> Response {
        self.client
            .post(self.url(path))
            .json(json)
            .send()
            .await
            .expect("POST request failed")
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Assert that response has expected status
pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Assert that response contains header
pub fn assert_header(response: &Response, name: &str, expected: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert_eq!(value, expected, "Header '{}' mismatch", name);
}

/// Assert that response contains header with prefix
pub fn assert_header_starts_with(response: &Response, name: &str, prefix: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert!(
        value.starts_with(prefix),
        "Header '{}' expected to start with '{}', got '{}'",
        name,
        prefix,
        value
    );
}

// =============================================================================
// SSE (Server-Sent Events) Testing Helpers
// =============================================================================

/// Parsed stream contents: events plus the number of comment lines.
#[derive(Debug, Default)]
pub struct SseTranscript {
    pub events: Vec<String>,
    pub comments: usize,
}

impl SseTranscript {
    /// Parse complete events from a raw body
    pub fn parse(input: &str) -> Self {
        let mut transcript = Self::default();
        let mut data = String::new();

        for line in input.lines() {
            if line.is_empty() {
                if !data.is_empty() {
                    transcript.events.push(std::mem::take(&mut data));
                }
            } else if line.starts_with(':') {
                transcript.comments += 1;
            } else if let Some(value) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        transcript
    }
}

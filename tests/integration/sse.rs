//! SSE (Server-Sent Events) streaming tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio_dispatch::router::Router;
use tokio_dispatch::sse::SseEvent;

fn ticker(closed: Arc<AtomicUsize>) -> Router {
    let mut router = Router::new();
    router
        .sse("/ticks", move |_ctx, emitter| {
            let closed = Arc::clone(&closed);
            emitter.on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
            tokio::spawn(async move {
                for n in 0..2 {
                    if emitter.send(SseEvent::data(format!("tick {}", n))).await.is_err() {
                        return;
                    }
                }
                // Hold the stream open until the client leaves
                while !emitter.is_closed() {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            });
            Ok(())
        })
        .unwrap();
    router
}

#[tokio::test]
async fn test_sse_events_and_keepalive() {
    let closed = Arc::new(AtomicUsize::new(0));
    let config = test_config().with_sse_keep_alive(Duration::from_millis(100));
    let server = TestServer::start_with(config, ticker(Arc::clone(&closed)));

    let resp = server
        .get_with_headers("/ticks", &[("Accept", "text/event-stream")])
        .await;
    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/event-stream");
    assert_header(&resp, "cache-control", "no-cache");

    let mut body = String::new();
    let mut stream = resp.bytes_stream();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(chunk)) = stream.next().await {
            body.push_str(&String::from_utf8_lossy(&chunk));
            let transcript = SseTranscript::parse(&body);
            if transcript.events.len() >= 2 && transcript.comments >= 1 {
                break;
            }
        }
    })
    .await;

    let transcript = SseTranscript::parse(&body);
    assert_eq!(transcript.events, vec!["tick 0", "tick 1"]);
    assert!(transcript.comments >= 1, "no keep-alive in {:?}", body);
    assert!(body.contains(": keepalive\n\n"));
}

#[tokio::test]
async fn test_sse_close_fires_once_on_disconnect() {
    let closed = Arc::new(AtomicUsize::new(0));
    let config = test_config().with_sse_keep_alive(Duration::from_millis(50));
    let server = TestServer::start_with(config, ticker(Arc::clone(&closed)));

    let client = reqwest::Client::new();
    let resp = client
        .get(server.url("/ticks"))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    let mut stream = resp.bytes_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("tick"));
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    drop(stream);
    drop(client);

    // The next keep-alive write notices the disconnect
    assert!(eventually(Duration::from_secs(3), || closed.load(Ordering::SeqCst) >= 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sse_route_serves_plain_get() {
    let closed = Arc::new(AtomicUsize::new(0));
    let server = TestServer::start(ticker(closed));

    let resp = server.get("/ticks").await;
    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/event-stream");
}

//! Routing and dispatch over real connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::helpers::*;
use reqwest::{Method, StatusCode};
use tokio_dispatch::core::{Context, HandlerError, Json, Response};
use tokio_dispatch::pipeline::Flow;
use tokio_dispatch::router::Router;

fn thread_name() -> String {
    thread::current().name().unwrap_or("").to_string()
}

#[tokio::test]
async fn test_inline_and_dispatched_threads() {
    let mut router = Router::new();
    router.get("/inline", |_| Ok(thread_name())).unwrap();
    router
        .dispatch(|r| {
            r.get("/blocking", |ctx: &mut Context| {
                Ok(format!("{} {}", thread_name(), ctx.is_in_io_thread()))
            })?;
            Ok(())
        })
        .unwrap();
    let server = TestServer::start(router);

    let resp = server.get("/inline").await;
    assert_status(&resp, StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("eventloop-"), "ran on {}", body);

    let body = server.get("/blocking").await.text().await.unwrap();
    assert!(body.starts_with("worker-"), "ran on {}", body);
    assert!(body.ends_with(" false"));
}

#[tokio::test]
async fn test_path_variables_and_json() {
    let mut router = Router::new();
    router
        .get("/users/{id:[0-9]+}", |ctx| {
            let id: u64 = ctx.path_param("id")?;
            Ok(Json(serde_json::json!({ "id": id, "kind": "numeric" })))
        })
        .unwrap();
    router
        .get("/users/{name}", |ctx| {
            Ok(ctx.path_var("name").unwrap_or_default().to_string())
        })
        .unwrap();
    router
        .get("/files/*path", |ctx| Ok(ctx.path_var("path").unwrap_or_default().to_string()))
        .unwrap();
    let server = TestServer::start(router);

    let resp = server.get("/users/42").await;
    assert_status(&resp, StatusCode::OK);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["id"], 42);

    let body = server.get("/users/ann%20lee").await.text().await.unwrap();
    assert_eq!(body, "ann lee");

    let body = server.get("/files/css/site.css").await.text().await.unwrap();
    assert_eq!(body, "css/site.css");
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    let mut router = Router::new();
    router.get("/items", |_| Ok("list")).unwrap();
    router.post("/items", |_| Ok(StatusCode::CREATED)).unwrap();
    let server = TestServer::start(router);

    let resp = server.request(Method::PUT, "/items").await;
    assert_status(&resp, StatusCode::METHOD_NOT_ALLOWED);
    assert_header(&resp, "allow", "GET, HEAD, POST");

    let resp = server.get_with_headers("/missing", &[("Accept", "*/*")]).await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_header_starts_with(&resp, "content-type", "application/json");
    assert!(resp.headers().get("allow").is_none());
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], 404);

    let resp = server.request(Method::HEAD, "/items").await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_html_error_page() {
    let server = TestServer::start(Router::new());
    let resp = server
        .get_with_headers("/nope", &[("Accept", "text/html")])
        .await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_header_starts_with(&resp, "content-type", "text/html");
}

#[tokio::test]
async fn test_default_headers() {
    let mut router = Router::new();
    router.get("/", |_| Ok("home")).unwrap();
    let server = TestServer::start(router);

    let resp = server.get("/").await;
    assert_header_starts_with(&resp, "server", "tokio_dispatch/");
    assert!(resp.headers().contains_key("date"));
}

#[tokio::test]
async fn test_decorators_and_error_handlers() {
    let mut router = Router::new();
    router.before(|ctx| {
        ctx.set_response_header("X-Trace", "on");
        Ok(Flow::Next)
    });
    router.error_for_status(StatusCode::BAD_REQUEST, |_ctx, err, _status| {
        Some(Response::ok(format!("bad input: {}", err)).with_status(StatusCode::BAD_REQUEST))
    });
    router
        .get("/orders/{id}", |ctx| {
            let id: u32 = ctx.path_param("id")?;
            Ok(format!("order {}", id))
        })
        .unwrap();
    let server = TestServer::start(router);

    let resp = server.get("/orders/7").await;
    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "x-trace", "on");
    assert_eq!(resp.text().await.unwrap(), "order 7");

    let resp = server.get("/orders/seven").await;
    assert_status(&resp, StatusCode::BAD_REQUEST);
    assert!(resp.text().await.unwrap().starts_with("bad input"));
}

#[tokio::test]
async fn test_json_body_round_trip() {
    let mut router = Router::new();
    router
        .post("/echo", |ctx| {
            let value: serde_json::Value = serde_json::from_slice(ctx.request().body())
                .map_err(|e| HandlerError::from(e).with_status(StatusCode::BAD_REQUEST))?;
            Ok(Json(value))
        })
        .unwrap();
    let server = TestServer::start(router);

    let resp = server
        .post_json("/echo", &serde_json::json!({ "name": "widget" }))
        .await;
    assert_status(&resp, StatusCode::OK);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["name"], "widget");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_worker_queue_is_unavailable() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    let mut router = Router::new();
    router
        .dispatch(move |r| {
            r.get("/slow", move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.lock().unwrap().recv();
                Ok("done")
            })?;
            Ok(())
        })
        .unwrap();
    let config = test_config().with_worker_threads(1).with_queue_capacity(1);
    let server = Arc::new(TestServer::start_with(config, router));

    // First request occupies the only worker
    let s = Arc::clone(&server);
    let first = tokio::spawn(async move { s.get("/slow").await.status() });
    started_rx.recv().await.unwrap();

    // Second request fills the only queue slot
    let s = Arc::clone(&server);
    let second = tokio::spawn(async move { s.get("/slow").await.status() });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let resp = server.get("/slow").await;
    assert_status(&resp, StatusCode::SERVICE_UNAVAILABLE);

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap(), StatusCode::OK);
    assert_eq!(second.await.unwrap(), StatusCode::OK);
}

#[tokio::test]
async fn test_connection_close_listener() {
    let closed = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.get("/", |_| Ok("hi")).unwrap();
    let counter = Arc::clone(&closed);
    router.on_connection_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let server = TestServer::start(router);

    let client = reqwest::Client::new();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "hi");
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    drop(client);
    assert!(eventually(Duration::from_secs(3), || closed.load(Ordering::SeqCst) == 1).await);
}

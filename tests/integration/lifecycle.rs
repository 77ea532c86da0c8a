//! Runtime start/stop behaviour.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::helpers::*;
use reqwest::StatusCode;
use tokio_dispatch::router::{HookError, Router};
use tokio_dispatch::runtime::{DispatchRuntime, RuntimeError, State};

#[test]
fn test_hooks_run_in_order() {
    let events = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut router = Router::new();
    router.get("/", |_| Ok("ok")).unwrap();

    for name in ["start-1", "start-2"] {
        let events = Arc::clone(&events);
        router.on_start(move |_| -> Result<(), HookError> {
            events.lock().unwrap().push(name.to_string());
            Ok(())
        });
    }
    let seen = Arc::clone(&events);
    router.on_ready(move |app| -> Result<(), HookError> {
        seen.lock().unwrap().push(format!("ready:{}", app.routes().len()));
        Ok(())
    });
    let seen = Arc::clone(&events);
    router.on_stop(move |_| -> Result<(), HookError> {
        seen.lock().unwrap().push("stop".to_string());
        Ok(())
    });

    let mut runtime = DispatchRuntime::new(test_config());
    runtime.start(router).unwrap();
    runtime.stop();
    runtime.stop();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start-1", "start-2", "ready:1", "stop"]
    );
}

#[test]
fn test_start_twice_is_rejected() {
    let mut runtime = DispatchRuntime::new(test_config());
    runtime.start(Router::new()).unwrap();

    let err = runtime.start(Router::new()).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidState(State::Ready)));

    runtime.stop();
    assert_eq!(runtime.state(), State::Stopped);
}

#[test]
fn test_address_in_use() {
    let server = TestServer::start(Router::new());
    let addr = server.runtime.local_addr().unwrap();

    let mut config = test_config();
    config.listen_addr = addr;
    let mut second = DispatchRuntime::new(config);
    let err = second.start(Router::new()).unwrap_err();

    assert!(err.is_addr_in_use(), "unexpected error: {}", err);
    assert!(err.to_string().contains(&addr.to_string()));
    assert_eq!(second.state(), State::Stopped);
}

#[test]
fn test_failing_ready_hook_releases_port() {
    let mut router = Router::new();
    router.on_ready(|_| Err("not today".into()));

    let mut runtime = DispatchRuntime::new(test_config());
    let err = runtime.start(router).unwrap_err();
    assert!(matches!(err, RuntimeError::Hook { .. }));
    assert_eq!(runtime.state(), State::Stopped);
}

#[test]
fn test_stop_waits_for_in_flight_request() {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let mut router = Router::new();
    router
        .dispatch(move |r| {
            r.get("/slow", move |_| {
                let _ = entered_tx.send(());
                thread::sleep(Duration::from_millis(300));
                Ok("finished")
            })?;
            Ok(())
        })
        .unwrap();

    let mut runtime = DispatchRuntime::new(test_config());
    runtime.start(router).unwrap();
    let url = format!("http://{}/slow", runtime.local_addr().unwrap());

    let client = thread::spawn(move || {
        tokio_test::block_on(async {
            let resp = reqwest::get(url).await.unwrap();
            (resp.status(), resp.text().await.unwrap())
        })
    });

    // Stop only once the handler is running
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("handler never started");
    let started = Instant::now();
    runtime.stop();
    assert!(started.elapsed() < Duration::from_secs(2));

    let (status, body) = client.join().unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "finished");
}

#[test]
fn test_drop_stops_runtime() {
    let addr = {
        let mut runtime = DispatchRuntime::new(test_config());
        runtime.start(Router::new()).unwrap();
        runtime.local_addr().unwrap()
    };

    // The port is free again once the runtime is gone
    let mut config = test_config();
    config.listen_addr = addr;
    let mut runtime = DispatchRuntime::new(config);
    runtime.start(Router::new()).unwrap();
    assert_eq!(runtime.local_addr(), Some(addr));
}

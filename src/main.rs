use std::thread;
use std::time::Duration;

use tracing::info;

use tokio_dispatch::config::Config;
use tokio_dispatch::core::Json;
use tokio_dispatch::logging::{self, CivilTime};
use tokio_dispatch::router::{Router, RouterError};
use tokio_dispatch::runtime::DispatchRuntime;
use tokio_dispatch::sse::SseEvent;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    logging::init(&config.logging)?;

    info!("Starting tokio_dispatch {}", tokio_dispatch::VERSION);
    config.log_summary();

    let router = demo_router(Router::from_config(&config.router)?)?;
    let mut runtime = DispatchRuntime::new(config.server);
    runtime.start(router)?;

    // Only used to wait for the signal
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    signals.block_on(tokio::signal::ctrl_c())?;

    info!("Shutting down...");
    runtime.stop();
    Ok(())
}

fn demo_router(mut router: Router) -> Result<Router, RouterError> {
    router.get("/", |_| {
        Ok(Json(serde_json::json!({
            "name": "tokio_dispatch",
            "version": tokio_dispatch::VERSION,
        })))
    })?;

    router.get("/hello/{name}", |ctx| {
        Ok(format!("hello {}\n", ctx.path_var("name").unwrap_or("stranger")))
    })?;

    router.dispatch(|r| {
        r.get("/sleep/{ms:[0-9]+}", |ctx| {
            let ms: u64 = ctx.path_param("ms")?;
            thread::sleep(Duration::from_millis(ms.min(5_000)));
            Ok(format!("slept {}ms on {}\n", ms, thread::current().name().unwrap_or("?")))
        })?;
        Ok(())
    })?;

    router.sse("/clock", |_ctx, emitter| {
        thread::spawn(move || loop {
            let now = SseEvent::data(CivilTime::now().iso8601()).with_event("tick");
            if emitter.send_blocking(now).is_err() {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        });
        Ok(())
    })?;

    router.on_ready(|app| {
        info!(routes = app.routes().len(), context_path = app.context_path(), "routes mounted");
        Ok(())
    });

    Ok(router)
}

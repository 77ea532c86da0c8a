//! Dispatch runtime: thread groups, listener and lifecycle.
//!
//! ```text
//!   acceptor-0 ──accept──► eventloop-N ──hyper──► App::dispatch
//!                                                   │
//!                                   inline ◄────────┴────► worker-N
//! ```
//!
//! The acceptor group is one single-thread Tokio runtime per acceptor
//! thread. Accepted sockets move to the event-loop group, a multi-thread
//! runtime that parses HTTP and runs inline pipelines. Dispatched routes
//! run on the worker pool and hand their response back to the event loop.
//!
//! ```rust,ignore
//! let mut runtime = DispatchRuntime::new(ServerConfig::new(addr));
//! runtime.start(router)?;
//! // ...
//! runtime.stop();
//! ```
//!
//! `start` and `stop` block the caller; call them from synchronous code.

mod connection;
mod error;
mod groups;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::executor::{Executor, ThreadPool};
use crate::router::{App, Phase, Router};

use connection::ConnectionContext;

pub use error::RuntimeError;
pub use groups::BACKLOG;

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resources owned while the runtime is up.
struct Running {
    app: Arc<App>,
    pool: Arc<ThreadPool>,
    event_loop: Option<Runtime>,
    acceptors: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
    local_addr: Option<SocketAddr>,
}

impl Running {
    fn new(app: Arc<App>, pool: Arc<ThreadPool>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            app,
            pool,
            event_loop: None,
            acceptors: Vec::new(),
            shutdown_tx,
            active: Arc::new(AtomicUsize::new(0)),
            local_addr: None,
        }
    }

    /// Shut everything down, giving connections and queued jobs up to
    /// `drain_timeout` to finish.
    fn release(mut self, drain_timeout: Duration) {
        self.shutdown_tx.send_replace(true);
        for acceptor in self.acceptors.drain(..) {
            if acceptor.join().is_err() {
                warn!("acceptor thread panicked");
            }
        }

        let deadline = Instant::now() + drain_timeout;
        if let Some(event_loop) = self.event_loop.take() {
            if !wait_for_drain(&self.active, drain_timeout) {
                warn!(
                    active = self.active.load(Ordering::SeqCst),
                    "drain timeout reached, closing connections"
                );
            }
            // Blocking shutdown panics inside an async context
            if Handle::try_current().is_ok() {
                event_loop.shutdown_background();
            } else {
                event_loop.shutdown_timeout(Duration::from_secs(1));
            }
        }

        self.pool.shutdown();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.pool.join_timeout(remaining) {
            warn!(pool = self.pool.name(), "worker pool did not drain in time");
        }
    }
}

/// Poll the active connection count until it reaches zero.
fn wait_for_drain(active: &AtomicUsize, timeout: Duration) -> bool {
    let start = Instant::now();
    let check_interval = Duration::from_millis(10);

    loop {
        let count = active.load(Ordering::SeqCst);
        if count == 0 {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        debug!(active = count, "waiting for connections to drain");
        thread::sleep(check_interval);
    }
}

/// Owns the worker pool, the thread groups and the listening socket.
pub struct DispatchRuntime {
    config: ServerConfig,
    state: State,
    running: Option<Running>,
}

impl DispatchRuntime {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: State::Created,
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Bound address once ready. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().and_then(|running| running.local_addr)
    }

    /// The running application, while started.
    pub fn app(&self) -> Option<&Arc<App>> {
        self.running.as_ref().map(|running| &running.app)
    }

    /// Freeze `router` and start serving it.
    ///
    /// On failure every allocated resource is released and the runtime
    /// ends in [`State::Stopped`].
    pub fn start(&mut self, router: Router) -> Result<(), RuntimeError> {
        if self.state != State::Created {
            return Err(RuntimeError::InvalidState(self.state));
        }
        self.state = State::Starting;

        let running = match self.launch(Arc::new(router.into_app())) {
            Ok(running) => running,
            Err(e) => {
                self.state = State::Stopped;
                return Err(e);
            }
        };

        let app = Arc::clone(&running.app);
        let addr = running.local_addr;
        self.running = Some(running);
        self.state = State::Ready;
        info!(
            addr = ?addr,
            eventloop = self.config.io_thread_count(),
            worker = self.config.worker_count(),
            routes = app.routes().len(),
            "runtime ready"
        );

        if let Err(source) = app.fire(Phase::Ready) {
            self.state = State::Stopped;
            if let Some(running) = self.running.take() {
                running.release(Duration::ZERO);
            }
            return Err(RuntimeError::Hook {
                phase: Phase::Ready,
                source,
            });
        }
        Ok(())
    }

    fn launch(&self, app: Arc<App>) -> Result<Running, RuntimeError> {
        self.config.validate()?;

        let pool = Arc::new(ThreadPool::with_capacity(
            self.config.worker_count(),
            self.config.actual_queue_capacity(),
            "worker",
        )?);
        app.attach_worker(Arc::clone(&pool) as Arc<dyn Executor>);

        let mut running = Running::new(app, pool);
        if let Err(e) = self.bring_up(&mut running) {
            running.release(Duration::ZERO);
            return Err(e);
        }
        Ok(running)
    }

    fn bring_up(&self, running: &mut Running) -> Result<(), RuntimeError> {
        running
            .app
            .fire(Phase::Start)
            .map_err(|source| RuntimeError::Hook {
                phase: Phase::Start,
                source,
            })?;

        let event_loop = groups::event_loop(self.config.io_thread_count())?;
        let handle = event_loop.handle().clone();
        running.event_loop = Some(event_loop);

        let addr = self.config.listen_addr;
        let listener = groups::bind(addr).map_err(|source| RuntimeError::Bind { addr, source })?;
        running.local_addr = Some(listener.local_addr()?);

        let ctx = Arc::new(ConnectionContext::new(
            Arc::clone(&running.app),
            Arc::clone(&running.active),
            &self.config,
        ));
        for id in 0..self.config.acceptor_threads {
            let acceptor = groups::spawn_acceptor(
                id,
                listener.try_clone()?,
                handle.clone(),
                running.shutdown_tx.subscribe(),
                Arc::clone(&ctx),
            )?;
            running.acceptors.push(acceptor);
        }
        Ok(())
    }

    /// Stop serving. Idempotent and infallible.
    ///
    /// Stop hooks run first, then connections drain and the thread groups
    /// and worker pool shut down, bounded by `drain_timeout`.
    pub fn stop(&mut self) {
        match self.state {
            State::Created => {
                self.state = State::Stopped;
                return;
            }
            State::Stopping | State::Stopped => return,
            State::Starting | State::Ready => {}
        }

        self.state = State::Stopping;
        info!("runtime stopping");

        if let Some(running) = self.running.take() {
            running.app.fire_stop();
            running.release(self.config.drain_timeout);
        }

        self.state = State::Stopped;
        info!("runtime stopped");
    }
}

impl Drop for DispatchRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_io_threads(1)
            .with_worker_threads(1)
            .with_drain_timeout(Duration::from_secs(1))
    }

    #[test]
    fn test_lifecycle() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        for (phase, name) in [(Phase::Start, "start"), (Phase::Ready, "ready"), (Phase::Stop, "stop")] {
            let events = Arc::clone(&events);
            let hook = move |_: &App| -> Result<(), crate::router::HookError> {
                events.lock().unwrap().push(name);
                Ok(())
            };
            match phase {
                Phase::Start => router.on_start(hook),
                Phase::Ready => router.on_ready(hook),
                Phase::Stop => router.on_stop(hook),
            };
        }

        let mut runtime = DispatchRuntime::new(local_config());
        assert_eq!(runtime.state(), State::Created);

        runtime.start(router).unwrap();
        assert_eq!(runtime.state(), State::Ready);
        assert_ne!(runtime.local_addr().unwrap().port(), 0);

        runtime.stop();
        assert_eq!(runtime.state(), State::Stopped);
        runtime.stop();
        assert_eq!(*events.lock().unwrap(), vec!["start", "ready", "stop"]);
    }

    #[test]
    fn test_start_twice() {
        let mut runtime = DispatchRuntime::new(local_config());
        runtime.start(Router::new()).unwrap();

        let err = runtime.start(Router::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(State::Ready)));
        assert_eq!(runtime.state(), State::Ready);
    }

    #[test]
    fn test_stop_before_start() {
        let mut runtime = DispatchRuntime::new(local_config());
        runtime.stop();
        assert_eq!(runtime.state(), State::Stopped);
        assert!(matches!(
            runtime.start(Router::new()),
            Err(RuntimeError::InvalidState(State::Stopped))
        ));
    }

    #[test]
    fn test_failing_start_hook() {
        let mut router = Router::new();
        router.on_start(|_| Err("no database".into()));

        let mut runtime = DispatchRuntime::new(local_config());
        let err = runtime.start(router).unwrap_err();
        assert!(matches!(err, RuntimeError::Hook { phase: Phase::Start, .. }));
        assert_eq!(runtime.state(), State::Stopped);
        assert!(runtime.local_addr().is_none());
    }

    #[test]
    fn test_invalid_config() {
        let mut runtime = DispatchRuntime::new(local_config().with_acceptor_threads(0));
        assert!(matches!(
            runtime.start(Router::new()),
            Err(RuntimeError::Config(_))
        ));
        assert_eq!(runtime.state(), State::Stopped);
    }

    #[test]
    fn test_release_signals_shutdown() {
        let app = Arc::new(Router::new().into_app());

        let pool = Arc::new(ThreadPool::with_capacity(1, 1, "worker").unwrap());
        let running = Running::new(Arc::clone(&app), Arc::clone(&pool));
        let mut rx = running.shutdown_tx.subscribe();
        running.release(Duration::ZERO);
        assert!(*rx.borrow_and_update());
        assert!(pool.is_shutdown());

        // Nobody subscribed: still releases everything
        let pool = Arc::new(ThreadPool::with_capacity(1, 1, "worker").unwrap());
        Running::new(app, Arc::clone(&pool)).release(Duration::ZERO);
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_wait_for_drain() {
        let active = AtomicUsize::new(1);
        assert!(!wait_for_drain(&active, Duration::from_millis(30)));
        active.store(0, Ordering::SeqCst);
        assert!(wait_for_drain(&active, Duration::from_millis(30)));
    }
}

//! Thread groups: acceptors, event loops and the listening socket.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::connection::{self, ConnectionContext, ConnectionGuard};
use crate::core::mark_io_thread;

/// Pending connection queue length.
pub const BACKLOG: i32 = 8192;

/// Bind the listening socket with `SO_REUSEADDR`.
pub(crate) fn bind(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Multi-thread runtime whose threads are named `eventloop-N`.
pub(crate) fn event_loop(threads: usize) -> io::Result<Runtime> {
    let next_id = Arc::new(AtomicUsize::new(0));
    Builder::new_multi_thread()
        .worker_threads(threads.max(1))
        .thread_name_fn(move || format!("eventloop-{}", next_id.fetch_add(1, Ordering::SeqCst)))
        .on_thread_start(mark_io_thread)
        .enable_all()
        .build()
}

/// Start acceptor `id` on its own thread.
///
/// The acceptor owns a single-thread runtime, accepts on a clone of
/// `listener` and hands every connection to `event_loop`.
pub(crate) fn spawn_acceptor(
    id: usize,
    listener: std::net::TcpListener,
    event_loop: Handle,
    shutdown_rx: watch::Receiver<bool>,
    ctx: Arc<ConnectionContext>,
) -> io::Result<JoinHandle<()>> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new()
        .name(format!("acceptor-{}", id))
        .spawn(move || {
            runtime.block_on(accept_loop(id, listener, event_loop, shutdown_rx, ctx));
        })
}

async fn accept_loop(
    id: usize,
    listener: std::net::TcpListener,
    event_loop: Handle,
    mut shutdown_rx: watch::Receiver<bool>,
    ctx: Arc<ConnectionContext>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(acceptor = id, error = %e, "failed to register listener");
            return;
        }
    };
    debug!(acceptor = id, "accept loop started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, remote) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(acceptor = id, error = %e, "accept failed");
                        continue;
                    }
                };

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(remote = %remote, error = %e, "failed to set TCP_NODELAY");
                }
                let keepalive = TcpKeepalive::new()
                    .with_time(Duration::from_secs(5))
                    .with_interval(Duration::from_secs(1))
                    .with_retries(3);
                if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                    debug!(remote = %remote, error = %e, "failed to set TCP keepalive");
                }

                // Re-registered with the event loop's reactor
                let stream = match stream.into_std() {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(acceptor = id, error = %e, "failed to detach connection");
                        continue;
                    }
                };

                let guard = ConnectionGuard::new(Arc::clone(&ctx), remote);
                event_loop.spawn(connection::serve(
                    Arc::clone(&ctx),
                    stream,
                    guard,
                    shutdown_rx.clone(),
                ));
            }
            _ = shutdown_rx.changed() => {
                debug!(acceptor = id, "shutdown signalled, stopping accept loop");
                break;
            }
        }
    }
}

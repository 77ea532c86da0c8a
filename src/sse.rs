//! Server-sent events.
//!
//! An SSE route handler gets an [`SseEmitter`]; the connection side holds
//! the matching [`EventStream`] and writes events as they arrive, with a
//! `: keepalive` comment every keep-alive interval.
//!
//! ```rust,ignore
//! router.sse("/ticks", |_ctx, emitter| {
//!     emitter.on_close(|| tracing::info!("client left"));
//!     tokio::spawn(async move {
//!         for n in 0.. {
//!             if emitter.send(SseEvent::data(n.to_string())).await.is_err() {
//!                 break;
//!             }
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!         }
//!     });
//!     Ok(())
//! })?;
//! ```
//!
//! Close callbacks run exactly once, when the stream is dropped: the client
//! disconnected, the response was discarded, or every emitter was dropped
//! and the stream ended.

use std::convert::Infallible;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_stream::Stream;
use tracing::warn;

const KEEPALIVE: &[u8] = b": keepalive\n\n";

/// One server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<Duration>,
}

impl SseEvent {
    /// Unnamed event with `data`.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Wire format.
    ///
    /// Data is split on `\r\n`, `\r` and `\n` into one `data:` line each.
    /// Line breaks in `id` and `event` are dropped so they cannot start
    /// another field.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            put_field(&mut buf, "id", id);
        }
        if let Some(event) = &self.event {
            put_field(&mut buf, "event", event);
        }
        if let Some(retry) = self.retry {
            put_field(&mut buf, "retry", &retry.as_millis().to_string());
        }

        let mut rest = self.data.as_str();
        while let Some(end) = rest.find(is_line_break) {
            put_field(&mut buf, "data", &rest[..end]);
            let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
            rest = &rest[end + skip..];
        }
        put_field(&mut buf, "data", rest);

        buf.put_u8(b'\n');
        buf.freeze()
    }
}

fn is_line_break(c: char) -> bool {
    c == '\r' || c == '\n'
}

/// One `name: value` line; line breaks inside `value` are skipped.
fn put_field(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    for part in value.split(is_line_break) {
        buf.put_slice(part.as_bytes());
    }
    buf.put_u8(b'\n');
}

/// Sending on a stream whose client is gone, or whose buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseError {
    Closed,
    Full,
}

impl fmt::Display for SseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SseError::Closed => f.write_str("event stream closed"),
            SseError::Full => f.write_str("event stream buffer full"),
        }
    }
}

impl std::error::Error for SseError {}

type Callback = Box<dyn FnOnce() + Send>;

/// Fire-once callback list.
#[derive(Default)]
struct CloseCallbacks {
    fired: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

impl CloseCallbacks {
    fn register(&self, callback: Callback) {
        {
            let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.fired.load(Ordering::Acquire) {
                callbacks.push(callback);
                return;
            }
        }
        run_callback(callback);
    }

    fn fire(&self) {
        let callbacks = {
            let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            if self.fired.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        for callback in callbacks {
            run_callback(callback);
        }
    }
}

fn run_callback(callback: Callback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!("sse close callback panicked");
    }
}

/// Sending half, handed to the route handler. Cheap to clone.
#[derive(Clone)]
pub struct SseEmitter {
    tx: mpsc::Sender<SseEvent>,
    close: Arc<CloseCallbacks>,
}

impl SseEmitter {
    /// Send, waiting for buffer space.
    pub async fn send(&self, event: SseEvent) -> Result<(), SseError> {
        self.tx.send(event).await.map_err(|_| SseError::Closed)
    }

    /// Send without waiting.
    pub fn try_send(&self, event: SseEvent) -> Result<(), SseError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SseError::Full,
            mpsc::error::TrySendError::Closed(_) => SseError::Closed,
        })
    }

    /// Send from a thread outside the async runtime, such as a worker.
    ///
    /// Panics when called from an async context.
    pub fn send_blocking(&self, event: SseEvent) -> Result<(), SseError> {
        self.tx.blocking_send(event).map_err(|_| SseError::Closed)
    }

    /// True once the client side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Run `f` once when the stream closes; immediately if it already has.
    pub fn on_close<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.close.register(Box::new(f));
    }
}

impl fmt::Debug for SseEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseEmitter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half, carried in the response body.
pub struct EventStream {
    rx: mpsc::Receiver<SseEvent>,
    close: Arc<CloseCallbacks>,
}

impl EventStream {
    /// Body frames with a keep-alive comment every `keep_alive`.
    /// A zero interval disables keep-alives.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn into_frames(self, keep_alive: Duration) -> SseFrames {
        let keep_alive = (!keep_alive.is_zero()).then(|| {
            let mut interval = time::interval_at(Instant::now() + keep_alive, keep_alive);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        SseFrames {
            stream: self,
            keep_alive,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close.fire();
    }
}

/// Create a connected emitter and stream with room for `capacity` events.
pub fn channel(capacity: usize) -> (SseEmitter, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let close = Arc::new(CloseCallbacks::default());
    (
        SseEmitter {
            tx,
            close: Arc::clone(&close),
        },
        EventStream { rx, close },
    )
}

/// Event stream as body frames.
pub struct SseFrames {
    stream: EventStream,
    keep_alive: Option<Interval>,
}

impl Stream for SseFrames {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.stream.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if let Some(interval) = this.keep_alive.as_mut() {
                    interval.reset();
                }
                return Poll::Ready(Some(Ok(Frame::data(event.encode()))));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        if let Some(interval) = this.keep_alive.as_mut() {
            if interval.poll_tick(cx).is_ready() {
                return Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(KEEPALIVE)))));
            }
        }
        Poll::Pending
    }
}

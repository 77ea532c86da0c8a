//! Integration tests for tokio_dispatch
//!
//! Every test starts its own runtime on `127.0.0.1:0` and talks to it
//! over real sockets with reqwest.

mod helpers;

mod dispatch;
mod lifecycle;
mod sse;

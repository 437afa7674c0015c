//! Session transports: the WebSocket client side and the TCP/TLS upstream.
//!
//! Both sides carry a [`CloseSignal`]. Closing a side trips its signal,
//! which wakes any pump blocked reading from or writing to that side; this
//! is the only way a session cancels its pumps.

pub mod upstream;
pub mod websocket;

pub use upstream::{UpstreamHandle, UpstreamStream};
pub use websocket::{ClientHandle, WebSocketConnection};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound on flushing a close to a peer that has stopped reading.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot, idempotent close flag that pending reads can wait on.
#[derive(Debug, Clone)]
pub struct CloseSignal(Arc<watch::Sender<bool>>);

impl CloseSignal {
    pub fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    /// Trip the signal. Returns `true` only for the call that tripped it.
    pub fn trigger(&self) -> bool {
        self.0.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal has been tripped.
    pub async fn closed(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so this cannot observe a dropped channel.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

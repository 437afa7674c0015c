//! Object-safe sink abstraction shared by both sides of a session.
//!
//! Connect hooks and relay pumps write to the client and upstream through
//! this trait so they do not depend on the concrete stream types.

use crate::error::GwResult;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One side of a session that accepts whole messages or frames.
pub trait FrameSink: Send + Sync {
    /// Deliver `data` as a single unit (one WebSocket message, one write).
    ///
    /// A send still pending when the sink is closed resolves with
    /// [`GatewayError::Closed`](crate::GatewayError::Closed).
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, GwResult<()>>;

    /// Close this side. Closing twice is a no-op.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Whether [`FrameSink::close`] has been called.
    fn is_closed(&self) -> bool;
}

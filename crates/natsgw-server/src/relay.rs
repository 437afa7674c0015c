//! The two relay pumps of a session.
//!
//! Each pump runs in its own task and reports completion exactly once on
//! the session's `done` channel. Whichever pump stops first closes both
//! sides, which trips the close signal the other pump is waiting on.

use futures_util::stream::SplitStream;
use natsgw_core::{filter_message, CommandFramer, FrameSink, GatewayError, GwResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::settings::{Direction, Settings};
use crate::transport::websocket::recv_message;
use crate::transport::CloseSignal;

/// Both sides of a session, as seen by the pumps.
#[derive(Clone)]
pub struct SessionLink {
    pub client: Arc<dyn FrameSink>,
    pub upstream: Arc<dyn FrameSink>,
}

impl SessionLink {
    /// Close the client, then the upstream. Safe to call repeatedly.
    pub async fn close(&self) {
        self.client.close().await;
        self.upstream.close().await;
    }
}

/// Upstream→client pump: relay every frame as one client message.
pub async fn upstream_to_client<R>(
    mut framer: CommandFramer<R>,
    closed: CloseSignal,
    link: SessionLink,
    settings: Arc<Settings>,
    done: mpsc::Sender<Direction>,
) where
    R: AsyncRead + Unpin,
{
    if let Err(e) = forward_frames(&mut framer, &closed, &link, &settings).await {
        settings.on_error.handle(&e);
    }
    link.close().await;
    let _ = done.send(Direction::ToClient).await;
}

async fn forward_frames<R>(
    framer: &mut CommandFramer<R>,
    closed: &CloseSignal,
    link: &SessionLink,
    settings: &Settings,
) -> GwResult<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closed.closed() => return Err(GatewayError::Closed("upstream")),
            frame = framer.next_frame() => frame?,
        };
        settings.trace_frame(Direction::ToClient, frame.as_bytes());
        link.client.send(frame.as_bytes()).await?;
    }
}

/// Client→upstream pump: filter each client message, forward what passes
/// in one write and answer withheld statements with a violation notice.
pub async fn client_to_upstream<T>(
    mut stream: SplitStream<WebSocketStream<T>>,
    closed: CloseSignal,
    link: SessionLink,
    settings: Arc<Settings>,
    done: mpsc::Sender<Direction>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = forward_messages(&mut stream, &closed, &link, &settings).await {
        settings.on_error.handle(&e);
    }
    link.close().await;
    let _ = done.send(Direction::ToUpstream).await;
}

async fn forward_messages<T>(
    stream: &mut SplitStream<WebSocketStream<T>>,
    closed: &CloseSignal,
    link: &SessionLink,
    settings: &Settings,
) -> GwResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = closed.closed() => return Err(GatewayError::Closed("client")),
            message = recv_message(stream) => message?,
        };
        settings.trace_frame(Direction::ToUpstream, &message);

        let filtered = filter_message(&settings.filter, &message);
        for violation in &filtered.violations {
            debug!(kind = %violation.kind, subject = %violation.subject, "statement withheld");
            let notice = violation.notice();
            settings.trace_frame(Direction::ToClient, &notice);
            link.client.send(&notice).await?;
        }
        if let Some(data) = filtered.forward {
            link.upstream.send(&data).await?;
        }
    }
}

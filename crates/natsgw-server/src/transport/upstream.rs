//! Upstream byte stream: plain TCP or TLS over the same connection.

use natsgw_core::{BoxFuture, FrameSink, GatewayError, GwResult};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::{CloseSignal, CLOSE_TIMEOUT};

/// Connection to the NATS server, upgraded in place when TLS is on.
pub enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_flush(cx),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// Write side of the upstream, shared by the connect hook and both pumps.
pub struct UpstreamHandle<S> {
    writer: Mutex<WriteHalf<S>>,
    closed: CloseSignal,
}

impl<S> UpstreamHandle<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(writer: WriteHalf<S>) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: CloseSignal::new(),
        }
    }

    pub fn close_signal(&self) -> &CloseSignal {
        &self.closed
    }

    async fn write(&self, data: &[u8]) -> GwResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| GatewayError::Transport(format!("upstream write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| GatewayError::Transport(format!("upstream flush failed: {e}")))
    }
}

impl<S> FrameSink for UpstreamHandle<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, GwResult<()>> {
        Box::pin(async move {
            if self.closed.is_closed() {
                return Err(GatewayError::Closed("upstream"));
            }
            // Dropping the write on close releases the writer lock.
            tokio::select! {
                _ = self.closed.closed() => Err(GatewayError::Closed("upstream")),
                result = self.write(data) => result,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.trigger() {
                return;
            }
            let shutdown = async { self.writer.lock().await.shutdown().await };
            match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "upstream shutdown failed"),
                Err(_) => debug!("upstream shutdown timed out"),
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

//! WebSocket listener and client handle using tokio-tungstenite.
//!
//! The listener upgrades inbound HTTP requests on the configured route and
//! hands accepted connections to the server loop over a channel. Each
//! accepted stream is split: the sink side becomes a [`ClientHandle`]
//! shared by both pumps, the stream side is read by the client pump.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use natsgw_core::{BoxFuture, FrameSink, GatewayError, GwResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HOST, ORIGIN};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use super::{CloseSignal, CLOSE_TIMEOUT};
use crate::settings::{ErrorHandler, UpgradeConfig};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Bind the client listener and start accepting upgrades.
///
/// Returns the bound address and a receiver yielding upgraded connections.
/// Failed upgrades go to `on_error`; the accept loop stops once the
/// receiver is dropped.
pub async fn start_listener(
    upgrade: UpgradeConfig,
    on_error: ErrorHandler,
) -> GwResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(upgrade.listen_addr)
        .await
        .map_err(|e| GatewayError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, route = %upgrade.route, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let upgrade = Arc::new(upgrade);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    if tx.is_closed() {
                        debug!("WebSocket connection channel closed, stopping listener");
                        break;
                    }
                    let tx = tx.clone();
                    let upgrade = upgrade.clone();
                    let on_error = on_error.clone();
                    tokio::spawn(async move {
                        match accept(stream, &upgrade).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                debug!(remote = %addr, "WebSocket upgrade rejected");
                                on_error.handle(&e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

/// Run the server side of the WebSocket upgrade on `stream`.
pub async fn accept<S>(stream: S, upgrade: &UpgradeConfig) -> GwResult<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let callback =
        |req: &Request, resp: Response| check_upgrade(req, upgrade).map(|()| resp);
    tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config(upgrade)))
        .await
        .map_err(|e| GatewayError::Transport(format!("WebSocket upgrade failed: {e}")))
}

fn ws_config(upgrade: &UpgradeConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .read_buffer_size(upgrade.read_buffer_size)
        .write_buffer_size(upgrade.write_buffer_size)
}

/// Route and origin checks applied before a request is upgraded.
fn check_upgrade(req: &Request, upgrade: &UpgradeConfig) -> Result<(), ErrorResponse> {
    if req.uri().path() != upgrade.route {
        return Err(reject(StatusCode::NOT_FOUND, "not found"));
    }
    if upgrade.origin_check && !same_origin(req) {
        return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
    }
    Ok(())
}

/// Requests without an `Origin` pass; otherwise its host must equal `Host`.
fn same_origin(req: &Request) -> bool {
    let Some(origin) = req.headers().get(ORIGIN) else {
        return true;
    };
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(host) = req.headers().get(HOST).and_then(|h| h.to_str().ok()) else {
        return false;
    };
    let authority = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = authority.split('/').next().unwrap_or(authority);
    authority.eq_ignore_ascii_case(host)
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Frames go out as text when they are valid UTF-8, binary otherwise.
fn to_message(data: &[u8]) -> Message {
    match std::str::from_utf8(data) {
        Ok(text) => Message::text(text.to_owned()),
        Err(_) => Message::binary(data.to_vec()),
    }
}

/// Receive the next text or binary message from the client.
///
/// Control frames are skipped; a Close frame or end of stream yields
/// [`GatewayError::Closed`].
pub async fn recv_message<T>(stream: &mut SplitStream<WebSocketStream<T>>) -> GwResult<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Close(_))) | None => return Err(GatewayError::Closed("client")),
            // Pongs to pings are queued by tungstenite itself.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(GatewayError::Transport(format!("WS recv failed: {e}")));
            }
        }
    }
}

/// Sending half of a client connection, shared by both pumps.
pub struct ClientHandle<T> {
    sink: Mutex<SplitSink<WebSocketStream<T>, Message>>,
    closed: CloseSignal,
}

impl<T> ClientHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(sink: SplitSink<WebSocketStream<T>, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: CloseSignal::new(),
        }
    }

    pub fn close_signal(&self) -> &CloseSignal {
        &self.closed
    }
}

impl<T> FrameSink for ClientHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, GwResult<()>> {
        Box::pin(async move {
            if self.closed.is_closed() {
                return Err(GatewayError::Closed("client"));
            }
            let write = async {
                self.sink
                    .lock()
                    .await
                    .send(to_message(data))
                    .await
                    .map_err(|e| GatewayError::Transport(format!("WS send failed: {e}")))
            };
            tokio::select! {
                _ = self.closed.closed() => Err(GatewayError::Closed("client")),
                result = write => result,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.trigger() {
                return;
            }
            let close = async { self.sink.lock().await.close().await };
            match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
                Err(_) => debug!("WebSocket close timed out"),
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

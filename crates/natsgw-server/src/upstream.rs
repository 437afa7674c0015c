//! Upstream connection setup: dial, greeting, optional TLS, connect hook.

use natsgw_core::{CommandFramer, FrameSink, GatewayError, GwResult, ServerInfo};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::settings::{ConnectContext, Settings};
use crate::tls;
use crate::transport::{UpstreamHandle, UpstreamStream};

/// An upstream connection past its greeting, ready to relay.
pub struct Upstream<S> {
    info: ServerInfo,
    framer: CommandFramer<ReadHalf<S>>,
    handle: Arc<UpstreamHandle<S>>,
}

impl<S> Upstream<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` and resume framing after `buffered` greeting leftovers.
    pub fn new(stream: S, info: ServerInfo, buffered: Vec<u8>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            info,
            framer: CommandFramer::with_buffered(reader, buffered),
            handle: Arc::new(UpstreamHandle::new(writer)),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn handle(&self) -> &Arc<UpstreamHandle<S>> {
        &self.handle
    }

    pub fn into_parts(self) -> (ServerInfo, CommandFramer<ReadHalf<S>>, Arc<UpstreamHandle<S>>) {
        (self.info, self.framer, self.handle)
    }
}

/// Read the greeting off a fresh connection.
///
/// Returns the stream back with any bytes read past the greeting.
pub async fn read_greeting<S>(stream: S) -> GwResult<(S, ServerInfo, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut framer = CommandFramer::new(stream);
    let frame = framer
        .next_frame()
        .await
        .map_err(|e| GatewayError::Handshake(format!("no greeting from upstream: {e}")))?;
    let info = ServerInfo::from_frame(frame.as_bytes())?;
    let (stream, buffered) = framer.into_parts();
    Ok((stream, info, buffered))
}

/// Establishes upstream connections for new sessions.
pub struct UpstreamConnector<'a> {
    settings: &'a Settings,
}

impl<'a> UpstreamConnector<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Dial the NATS server and bring the connection up for `client`.
    ///
    /// On any failure the partially opened connection is closed before the
    /// error is returned.
    pub async fn connect(&self, client: &dyn FrameSink) -> GwResult<Upstream<UpstreamStream>> {
        let addr = &self.settings.upstream_addr;
        let tcp = TcpStream::connect(addr).await.map_err(|e| GatewayError::Dial {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        debug!(addr = %addr, "upstream connected");

        let (tcp, info, buffered) = read_greeting(tcp).await?;
        let details = info.details().unwrap_or_default();
        info!(
            addr = %addr,
            server_id = details.server_id.as_deref().unwrap_or("-"),
            version = details.version.as_deref().unwrap_or("-"),
            max_payload = details.max_payload.unwrap_or(0),
            tls_required = details.tls_required,
            "upstream greeting received"
        );

        let upstream = if self.settings.enable_tls || details.tls_required {
            if !buffered.is_empty() {
                return Err(GatewayError::Handshake(
                    "upstream sent data before the TLS handshake".into(),
                ));
            }
            let config = match &self.settings.tls_config {
                Some(config) => config.clone(),
                None => tls::insecure_client_config()?,
            };
            let stream = tls::upgrade(tcp, addr, config).await?;
            Upstream::new(UpstreamStream::Tls(Box::new(stream)), info, Vec::new())
        } else {
            Upstream::new(UpstreamStream::Plain(tcp), info, buffered)
        };

        self.handshake(upstream, client).await
    }

    /// Run the configured connect hook against a freshly greeted upstream.
    pub async fn handshake<S>(
        &self,
        upstream: Upstream<S>,
        client: &dyn FrameSink,
    ) -> GwResult<Upstream<S>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ctx = ConnectContext {
            server_info: upstream.info(),
            client,
            upstream: &**upstream.handle(),
        };
        if let Err(e) = self.settings.on_connect.run(ctx, self.settings).await {
            upstream.handle().close().await;
            return Err(match e {
                GatewayError::Handshake(_) => e,
                other => GatewayError::Handshake(format!("connect callback failed: {other}")),
            });
        }
        Ok(upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ConnectHandler, ConnectHook};
    use crate::test_support::{fake_broker, ws_pair};
    use futures_util::StreamExt;
    use natsgw_core::BoxFuture;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn greeting_is_extracted() {
        let (stream, info, buffered) = read_greeting(&b"INFO {\"x\":1}\r\n"[..]).await.unwrap();
        assert_eq!(info.as_bytes(), b"{\"x\":1}");
        assert!(buffered.is_empty());
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn greeting_leftovers_are_kept() {
        let (_, _, buffered) = read_greeting(&b"INFO {}\r\nPING\r\n"[..]).await.unwrap();
        assert_eq!(buffered, b"PING\r\n");
    }

    #[tokio::test]
    async fn wrong_first_frame_is_a_handshake_error() {
        let err = read_greeting(&b"PING\r\n"[..]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Handshake(_)));
        let err = read_greeting(&b""[..]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Handshake(_)));
    }

    #[tokio::test]
    async fn default_hook_forwards_greeting_verbatim() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {\"x\":1}\r\n").await.unwrap();
            let mut buf = [0u8; 1];
            let _ = sock.read(&mut buf).await;
        })
        .await;
        let settings = Settings::new(addr.to_string());
        let (server, mut peer) = ws_pair().await;
        let (sink, _stream) = server.split();
        let client = crate::transport::ClientHandle::new(sink);

        let upstream = UpstreamConnector::new(&settings).connect(&client).await.unwrap();
        assert_eq!(upstream.info().as_bytes(), b"{\"x\":1}");
        match peer.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text.as_bytes(), b"INFO {\"x\":1}\r\n"),
            other => panic!("expected greeting, got {other:?}"),
        }

        upstream.handle().close().await;
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_dial_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let settings = Settings::new(addr.to_string());
        let (server, _peer) = ws_pair().await;
        let (sink, _stream) = server.split();
        let client = crate::transport::ClientHandle::new(sink);
        let err = UpstreamConnector::new(&settings).connect(&client).await.err().unwrap();
        assert!(matches!(err, GatewayError::Dial { .. }));
    }

    #[tokio::test]
    async fn server_required_tls_rejects_early_bytes() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {\"tls_required\":true}\r\nPING\r\n")
                .await
                .unwrap();
            let mut rest = Vec::new();
            sock.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
        })
        .await;
        // TLS is off locally; the greeting alone forces the upgrade.
        let settings = Settings::new(addr.to_string());
        let (server, _peer) = ws_pair().await;
        let (sink, _stream) = server.split();
        let client = crate::transport::ClientHandle::new(sink);

        let err = UpstreamConnector::new(&settings).connect(&client).await.err().unwrap();
        assert!(matches!(err, GatewayError::Handshake(_)), "got {err}");
        tokio::time::timeout(std::time::Duration::from_secs(2), broker)
            .await
            .expect("upstream should be closed")
            .unwrap();
    }

    struct SendConnect;

    impl ConnectHook for SendConnect {
        fn on_connect<'a>(&'a self, ctx: ConnectContext<'a>) -> BoxFuture<'a, GwResult<()>> {
            Box::pin(async move { ctx.upstream.send(b"CONNECT {\"verbose\":false}\r\n").await })
        }
    }

    struct Refuse;

    impl ConnectHook for Refuse {
        fn on_connect<'a>(&'a self, _ctx: ConnectContext<'a>) -> BoxFuture<'a, GwResult<()>> {
            Box::pin(async { Err(GatewayError::Transport("refused".into())) })
        }
    }

    #[tokio::test]
    async fn custom_hook_can_write_upstream() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {}\r\n").await.unwrap();
            let mut buf = vec![0u8; 27];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, b"CONNECT {\"verbose\":false}\r\n");
        })
        .await;
        let settings = Settings {
            on_connect: ConnectHandler::Custom(Arc::new(SendConnect)),
            ..Settings::new(addr.to_string())
        };
        let (server, _peer) = ws_pair().await;
        let (sink, _stream) = server.split();
        let client = crate::transport::ClientHandle::new(sink);

        let upstream = UpstreamConnector::new(&settings).connect(&client).await.unwrap();
        broker.await.unwrap();
        upstream.handle().close().await;
    }

    #[tokio::test]
    async fn failing_hook_closes_upstream() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {}\r\n").await.unwrap();
            let mut rest = Vec::new();
            sock.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
        })
        .await;
        let settings = Settings {
            on_connect: ConnectHandler::Custom(Arc::new(Refuse)),
            ..Settings::new(addr.to_string())
        };
        let (server, _peer) = ws_pair().await;
        let (sink, _stream) = server.split();
        let client = crate::transport::ClientHandle::new(sink);

        let err = UpstreamConnector::new(&settings).connect(&client).await.err().unwrap();
        assert!(matches!(err, GatewayError::Handshake(_)));
        broker.await.unwrap();
    }
}

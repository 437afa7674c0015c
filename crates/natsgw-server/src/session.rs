//! Per-connection orchestration.

use futures_util::StreamExt;
use natsgw_core::{FrameSink, ServerInfo};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::relay::{self, SessionLink};
use crate::settings::{Direction, Settings};
use crate::transport::ClientHandle;
use crate::upstream::UpstreamConnector;

/// What a finished session observed.
#[derive(Debug, Default)]
pub struct SessionSummary {
    /// The upstream greeting, if the connect stage succeeded.
    pub server_info: Option<ServerInfo>,
    /// Completion signals in arrival order; empty if the relay never started.
    pub completions: Vec<Direction>,
}

/// Pairs one WebSocket client with one upstream connection.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    settings: Arc<Settings>,
}

impl GatewaySession {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Drive a session to completion.
    ///
    /// Returns once both pumps have finished and both sides are closed, or
    /// as soon as the upstream connect fails.
    pub async fn run<T>(&self, ws: WebSocketStream<T>) -> SessionSummary
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let client = Arc::new(ClientHandle::new(sink));

        let upstream = match UpstreamConnector::new(&self.settings).connect(&*client).await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.settings.on_error.handle(&e);
                client.close().await;
                return SessionSummary::default();
            }
        };
        let (server_info, framer, upstream) = upstream.into_parts();

        let link = SessionLink {
            client: client.clone(),
            upstream: upstream.clone(),
        };
        let (done_tx, mut done_rx) = mpsc::channel::<Direction>(2);
        tokio::spawn(relay::upstream_to_client(
            framer,
            upstream.close_signal().clone(),
            link.clone(),
            self.settings.clone(),
            done_tx.clone(),
        ));
        tokio::spawn(relay::client_to_upstream(
            stream,
            client.close_signal().clone(),
            link.clone(),
            self.settings.clone(),
            done_tx,
        ));

        let mut completions = Vec::with_capacity(2);
        for _ in 0..2 {
            // Each pump sends exactly once before dropping its sender.
            match done_rx.recv().await {
                Some(direction) => {
                    debug!(dir = %direction, "relay pump finished");
                    completions.push(direction);
                }
                None => break,
            }
        }
        link.close().await;

        SessionSummary {
            server_info: Some(server_info),
            completions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ErrorHandler;
    use crate::test_support::{fake_broker, ws_pair};
    use futures_util::SinkExt;
    use natsgw_core::GatewayError;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_tungstenite::tungstenite::Message;

    fn recording(settings: Settings) -> (Arc<Settings>, Arc<Mutex<Vec<String>>>) {
        let errors: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = errors.clone();
        let settings = Settings {
            on_error: ErrorHandler::custom(move |e: &GatewayError| {
                sink.lock().unwrap().push(e.to_string())
            }),
            ..settings
        };
        (Arc::new(settings), errors)
    }

    async fn next_text(peer: &mut WebSocketStream<DuplexStream>) -> Vec<u8> {
        match tokio::time::timeout(Duration::from_secs(2), peer.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text.as_bytes().to_vec(),
            other => panic!("expected text message, got {other:?}"),
        }
    }

    async fn run_session(
        settings: Arc<Settings>,
        server: WebSocketStream<DuplexStream>,
    ) -> tokio::task::JoinHandle<SessionSummary> {
        tokio::spawn(async move { GatewaySession::new(settings).run(server).await })
    }

    #[tokio::test]
    async fn greeting_then_traffic_both_ways() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {\"x\":1}\r\n").await.unwrap();
            let mut buf = vec![0u8; 33];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, b"CONNECT {\"verbose\":false}\r\nPING\r\n");
            sock.write_all(b"PONG\r\n").await.unwrap();
            let mut rest = Vec::new();
            let _ = sock.read_to_end(&mut rest).await;
        })
        .await;
        let (settings, _) = recording(Settings::new(addr.to_string()));
        let (server, mut peer) = ws_pair().await;
        let session = run_session(settings, server).await;

        assert_eq!(next_text(&mut peer).await, b"INFO {\"x\":1}\r\n");
        peer.send(Message::text("CONNECT {\"verbose\":false}\r\nPING\r\n"))
            .await
            .unwrap();
        assert_eq!(next_text(&mut peer).await, b"PONG\r\n");

        peer.close(None).await.unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session should finish")
            .unwrap();
        assert_eq!(summary.server_info.unwrap().as_bytes(), b"{\"x\":1}");
        assert_eq!(summary.completions.len(), 2);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn upstream_drop_ends_session_with_two_completions() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {}\r\n").await.unwrap();
        })
        .await;
        let (settings, errors) = recording(Settings::new(addr.to_string()));
        let (server, mut peer) = ws_pair().await;
        let session = run_session(settings, server).await;

        assert_eq!(next_text(&mut peer).await, b"INFO {}\r\n");
        broker.await.unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session should finish")
            .unwrap();
        assert_eq!(summary.completions.len(), 2);
        assert!(summary.completions.contains(&Direction::ToClient));
        assert!(matches!(peer.next().await, Some(Ok(Message::Close(_)))));
        assert!(!errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn client_drop_closes_upstream() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {}\r\n").await.unwrap();
            let mut rest = Vec::new();
            sock.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
        })
        .await;
        let (settings, _) = recording(Settings::new(addr.to_string()));
        let (server, mut peer) = ws_pair().await;
        let session = run_session(settings, server).await;

        assert_eq!(next_text(&mut peer).await, b"INFO {}\r\n");
        drop(peer);

        let summary = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session should finish")
            .unwrap();
        assert_eq!(summary.completions.len(), 2);
        assert!(summary.completions.contains(&Direction::ToUpstream));
        tokio::time::timeout(Duration::from_secs(2), broker)
            .await
            .expect("broker should see EOF")
            .unwrap();
    }

    #[tokio::test]
    async fn filter_withholds_and_notifies() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"INFO {}\r\n").await.unwrap();
            let mut rest = Vec::new();
            sock.read_to_end(&mut rest).await.unwrap();
            assert_eq!(rest, b"SUB foo.bar 1\r\n");
        })
        .await;
        let (settings, _) = recording(Settings {
            filter: "foo.*".parse().unwrap(),
            ..Settings::new(addr.to_string())
        });
        let (server, mut peer) = ws_pair().await;
        let session = run_session(settings, server).await;

        assert_eq!(next_text(&mut peer).await, b"INFO {}\r\n");
        peer.send(Message::text("SUB foo.bar 1\r\nPUB baz 0\r\n\r\n"))
            .await
            .unwrap();
        assert_eq!(
            next_text(&mut peer).await,
            b"-ERR 'Permissions Violation for Publish to baz'\r\n"
        );

        peer.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session should finish")
            .unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn dial_failure_is_reported_and_client_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (settings, errors) = recording(Settings::new(addr.to_string()));
        let (server, mut peer) = ws_pair().await;
        let summary = GatewaySession::new(settings).run(server).await;

        assert!(summary.server_info.is_none());
        assert!(summary.completions.is_empty());
        let errors = errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains(&addr.to_string()));
        assert!(matches!(peer.next().await, Some(Ok(Message::Close(_)))));
    }

    #[tokio::test]
    async fn bad_greeting_aborts_before_relay() {
        let (addr, broker) = fake_broker(|mut sock| async move {
            sock.write_all(b"PING\r\n").await.unwrap();
            let mut rest = Vec::new();
            let _ = sock.read_to_end(&mut rest).await;
        })
        .await;
        let (settings, errors) = recording(Settings::new(addr.to_string()));
        let (server, _peer) = ws_pair().await;
        let summary = GatewaySession::new(settings).run(server).await;

        assert!(summary.completions.is_empty());
        assert_eq!(errors.lock().unwrap().len(), 1);
        broker.await.unwrap();
    }
}

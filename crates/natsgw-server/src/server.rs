//! Accept loop: one independent session per upgraded WebSocket.

use natsgw_core::GwResult;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::session::GatewaySession;
use crate::settings::Settings;
use crate::transport::websocket::{self, WebSocketConnection};

/// The gateway: a bound client listener plus the shared settings.
pub struct GatewayServer {
    settings: Arc<Settings>,
    local_addr: SocketAddr,
    conn_rx: mpsc::Receiver<WebSocketConnection>,
}

impl GatewayServer {
    /// Bind the client listener described by `settings.upgrade`.
    pub async fn bind(settings: Settings) -> GwResult<Self> {
        let (local_addr, conn_rx) =
            websocket::start_listener(settings.upgrade.clone(), settings.on_error.clone()).await?;
        Ok(Self {
            settings: Arc::new(settings),
            local_addr,
            conn_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve sessions until the listener stops.
    ///
    /// Dropping the returned future stops accepting; sessions already
    /// running keep going on their own tasks.
    pub async fn run(mut self) -> GwResult<()> {
        info!(
            addr = %self.local_addr,
            upstream = %self.settings.upstream_addr,
            tls = self.settings.enable_tls,
            filter = %self.settings.filter,
            "natsgw ready"
        );

        let session = GatewaySession::new(self.settings.clone());
        while let Some(conn) = self.conn_rx.recv().await {
            let session = session.clone();
            tokio::spawn(async move {
                let remote = conn.remote_addr;
                debug!(remote = %remote, "session started");
                let summary = session.run(conn.ws_stream).await;
                debug!(
                    remote = %remote,
                    relayed = !summary.completions.is_empty(),
                    "session finished"
                );
            });
        }

        info!("listener closed, shutting down");
        Ok(())
    }
}

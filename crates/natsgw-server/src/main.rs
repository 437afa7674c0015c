//! natsgw: WebSocket to NATS gateway.
//!
//! Accepts WebSocket clients on a route and relays each one to its own
//! TCP (or TLS) connection to a NATS server, optionally filtering the
//! subjects clients may publish or subscribe to.

use clap::Parser;
use natsgw_server::config::{CliOverrides, GatewayConfig};
use natsgw_server::GatewayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// natsgw: WebSocket to NATS gateway
#[derive(Parser, Debug)]
#[command(name = "natsgw", version, about = "WebSocket to NATS gateway")]
struct Cli {
    /// NATS server address (host:port)
    #[arg(long)]
    nats_addr: Option<String>,

    /// WebSocket listen address (ip:port)
    #[arg(long)]
    ws_addr: Option<String>,

    /// WebSocket route path
    #[arg(long)]
    ws_route: Option<String>,

    /// Accept cross-origin WebSocket upgrades
    #[arg(long)]
    no_origin_check: bool,

    /// Log every relayed frame
    #[arg(long)]
    trace: bool,

    /// Subject filter pattern, e.g. "app.*.events" or "app.>"
    #[arg(long)]
    filter: Option<String>,

    /// Connect to the NATS server over TLS
    #[arg(long)]
    tls: bool,

    /// CA bundle (PEM) to verify the NATS server certificate
    #[arg(long)]
    tls_ca: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.natsgw/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            upstream_addr: self.nats_addr.clone(),
            listen_addr: self.ws_addr.clone(),
            route: self.ws_route.clone(),
            no_origin_check: self.no_origin_check,
            trace: self.trace,
            filter: self.filter.clone(),
            tls: self.tls,
            tls_ca: self.tls_ca.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting natsgw");

    // Load config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let settings = match GatewayConfig::load(Some(config_path.as_path()), &cli.overrides())
        .and_then(GatewayConfig::into_settings)
    {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if settings.enable_tls && settings.tls_config.is_none() {
        warn!("upstream TLS certificates will not be verified");
    }

    let server = match GatewayServer::bind(settings).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start listener");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("natsgw stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

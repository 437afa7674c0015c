//! Immutable gateway settings and the pluggable session callbacks.
//!
//! A [`Settings`] value is built once at startup and shared by every
//! session behind an `Arc`. The error, connect and trace behaviours are
//! strategy values: a default variant plus a custom one supplied by the
//! embedder.

use natsgw_core::{BoxFuture, FilterPattern, FrameSink, GatewayError, GwResult, ServerInfo};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default WebSocket route.
pub const DEFAULT_ROUTE: &str = "/nats";
/// Default WebSocket read/write buffer size.
pub const DEFAULT_WS_BUFFER_SIZE: usize = 1024;

/// Relay direction, used to prefix traced traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream (`-->`).
    ToUpstream,
    /// Upstream to client (`<--`).
    ToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToUpstream => f.write_str("-->"),
            Direction::ToClient => f.write_str("<--"),
        }
    }
}

/// How inbound HTTP requests are upgraded to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub listen_addr: SocketAddr,
    /// Only requests for this path are upgraded.
    pub route: String,
    /// Reject cross-origin upgrades when set.
    pub origin_check: bool,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8910)),
            route: DEFAULT_ROUTE.to_string(),
            origin_check: true,
            read_buffer_size: DEFAULT_WS_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WS_BUFFER_SIZE,
        }
    }
}

/// Receives every error that ends a pump or aborts a session.
#[derive(Clone, Default)]
pub enum ErrorHandler {
    /// Log through `tracing`.
    #[default]
    Log,
    Custom(Arc<dyn Fn(&GatewayError) + Send + Sync>),
}

impl ErrorHandler {
    pub fn custom(f: impl Fn(&GatewayError) + Send + Sync + 'static) -> Self {
        ErrorHandler::Custom(Arc::new(f))
    }

    pub fn handle(&self, err: &GatewayError) {
        match self {
            ErrorHandler::Log if err.is_closed() => debug!(error = %err, "relay side closed"),
            ErrorHandler::Log => warn!(error = %err, "gateway error"),
            ErrorHandler::Custom(f) => f(err),
        }
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorHandler::Log => f.write_str("ErrorHandler::Log"),
            ErrorHandler::Custom(_) => f.write_str("ErrorHandler::Custom(..)"),
        }
    }
}

/// What a connect hook can see and touch before the relay starts.
pub struct ConnectContext<'a> {
    pub server_info: &'a ServerInfo,
    pub client: &'a dyn FrameSink,
    pub upstream: &'a dyn FrameSink,
}

/// Custom connect handshake, run once per session after the greeting.
pub trait ConnectHook: Send + Sync {
    fn on_connect<'a>(&'a self, ctx: ConnectContext<'a>) -> BoxFuture<'a, GwResult<()>>;
}

/// Connect handshake strategy.
#[derive(Clone, Default)]
pub enum ConnectHandler {
    /// Forward the greeting verbatim and let the client send its own
    /// `CONNECT`, which the client pump relays like any other statement.
    #[default]
    ForwardInfo,
    Custom(Arc<dyn ConnectHook>),
}

impl ConnectHandler {
    pub(crate) async fn run(&self, ctx: ConnectContext<'_>, settings: &Settings) -> GwResult<()> {
        match self {
            ConnectHandler::ForwardInfo => {
                let greeting = ctx.server_info.to_frame();
                settings.trace_frame(Direction::ToClient, &greeting);
                ctx.client.send(&greeting).await
            }
            ConnectHandler::Custom(hook) => hook.on_connect(ctx).await,
        }
    }
}

impl fmt::Debug for ConnectHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectHandler::ForwardInfo => f.write_str("ConnectHandler::ForwardInfo"),
            ConnectHandler::Custom(_) => f.write_str("ConnectHandler::Custom(..)"),
        }
    }
}

/// Observer for relayed traffic when tracing is enabled.
#[derive(Clone, Default)]
pub enum TraceHook {
    #[default]
    Log,
    Custom(Arc<dyn Fn(Direction, &[u8]) + Send + Sync>),
}

impl fmt::Debug for TraceHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceHook::Log => f.write_str("TraceHook::Log"),
            TraceHook::Custom(_) => f.write_str("TraceHook::Custom(..)"),
        }
    }
}

/// Gateway settings, shared read-only by all sessions.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `host:port` of the NATS server.
    pub upstream_addr: String,
    pub enable_tls: bool,
    /// Verifying TLS configuration; `None` skips certificate verification.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub trace: bool,
    pub filter: FilterPattern,
    pub upgrade: UpgradeConfig,
    pub on_error: ErrorHandler,
    pub on_connect: ConnectHandler,
    pub on_trace: TraceHook,
}

impl Settings {
    pub fn new(upstream_addr: impl Into<String>) -> Self {
        Self {
            upstream_addr: upstream_addr.into(),
            enable_tls: false,
            tls_config: None,
            trace: false,
            filter: FilterPattern::unrestricted(),
            upgrade: UpgradeConfig::default(),
            on_error: ErrorHandler::default(),
            on_connect: ConnectHandler::default(),
            on_trace: TraceHook::default(),
        }
    }

    /// Surface relayed bytes to the trace hook, if tracing is on.
    pub fn trace_frame(&self, direction: Direction, data: &[u8]) {
        if !self.trace {
            return;
        }
        match &self.on_trace {
            TraceHook::Log => info!(dir = %direction, data = %String::from_utf8_lossy(data), "[TRACE]"),
            TraceHook::Custom(f) => f(direction, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn direction_prefixes() {
        assert_eq!(Direction::ToUpstream.to_string(), "-->");
        assert_eq!(Direction::ToClient.to_string(), "<--");
    }

    #[test]
    fn trace_hook_only_fires_when_enabled() {
        let seen: Arc<Mutex<Vec<(Direction, Vec<u8>)>>> = Arc::default();
        let sink = seen.clone();
        let mut settings = Settings {
            on_trace: TraceHook::Custom(Arc::new(move |dir, data| {
                sink.lock().unwrap().push((dir, data.to_vec()))
            })),
            ..Settings::new("localhost:4222")
        };

        settings.trace_frame(Direction::ToClient, b"PING\r\n");
        assert!(seen.lock().unwrap().is_empty());

        settings.trace = true;
        settings.trace_frame(Direction::ToUpstream, b"PONG\r\n");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Direction::ToUpstream, b"PONG\r\n".to_vec())]
        );
    }

    #[test]
    fn custom_error_handler_receives_errors() {
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let handler = ErrorHandler::custom(move |_| *counter.lock().unwrap() += 1);
        handler.handle(&GatewayError::Closed("client"));
        handler.handle(&GatewayError::Transport("boom".into()));
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn defaults_match_the_stock_gateway() {
        let settings = Settings::new("localhost:4222");
        assert!(settings.filter.is_unrestricted());
        assert!(!settings.enable_tls);
        assert_eq!(settings.upgrade.route, "/nats");
        assert_eq!(settings.upgrade.listen_addr.port(), 8910);
        assert!(matches!(settings.on_connect, ConnectHandler::ForwardInfo));
    }
}

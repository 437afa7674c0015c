//! natsgw-server: relays WebSocket clients to a NATS server.
//!
//! Each accepted WebSocket becomes a [`session::GatewaySession`] that dials
//! the upstream, runs the connect hook, and then pumps traffic both ways
//! until either side goes away.

pub mod config;
pub mod relay;
pub mod server;
pub mod session;
pub mod settings;
pub mod tls;
pub mod transport;
pub mod upstream;

pub use server::GatewayServer;
pub use session::{GatewaySession, SessionSummary};
pub use settings::{
    ConnectContext, ConnectHandler, ConnectHook, Direction, ErrorHandler, Settings, TraceHook,
    UpgradeConfig,
};

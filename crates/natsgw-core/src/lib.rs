//! natsgw-core: protocol library for the NATS WebSocket gateway.
//!
//! Provides NATS command framing, the wire constants, subject
//! authorization, client statement filtering, and the server greeting type.

pub mod error;
pub mod filter;
pub mod framer;
pub mod info;
pub mod protocol;
pub mod subject;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{GatewayError, GwResult};
pub use filter::{filter_message, Filtered, StatementKind, Violation};
pub use framer::{CommandFramer, Frame};
pub use info::{ServerDetails, ServerInfo};
pub use subject::{authorize, FilterPattern};
pub use transport::{BoxFuture, FrameSink};

use thiserror::Error;

use crate::protocol::PROTO_SNIPPET_SIZE;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot reach upstream {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol framing error: {reason}: '{}'", String::from_utf8_lossy(.snippet))]
    Framing { reason: String, snippet: Vec<u8> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} closed")]
    Closed(&'static str),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build a framing error carrying at most [`PROTO_SNIPPET_SIZE`] bytes of
    /// the offending data.
    pub fn framing(reason: impl Into<String>, data: &[u8]) -> Self {
        let end = data.len().min(PROTO_SNIPPET_SIZE);
        GatewayError::Framing {
            reason: reason.into(),
            snippet: data[..end].to_vec(),
        }
    }

    /// Whether this error only reports an orderly close of one side.
    pub fn is_closed(&self) -> bool {
        matches!(self, GatewayError::Closed(_))
    }
}

pub type GwResult<T> = Result<T, GatewayError>;

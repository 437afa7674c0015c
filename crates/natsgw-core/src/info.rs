//! The server greeting (`INFO {...}`) kept for the lifetime of a session.

use serde::Deserialize;

use crate::error::{GatewayError, GwResult};
use crate::protocol::{CR_LF, INFO_PREFIX};

/// Raw greeting payload: the bytes between `INFO ` and the closing CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo(Vec<u8>);

/// Fields of the greeting the gateway looks at. Everything else is opaque.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerDetails {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl ServerInfo {
    /// Extract the greeting from the first frame read off the upstream.
    pub fn from_frame(frame: &[u8]) -> GwResult<Self> {
        let body = frame
            .strip_prefix(INFO_PREFIX)
            .and_then(|rest| rest.strip_suffix(CR_LF))
            .ok_or_else(|| {
                GatewayError::Handshake(format!(
                    "expected INFO greeting, got '{}'",
                    String::from_utf8_lossy(&frame[..frame.len().min(64)])
                ))
            })?;
        Ok(Self(body.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The greeting as it appeared on the wire.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(INFO_PREFIX.len() + self.0.len() + CR_LF.len());
        frame.extend_from_slice(INFO_PREFIX);
        frame.extend_from_slice(&self.0);
        frame.extend_from_slice(CR_LF);
        frame
    }

    /// Best-effort JSON view of the greeting.
    pub fn details(&self) -> Option<ServerDetails> {
        serde_json::from_slice(&self.0).ok()
    }
}

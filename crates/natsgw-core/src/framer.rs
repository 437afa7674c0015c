//! Command framing for the NATS byte stream.
//!
//! A frame is one control line (`VERB args\r\n`), followed for payload
//! verbs by exactly the declared number of bytes and a closing `\r\n`.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, GwResult};
use crate::protocol::{carries_payload, fields, find_crlf, verb, CR_LF, MAX_CONTROL_LINE_SIZE};

/// Read size hint for each refill of the framer buffer.
const READ_CHUNK: usize = 4096;

/// One complete protocol unit, exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The leading verb of the control line.
    pub fn verb(&self) -> &[u8] {
        verb(&self.0)
    }
}

/// Streaming framer: pulls bytes from `reader` and yields whole frames.
///
/// Not cancel-safe across a partial frame; callers drop it on teardown.
#[derive(Debug)]
pub struct CommandFramer<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> CommandFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Resume framing on `reader` with bytes already read from it.
    pub fn with_buffered(reader: R, buffered: Vec<u8>) -> Self {
        Self {
            reader,
            buffer: buffered,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns [`GatewayError::Closed`] when the stream ends cleanly between
    /// frames and [`GatewayError::Transport`] when it ends inside one.
    pub async fn next_frame(&mut self) -> GwResult<Frame> {
        let line_end = self.read_control_line().await?;
        let line = &self.buffer[..line_end - CR_LF.len()];
        if !carries_payload(verb(line)) {
            return Ok(Frame(self.take(line_end)));
        }

        let size = payload_size(line)?;
        let total = line_end
            .checked_add(size)
            .and_then(|n| n.checked_add(CR_LF.len()))
            .ok_or_else(|| GatewayError::framing("payload size overflow", line))?;
        self.fill_to(total).await?;

        if &self.buffer[total - CR_LF.len()..total] != CR_LF {
            return Err(GatewayError::framing(
                "payload not terminated by CRLF",
                &self.buffer[line_end..total],
            ));
        }
        Ok(Frame(self.take(total)))
    }

    /// Give back the reader and any bytes buffered past the last frame.
    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.reader, self.buffer)
    }

    /// Number of bytes buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the offset just past the CRLF ending the control line.
    async fn read_control_line(&mut self) -> GwResult<usize> {
        let mut scanned: usize = 0;
        loop {
            let limit = self.buffer.len().min(MAX_CONTROL_LINE_SIZE);
            // Back up one byte so a CR at the end of the last scan still pairs.
            let start = scanned.saturating_sub(1);
            if let Some(pos) = find_crlf(&self.buffer[start..limit]) {
                return Ok(start + pos + CR_LF.len());
            }
            if self.buffer.len() >= MAX_CONTROL_LINE_SIZE {
                return Err(GatewayError::framing(
                    "maximum control line exceeded",
                    &self.buffer,
                ));
            }
            scanned = limit;

            if self.fill().await? == 0 {
                return Err(if self.buffer.is_empty() {
                    GatewayError::Closed("upstream")
                } else {
                    GatewayError::Transport("upstream closed inside a control line".into())
                });
            }
        }
    }

    async fn fill_to(&mut self, len: usize) -> GwResult<()> {
        while self.buffer.len() < len {
            if self.fill().await? == 0 {
                return Err(GatewayError::Transport(format!(
                    "upstream closed inside a payload ({} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        Ok(())
    }

    async fn fill(&mut self) -> GwResult<usize> {
        self.buffer.reserve(READ_CHUNK);
        self.reader
            .read_buf(&mut self.buffer)
            .await
            .map_err(|e| GatewayError::Transport(format!("upstream read failed: {e}")))
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(len);
        std::mem::replace(&mut self.buffer, rest)
    }
}

/// Parse the declared payload size: the last field of the control line.
fn payload_size(line: &[u8]) -> GwResult<usize> {
    let mut parts = fields(line);
    parts.next();
    let last = parts
        .last()
        .ok_or_else(|| GatewayError::framing("missing payload size", line))?;
    std::str::from_utf8(last)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| GatewayError::framing("invalid payload size", line))
}

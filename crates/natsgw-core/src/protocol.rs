//! NATS wire constants and verb classification.

/// Maximum control line size, terminator included.
pub const MAX_CONTROL_LINE_SIZE: usize = 1024;

/// Bytes of offending input kept in framing diagnostics.
pub const PROTO_SNIPPET_SIZE: usize = 32;

pub const CR_LF: &[u8] = b"\r\n";

/// Prefix of the greeting the server sends first.
pub const INFO_PREFIX: &[u8] = b"INFO ";

/// Verbs whose final control-line field declares a payload length.
///
/// `HPUB`/`HMSG` carry headers+payload and declare the total size last,
/// so they frame exactly like `PUB`/`MSG`.
const PAYLOAD_VERBS: [&[u8]; 4] = [b"PUB", b"MSG", b"HPUB", b"HMSG"];

/// The verb of a control line: everything up to the first whitespace,
/// which includes the CR of a terminated line.
pub fn verb(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(line.len());
    &line[..end]
}

/// Whether a control line with this verb is followed by a payload.
pub fn carries_payload(verb: &[u8]) -> bool {
    PAYLOAD_VERBS.iter().any(|v| v.eq_ignore_ascii_case(verb))
}

/// Split a byte slice on ASCII whitespace, skipping empty fields.
pub fn fields(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| b.is_ascii_whitespace()).filter(|f| !f.is_empty())
}

/// Position of the first CRLF in `data`, if any.
pub fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CR_LF)
}

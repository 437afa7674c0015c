//! Client statement filtering.
//!
//! Client messages arrive in arbitrary chunks, so filtering works on
//! CRLF-separated statements rather than on frames. Only `PUB` and `SUB`
//! statements are inspected; everything else passes untouched.

use std::fmt;

use crate::protocol::{fields, CR_LF};
use crate::subject::FilterPattern;

/// Statement kinds subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Publish,
    Subscription,
}

impl StatementKind {
    /// Classify a statement by its (case-insensitive) `PUB `/`SUB ` prefix.
    pub fn of(statement: &[u8]) -> Option<Self> {
        let prefix = statement.get(..4)?;
        if prefix.eq_ignore_ascii_case(b"PUB ") {
            Some(StatementKind::Publish)
        } else if prefix.eq_ignore_ascii_case(b"SUB ") {
            Some(StatementKind::Subscription)
        } else {
            None
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Publish => f.write_str("Publish"),
            StatementKind::Subscription => f.write_str("Subscription"),
        }
    }
}

/// A withheld statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: StatementKind,
    pub subject: String,
}

impl Violation {
    /// The in-band notice sent back to the client.
    pub fn notice(&self) -> Vec<u8> {
        format!(
            "-ERR 'Permissions Violation for {} to {}'\r\n",
            self.kind, self.subject
        )
        .into_bytes()
    }
}

/// Outcome of filtering one client message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Bytes for a single upstream write, if anything passed.
    pub forward: Option<Vec<u8>>,
    pub violations: Vec<Violation>,
}

/// Split a client message into statements and withhold unauthorized ones.
///
/// With an unrestricted pattern the message is forwarded as-is.
pub fn filter_message(pattern: &FilterPattern, message: &[u8]) -> Filtered {
    if pattern.is_unrestricted() {
        return Filtered {
            forward: (!message.is_empty()).then(|| message.to_vec()),
            violations: Vec::new(),
        };
    }

    let mut accepted: Vec<&[u8]> = Vec::new();
    let mut violations = Vec::new();
    for statement in split_crlf(message) {
        if statement.is_empty() {
            continue;
        }
        let Some(kind) = StatementKind::of(statement) else {
            accepted.push(statement);
            continue;
        };
        let subject = fields(&statement[4..])
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();
        if pattern.authorize(&subject) {
            accepted.push(statement);
        } else {
            violations.push(Violation { kind, subject });
        }
    }

    if accepted.is_empty() {
        return Filtered {
            forward: None,
            violations,
        };
    }
    let mut forward = accepted.join(CR_LF);
    forward.extend_from_slice(CR_LF);
    Filtered {
        forward: Some(forward),
        violations,
    }
}

/// Split on every CRLF; a trailing CRLF yields a final empty piece.
fn split_crlf(data: &[u8]) -> Vec<&[u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if &data[i..i + 2] == CR_LF {
            pieces.push(&data[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    pieces.push(&data[start..]);
    pieces
}

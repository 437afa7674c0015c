//! Subject authorization against an operator-supplied filter pattern.
//!
//! Patterns and subjects are dot-separated token lists. In a pattern, `*`
//! matches exactly one token and `>` accepts everything from its position on.

use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

const SINGLE_WILDCARD: &str = "*";
const FULL_WILDCARD: &str = ">";

/// Check `subject` against `pattern`.
///
/// An empty pattern disables filtering and an empty subject is a statement
/// without one; both are authorized. Matching is positional: the walk stops
/// authorizing at the first `>` regardless of what follows it.
pub fn authorize(pattern: &str, subject: &str) -> bool {
    if pattern.is_empty() || subject.is_empty() {
        return true;
    }
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();
    if subject_tokens.len() < pattern_tokens.len() {
        return false;
    }

    for (p, s) in pattern_tokens.iter().zip(&subject_tokens) {
        match *p {
            FULL_WILDCARD => return true,
            SINGLE_WILDCARD => continue,
            literal if literal == *s => continue,
            _ => return false,
        }
    }
    true
}

/// A validated filter pattern, shared read-only by every session.
///
/// Validation rejects empty tokens and a `>` anywhere but last, so a
/// configured pattern never relies on the positional leniency of
/// [`authorize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPattern(String);

impl FilterPattern {
    /// The pattern that authorizes everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn authorize(&self, subject: &str) -> bool {
        authorize(&self.0, subject)
    }
}

impl FromStr for FilterPattern {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::unrestricted());
        }
        let tokens: Vec<&str> = s.split('.').collect();
        for (i, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(GatewayError::Config(format!(
                    "filter pattern '{s}' has an empty token"
                )));
            }
            if token.chars().any(char::is_whitespace) {
                return Err(GatewayError::Config(format!(
                    "filter pattern '{s}' contains whitespace"
                )));
            }
            if *token == FULL_WILDCARD && i + 1 != tokens.len() {
                return Err(GatewayError::Config(format!(
                    "filter pattern '{s}': '>' is only allowed as the last token"
                )));
            }
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Run identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Longest token accepted from callers.
pub const MAX_TOKEN_LEN: usize = 64;

/// Identifier of a single run.
///
/// Tokens are used verbatim as workspace directory names, so a `RunToken`
/// can only be obtained through [`RunToken::generate`] or a successful
/// [`RunToken::parse`], both of which guarantee a plain identifier with no
/// path separators or dot segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunToken(String);

impl RunToken {
    /// Fresh random token (UUIDv4, simple hex form).
    pub fn generate() -> Self {
        RunToken(Uuid::new_v4().simple().to_string())
    }

    /// Accepts `raw` only if it is a plain identifier.
    pub fn parse(raw: &str) -> Result<Self, OrchestratorError> {
        if is_plain_identifier(raw) {
            Ok(RunToken(raw.to_string()))
        } else {
            Err(OrchestratorError::InvalidToken)
        }
    }

    /// Token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_plain_identifier(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_TOKEN_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl AsRef<str> for RunToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunToken {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_plain_identifier(&value) {
            Ok(RunToken(value))
        } else {
            Err(OrchestratorError::InvalidToken)
        }
    }
}

impl From<RunToken> for String {
    fn from(token: RunToken) -> Self {
        token.0
    }
}

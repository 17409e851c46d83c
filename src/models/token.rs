use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest token accepted from callbacks or queries.
pub const MAX_TOKEN_LEN: usize = 128;

/// Fixed key used by the single-slot flow. Only one single-slot job can be
/// outstanding per process; a second one overwrites the first's slot.
pub const SINGLE_SLOT_KEY: &str = "single-slot";

/// Opaque identifier linking a dispatched job to its eventual result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Fresh random token (v4 UUID, 32 hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The constant key of the single-slot flow.
    pub fn single_slot() -> Self {
        Self(SINGLE_SLOT_KEY.to_string())
    }

    /// Accept a token supplied by an outside caller.
    ///
    /// Outside tokens are not required to look like generated ones; a token
    /// that was never issued is simply absent from the store.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TokenError::Empty);
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(TokenError::TooLong(trimmed.len()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenError {
    #[error("Correlation token is empty")]
    Empty,

    #[error("Correlation token is {0} characters, longer than 128")]
    TooLong(usize),
}

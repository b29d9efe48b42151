//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or interpreting wire-level data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field '{field}' has unexpected type (expected {expected})")]
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("incomplete message: need {needed} more bytes")]
    IncompleteMessage { needed: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

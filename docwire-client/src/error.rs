//! Cursor error types.

use docwire_protocol::{CommandFailure, ServerAddress, ServerCursor};
use docwire_transport::TransportError;
use thiserror::Error;

/// Cursor errors.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("no more batches")]
    NoSuchElement,

    #[error("command on {cursor} at {address} failed: {code} - {message}")]
    CursorCommand {
        cursor: ServerCursor,
        address: ServerAddress,
        code: i32,
        message: String,
    },

    #[error("{cursor} not found on {address}")]
    CursorNotFound {
        cursor: ServerCursor,
        address: ServerAddress,
    },

    #[error("command failed: {0}")]
    Command(CommandFailure),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] docwire_protocol::ProtocolError),

    #[error("a live cursor requires a connection source")]
    MissingConnectionSource,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CursorError {
    /// Turns a failed cursor command into an error naming the cursor.
    pub fn for_cursor(failure: CommandFailure, cursor: ServerCursor, address: ServerAddress) -> Self {
        if failure.is_cursor_not_found() {
            CursorError::CursorNotFound { cursor, address }
        } else {
            CursorError::CursorCommand {
                cursor,
                address,
                code: failure.code,
                message: failure.message,
            }
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            CursorError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<CommandFailure> for CursorError {
    fn from(failure: CommandFailure) -> Self {
        CursorError::Command(failure)
    }
}

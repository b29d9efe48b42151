//! Transport error types.

use docwire_protocol::ServerAddress;
use std::io;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No candidate address could be connected.
    #[error("exception opening socket to {address}")]
    Open {
        address: ServerAddress,
        #[source]
        source: Option<io::Error>,
    },

    #[error("timeout while receiving message from {address}")]
    ReadTimeout { address: ServerAddress },

    #[error("prematurely reached end of stream from {address}")]
    PrematureEndOfStream { address: ServerAddress },

    #[error("{stream} does not support {family} operations")]
    Unsupported {
        stream: &'static str,
        family: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stream is not open")]
    NotOpen,

    #[error("stream has already been opened")]
    AlreadyOpen,

    #[error("stream is closed")]
    Closed,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("completion dropped before delivering a result")]
    CompletionDropped,
}

impl TransportError {
    /// Returns whether this error is a timeout rather than a hard I/O failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::ReadTimeout { .. } => true,
            TransportError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            TransportError::Open {
                source: Some(e), ..
            } => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Returns whether a fresh connection might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Open { .. }
                | TransportError::ReadTimeout { .. }
                | TransportError::PrematureEndOfStream { .. }
                | TransportError::Io(_)
        )
    }
}

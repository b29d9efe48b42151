//! # docwire-client
//!
//! Client core for docwire.
//!
//! This crate provides:
//! - Connection and connection-source capabilities consumed by cursors
//! - Wire capability negotiation per connection
//! - Document decoders
//! - The batch cursor driving `getMore` / `killCursors`

pub mod connection;
pub mod cursor;
pub mod decoder;
pub mod error;

pub use connection::{
    Connection, ConnectionDescription, ConnectionSource, ReadPreference, RetainedSource,
    SessionContext, WireCapability,
};
pub use cursor::{BatchCursor, CloseHandle, CursorOptions};
pub use decoder::{DocumentDecoder, RawDocumentDecoder, SerdeDecoder};
pub use error::CursorError;

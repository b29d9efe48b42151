//! # docwire-protocol
//!
//! Wire vocabulary shared by the docwire transport and client crates.
//!
//! This crate provides:
//! - Server addresses and their ordered socket-address candidates
//! - Namespaces, server cursors and query results
//! - `getMore` / `killCursors` command documents and cursor reply parsing
//! - Legacy binary `OP_GET_MORE` / `OP_KILL_CURSORS` messages
//! - Protocol error types

pub mod address;
pub mod command;
pub mod cursor;
pub mod error;
pub mod namespace;
pub mod opcode;

pub use address::ServerAddress;
pub use command::{
    number_to_return, CommandFailure, GetMoreCommand, KillCursorsCommand,
    CURSOR_NOT_FOUND_CODE,
};
pub use cursor::{QueryResult, ServerCursor};
pub use error::ProtocolError;
pub use namespace::Namespace;
pub use opcode::{GetMoreMessage, KillCursorsMessage, MessageHeader, OpCode};

/// A server document. Field order is preserved, so the command name stays first.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Default port of a document database server.
pub const DEFAULT_PORT: u16 = 27017;

/// Maximum size of a single wire message (48 MB).
pub const MAX_MESSAGE_SIZE: usize = 48 * 1000 * 1000;

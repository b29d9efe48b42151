//! Connection capabilities consumed by cursors.

use crate::error::CursorError;
use docwire_protocol::{Document, Namespace, QueryResult, ServerAddress};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// First wire version with the `getMore` / `killCursors` commands.
pub const COMMAND_CURSOR_WIRE_VERSION: i32 = 4;

/// First wire version that streams exhaust `getMore` replies.
pub const EXHAUST_CURSOR_WIRE_VERSION: i32 = 8;

/// How a connection manages cursors, fixed once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCapability {
    /// `OP_GET_MORE` / `OP_KILL_CURSORS` messages.
    LegacyOpcode,
    /// `getMore` / `killCursors` commands.
    CommandGetMore,
    /// Commands, and exhaust cursors may pin the connection.
    CommandGetMoreWithExhaust,
}

impl WireCapability {
    pub fn from_max_wire_version(max_wire_version: i32) -> Self {
        if max_wire_version >= EXHAUST_CURSOR_WIRE_VERSION {
            WireCapability::CommandGetMoreWithExhaust
        } else if max_wire_version >= COMMAND_CURSOR_WIRE_VERSION {
            WireCapability::CommandGetMore
        } else {
            WireCapability::LegacyOpcode
        }
    }

    pub fn supports_cursor_commands(self) -> bool {
        !matches!(self, WireCapability::LegacyOpcode)
    }

    pub fn supports_exhaust(self) -> bool {
        matches!(self, WireCapability::CommandGetMoreWithExhaust)
    }
}

/// What a connection knows about its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescription {
    address: ServerAddress,
    max_wire_version: i32,
    capability: WireCapability,
}

impl ConnectionDescription {
    pub fn new(address: ServerAddress, max_wire_version: i32) -> Self {
        Self {
            address,
            max_wire_version,
            capability: WireCapability::from_max_wire_version(max_wire_version),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    pub fn capability(&self) -> WireCapability {
        self.capability
    }
}

/// Server selection preference attached to a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        };
        f.write_str(name)
    }
}

/// Per-session bookkeeping passed through unchanged on every cursor command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    session_id: Option<Document>,
    causally_consistent: bool,
}

impl SessionContext {
    pub fn new(session_id: Document) -> Self {
        Self {
            session_id: Some(session_id),
            causally_consistent: false,
        }
    }

    pub fn with_causal_consistency(mut self, enabled: bool) -> Self {
        self.causally_consistent = enabled;
        self
    }

    pub fn session_id(&self) -> Option<&Document> {
        self.session_id.as_ref()
    }

    pub fn is_causally_consistent(&self) -> bool {
        self.causally_consistent
    }
}

/// A checked-out connection to one server. Dropping it releases it.
pub trait Connection {
    fn description(&self) -> &ConnectionDescription;

    /// Runs a command and returns the raw reply.
    ///
    /// A reply with `ok: 0` may be returned as is or as
    /// [`CursorError::Command`]; callers handle both.
    fn command(
        &mut self,
        database: &str,
        command: Document,
        read_preference: ReadPreference,
        session: &SessionContext,
        exhaust: bool,
    ) -> Result<Document, CursorError>;

    /// Sends `OP_GET_MORE` and returns the reply batch.
    fn get_more(
        &mut self,
        namespace: &Namespace,
        cursor_id: i64,
        number_to_return: i32,
    ) -> Result<QueryResult<Document>, CursorError>;

    /// Sends `OP_KILL_CURSORS`.
    fn kill_cursors(&mut self, namespace: &Namespace, cursor_ids: &[i64])
        -> Result<(), CursorError>;
}

/// A reference-counted provider of connections bound to one server.
pub trait ConnectionSource {
    type Connection: Connection;

    fn connection(&self) -> Result<Self::Connection, CursorError>;

    fn session_context(&self) -> &SessionContext;

    fn server_address(&self) -> &ServerAddress;

    fn retain(&self);

    fn release(&self);
}

/// One retain on a [`ConnectionSource`], released when dropped.
pub struct RetainedSource<S: ConnectionSource> {
    source: Arc<S>,
}

impl<S: ConnectionSource> RetainedSource<S> {
    pub fn new(source: Arc<S>) -> Self {
        source.retain();
        Self { source }
    }
}

impl<S: ConnectionSource> Deref for RetainedSource<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: ConnectionSource> Drop for RetainedSource<S> {
    fn drop(&mut self) {
        tracing::trace!("Releasing connection source for {}", self.source.server_address());
        self.source.release();
    }
}

impl<S: ConnectionSource> fmt::Debug for RetainedSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedSource")
            .field("address", self.source.server_address())
            .finish()
    }
}

//! Server cursors and query results.

use crate::address::ServerAddress;
use crate::error::ProtocolError;
use crate::namespace::Namespace;
use crate::Document;
use serde_json::Value;
use std::fmt;

/// Identity of a live server-side cursor.
///
/// A cursor id of zero means the server holds no iteration state, so a
/// `ServerCursor` is never constructed for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCursor {
    id: i64,
    namespace: Namespace,
}

impl ServerCursor {
    /// Returns `None` for the zero id.
    pub fn new(id: i64, namespace: Namespace) -> Option<Self> {
        (id != 0).then_some(Self { id, namespace })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl fmt::Display for ServerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor {} on {}", self.id, self.namespace)
    }
}

/// One round trip's worth of results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub namespace: Namespace,
    pub address: ServerAddress,
    pub results: Vec<T>,
    pub cursor: Option<ServerCursor>,
}

impl<T> QueryResult<T> {
    pub fn new(
        namespace: Namespace,
        results: Vec<T>,
        cursor_id: i64,
        address: ServerAddress,
    ) -> Self {
        let cursor = ServerCursor::new(cursor_id, namespace.clone());
        Self {
            namespace,
            address,
            results,
            cursor,
        }
    }

    /// Returns the live cursor id, or zero.
    pub fn cursor_id(&self) -> i64 {
        self.cursor.as_ref().map_or(0, ServerCursor::id)
    }

    /// Converts every result, stopping at the first failure.
    pub fn try_map<U, E>(
        self,
        f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<QueryResult<U>, E> {
        let results = self.results.into_iter().map(f).collect::<Result<_, _>>()?;
        Ok(QueryResult {
            namespace: self.namespace,
            address: self.address,
            results,
            cursor: self.cursor,
        })
    }
}

impl QueryResult<Document> {
    /// Builds a result from a command reply's `cursor` sub-document.
    ///
    /// `batch_field` is `firstBatch` for the opening command and `nextBatch`
    /// for `getMore`.
    pub fn from_cursor_document(
        cursor: &Document,
        batch_field: &'static str,
        address: ServerAddress,
    ) -> Result<Self, ProtocolError> {
        let id = match cursor.get("id") {
            Some(v) => v.as_i64().ok_or(ProtocolError::UnexpectedType {
                field: "id",
                expected: "int64",
            })?,
            None => return Err(ProtocolError::MissingField("id")),
        };

        let namespace: Namespace = cursor
            .get("ns")
            .ok_or(ProtocolError::MissingField("ns"))?
            .as_str()
            .ok_or(ProtocolError::UnexpectedType {
                field: "ns",
                expected: "string",
            })?
            .parse()?;

        let batch = cursor
            .get(batch_field)
            .ok_or(ProtocolError::MissingField(batch_field))?
            .as_array()
            .ok_or(ProtocolError::UnexpectedType {
                field: batch_field,
                expected: "array",
            })?;

        let results = batch
            .iter()
            .map(|v| match v {
                Value::Object(doc) => Ok(doc.clone()),
                _ => Err(ProtocolError::UnexpectedType {
                    field: batch_field,
                    expected: "array of documents",
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(namespace, results, id, address))
    }

    /// Builds a result from a full command reply (`{cursor: {...}, ok: 1}`).
    pub fn from_command_reply(
        reply: &Document,
        batch_field: &'static str,
        address: ServerAddress,
    ) -> Result<Self, ProtocolError> {
        let cursor = reply
            .get("cursor")
            .ok_or(ProtocolError::MissingField("cursor"))?
            .as_object()
            .ok_or(ProtocolError::UnexpectedType {
                field: "cursor",
                expected: "document",
            })?;
        Self::from_cursor_document(cursor, batch_field, address)
    }
}

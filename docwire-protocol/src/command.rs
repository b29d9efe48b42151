//! Cursor-management command documents.
//!
//! ```text
//! { getMore: <int64>, collection: <string>, batchSize?: <int32>, maxTimeMS?: <int64> }
//! { killCursors: <string>, cursors: [<int64>, ...] }
//! ```

use crate::Document;
use serde_json::Value;
use std::fmt;

/// Server error code reported when a cursor id is unknown to the server.
pub const CURSOR_NOT_FOUND_CODE: i32 = 43;

/// Computes the signed number of documents to request for the next batch.
///
/// With a limit set, never asks for more than the `|limit| - count` documents
/// still owed, capped by a non-zero batch size. A negative result tells the
/// server to close the cursor after this batch; zero lets the server pick.
pub fn number_to_return(limit: i32, batch_size: i32, count: i32) -> i32 {
    if limit != 0 {
        let remaining = limit.saturating_abs().saturating_sub(count);
        if batch_size != 0 && remaining > batch_size.saturating_abs() {
            batch_size
        } else {
            remaining
        }
    } else {
        batch_size
    }
}

/// A `getMore` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMoreCommand {
    pub cursor_id: i64,
    pub collection: String,
    pub batch_size: i32,
    pub max_time_ms: i64,
}

impl GetMoreCommand {
    pub fn new(cursor_id: i64, collection: impl Into<String>) -> Self {
        Self {
            cursor_id,
            collection: collection.into(),
            batch_size: 0,
            max_time_ms: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_time_ms(mut self, max_time_ms: i64) -> Self {
        self.max_time_ms = max_time_ms;
        self
    }

    /// Renders the command. Zero batch size and zero max time are omitted.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("getMore".into(), Value::from(self.cursor_id));
        doc.insert("collection".into(), Value::from(self.collection.clone()));
        let batch_size = self.batch_size.saturating_abs();
        if batch_size != 0 {
            doc.insert("batchSize".into(), Value::from(batch_size));
        }
        if self.max_time_ms != 0 {
            doc.insert("maxTimeMS".into(), Value::from(self.max_time_ms));
        }
        doc
    }
}

/// A `killCursors` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursorsCommand {
    pub collection: String,
    pub cursors: Vec<i64>,
}

impl KillCursorsCommand {
    pub fn new(collection: impl Into<String>, cursors: Vec<i64>) -> Self {
        Self {
            collection: collection.into(),
            cursors,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("killCursors".into(), Value::from(self.collection.clone()));
        doc.insert(
            "cursors".into(),
            Value::Array(self.cursors.iter().copied().map(Value::from).collect()),
        );
        doc
    }
}

/// A command the server rejected (`ok: 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub code: i32,
    pub code_name: Option<String>,
    pub message: String,
}

impl CommandFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: None,
            message: message.into(),
        }
    }

    /// Returns the failure described by a reply, or `None` when `ok` is truthy.
    pub fn from_reply(reply: &Document) -> Option<Self> {
        let ok = match reply.get("ok") {
            Some(Value::Bool(b)) => *b,
            Some(v) => v.as_f64().is_some_and(|n| n != 0.0),
            None => false,
        };
        if ok {
            return None;
        }

        Some(Self {
            code: reply
                .get("code")
                .and_then(Value::as_i64)
                .and_then(|c| i32::try_from(c).ok())
                .unwrap_or(-1),
            code_name: reply
                .get("codeName")
                .and_then(Value::as_str)
                .map(str::to_string),
            message: reply
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
    }

    /// Passes the reply through, or returns the failure it carries.
    pub fn check(reply: Document) -> Result<Document, Self> {
        match Self::from_reply(&reply) {
            Some(failure) => Err(failure),
            None => Ok(reply),
        }
    }

    pub fn is_cursor_not_found(&self) -> bool {
        self.code == CURSOR_NOT_FOUND_CODE
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code_name {
            Some(ref name) => write!(f, "{} ({}): {}", self.code, name, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

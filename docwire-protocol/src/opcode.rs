//! Legacy binary cursor opcodes.
//!
//! Used against servers that predate command-based cursor management. All
//! integers are little-endian.
//!
//! ```text
//! +---------------+------------+-------------+---------+
//! | messageLength | requestID  | responseTo  | opCode  |
//! |    4 bytes    |  4 bytes   |   4 bytes   | 4 bytes |
//! +---------------+------------+-------------+---------+
//!
//! OP_GET_MORE:     ZERO(4) | fullCollectionName(cstring) | numberToReturn(4) | cursorID(8)
//! OP_KILL_CURSORS: ZERO(4) | numberOfCursorIDs(4) | cursorIDs(8 * n)
//! ```

use crate::error::ProtocolError;
use crate::namespace::Namespace;
use crate::MAX_MESSAGE_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use std::sync::atomic::{AtomicI32, Ordering};

/// Size of the standard message header in bytes.
pub const HEADER_SIZE: usize = 16;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Allocates a process-wide request id.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Wire opcodes this crate encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    GetMore = 2005,
    KillCursors = 2007,
}

impl OpCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            2005 => Some(OpCode::GetMore),
            2007 => Some(OpCode::KillCursors),
            _ => None,
        }
    }
}

/// Standard message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.message_length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code);
    }

    /// Parses a header from the front of `buf` without consuming it.
    pub fn peek(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::IncompleteMessage {
                needed: HEADER_SIZE - buf.len(),
            });
        }
        let mut cursor = &buf[..HEADER_SIZE];
        let header = Self {
            message_length: cursor.get_i32_le(),
            request_id: cursor.get_i32_le(),
            response_to: cursor.get_i32_le(),
            op_code: cursor.get_i32_le(),
        };
        if header.message_length < 0 || header.message_length as usize > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: header.message_length.max(0) as usize,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(header)
    }
}

fn finish(op_code: OpCode, request_id: i32, body: BytesMut) -> Result<BytesMut, ProtocolError> {
    let total = HEADER_SIZE + body.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: total,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    MessageHeader {
        message_length: total as i32,
        request_id,
        response_to: 0,
        op_code: op_code as i32,
    }
    .put(&mut buf);
    buf.put_slice(&body);
    Ok(buf)
}

/// `OP_GET_MORE` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMoreMessage {
    pub namespace: Namespace,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

impl GetMoreMessage {
    pub fn encode(&self, request_id: i32) -> Result<BytesMut, ProtocolError> {
        let full_name = self.namespace.full_name();
        let mut body = BytesMut::with_capacity(4 + full_name.len() + 1 + 4 + 8);
        body.put_i32_le(0);
        body.put_slice(full_name.as_bytes());
        body.put_u8(0);
        body.put_i32_le(self.number_to_return);
        body.put_i64_le(self.cursor_id);
        finish(OpCode::GetMore, request_id, body)
    }
}

/// `OP_KILL_CURSORS` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursorsMessage {
    pub cursor_ids: Vec<i64>,
}

impl KillCursorsMessage {
    pub fn encode(&self, request_id: i32) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::with_capacity(8 + 8 * self.cursor_ids.len());
        body.put_i32_le(0);
        body.put_i32_le(self.cursor_ids.len() as i32);
        for id in &self.cursor_ids {
            body.put_i64_le(*id);
        }
        finish(OpCode::KillCursors, request_id, body)
    }
}

//! The byte-stream contract.

use crate::buffer::ByteBuf;
use crate::completion::Completion;
use crate::error::TransportError;
use docwire_protocol::ServerAddress;

/// A byte-stream connection to one server.
///
/// An implementation supports the blocking family (`open`/`read`/`write`),
/// the completion-based family (`open_async`/`read_async`/`write_async`), or
/// both. Calling an unsupported family fails with
/// [`TransportError::Unsupported`] instead of blocking.
///
/// `open` or `open_async` is called at most once, before any read or write.
/// Callers never have more than one read or write outstanding at a time.
pub trait Stream: Send + Sync {
    /// Returns a buffer from this stream's provider.
    fn get_buffer(&self, size: usize) -> ByteBuf;

    /// Connects to the first reachable candidate address.
    fn open(&self) -> Result<(), TransportError>;

    fn open_async(&self, completion: Completion<()>);

    /// Writes every buffer fully, in order.
    fn write(&self, buffers: Vec<ByteBuf>) -> Result<(), TransportError>;

    fn write_async(&self, buffers: Vec<ByteBuf>, completion: Completion<()>);

    /// Reads exactly `num_bytes` bytes.
    fn read(&self, num_bytes: usize) -> Result<ByteBuf, TransportError>;

    fn read_async(&self, num_bytes: usize, completion: Completion<ByteBuf>);

    fn address(&self) -> &ServerAddress;

    /// Closes the stream. Idempotent, and safe after a failed open.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

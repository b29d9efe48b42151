//! Byte buffers with explicit release.
//!
//! A [`ByteBuf`] is single-owner. Releasing it (explicitly or by dropping it)
//! hands the storage back to the provider that issued it, so error paths that
//! abandon a half-filled buffer release it like any other path.

use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

type ReleaseHook = Arc<dyn Fn(BytesMut) + Send + Sync>;

/// Hands out buffers for reads and writes.
pub trait BufferProvider: Send + Sync {
    /// Returns a zero-filled buffer of exactly `size` bytes.
    fn get_buffer(&self, size: usize) -> ByteBuf;
}

/// An owned byte region.
pub struct ByteBuf {
    data: BytesMut,
    on_release: Option<ReleaseHook>,
}

impl ByteBuf {
    /// Wraps bytes with no provider to return them to.
    pub fn new(data: BytesMut) -> Self {
        Self {
            data,
            on_release: None,
        }
    }

    /// Wraps bytes that are handed to `on_release` when the buffer is released.
    pub fn with_release(data: BytesMut, on_release: Arc<dyn Fn(BytesMut) + Send + Sync>) -> Self {
        Self {
            data,
            on_release: Some(on_release),
        }
    }

    /// Releases the buffer back to its provider.
    pub fn release(self) {
        drop(self);
    }

    /// Copies the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl Drop for ByteBuf {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(std::mem::take(&mut self.data));
        }
    }
}

impl Deref for ByteBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for ByteBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(bytes: &[u8]) -> Self {
        Self::new(BytesMut::from(bytes))
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(BytesMut::from(&bytes[..]))
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("len", &self.data.len())
            .field("pooled", &self.on_release.is_some())
            .finish()
    }
}

/// Allocates a fresh buffer per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleBufferProvider;

impl BufferProvider for SimpleBufferProvider {
    fn get_buffer(&self, size: usize) -> ByteBuf {
        ByteBuf::new(BytesMut::zeroed(size))
    }
}

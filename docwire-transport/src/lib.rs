//! # docwire-transport
//!
//! Byte-stream transport for docwire.
//!
//! This crate provides:
//! - The [`Stream`] contract with blocking and completion-based async families
//! - A blocking socket stream with timeout-driven address fallback
//! - An async socket stream driven by a caller-supplied tokio runtime
//! - Buffer providers with explicit release
//! - Socket, TLS and file/env configuration

pub mod async_socket;
pub mod buffer;
pub mod channel;
pub mod completion;
pub mod config;
pub mod error;
pub mod socket;
pub mod stream;
pub mod tls;

pub use async_socket::AsyncSocketStream;
pub use buffer::{BufferProvider, ByteBuf, SimpleBufferProvider};
pub use completion::{block_on, Completion, CompletionFuture};
pub use config::{ConfigError, SocketSettings, SslSettings, TransportConfig};
pub use error::TransportError;
pub use socket::{DefaultSocketFactory, SocketFactory, SocketStream};
pub use stream::Stream;

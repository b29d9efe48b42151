//! Plain and TLS socket channels underneath the streams.

use pin_project_lite::pin_project;
use rustls::{ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

pin_project! {
    /// Async channel that is either plain TCP or TLS.
    #[project = AsyncChannelProj]
    pub enum AsyncChannel {
        Plain { #[pin] stream: tokio::net::TcpStream },
        Tls { #[pin] stream: TlsStream<tokio::net::TcpStream> },
    }
}

impl AsyncRead for AsyncChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            AsyncChannelProj::Plain { stream } => stream.poll_read(cx, buf),
            AsyncChannelProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            AsyncChannelProj::Plain { stream } => stream.poll_write(cx, buf),
            AsyncChannelProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            AsyncChannelProj::Plain { stream } => stream.poll_flush(cx),
            AsyncChannelProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            AsyncChannelProj::Plain { stream } => stream.poll_shutdown(cx),
            AsyncChannelProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}

/// Blocking channel that is either plain TCP or TLS.
pub enum BlockingChannel {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl BlockingChannel {
    fn socket(&self) -> &TcpStream {
        match self {
            BlockingChannel::Plain(stream) => stream,
            BlockingChannel::Tls(stream) => &stream.sock,
        }
    }

    /// Returns a second handle to the socket, used to unblock a pending read.
    pub fn try_clone_socket(&self) -> io::Result<TcpStream> {
        self.socket().try_clone()
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.socket().shutdown(Shutdown::Both)
    }
}

impl Read for BlockingChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockingChannel::Plain(stream) => stream.read(buf),
            BlockingChannel::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for BlockingChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockingChannel::Plain(stream) => stream.write(buf),
            BlockingChannel::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockingChannel::Plain(stream) => stream.flush(),
            BlockingChannel::Tls(stream) => stream.flush(),
        }
    }
}

//! Blocking socket stream.

use crate::buffer::{BufferProvider, ByteBuf};
use crate::channel::BlockingChannel;
use crate::completion::Completion;
use crate::config::{SocketSettings, SslSettings};
use crate::error::TransportError;
use crate::stream::Stream;
use crate::tls;
use docwire_protocol::ServerAddress;
use parking_lot::Mutex;
use rustls::{ClientConnection, StreamOwned};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Creates connected channels for one candidate address.
pub trait SocketFactory: Send + Sync {
    /// Connects to `addr`, applying `settings` and, when enabled, TLS for `host`.
    fn connect(
        &self,
        addr: SocketAddr,
        host: &str,
        settings: &SocketSettings,
        ssl: &SslSettings,
    ) -> Result<BlockingChannel, TransportError>;
}

/// Connects with `socket2`, applying the full socket option surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSocketFactory;

impl SocketFactory for DefaultSocketFactory {
    fn connect(
        &self,
        addr: SocketAddr,
        host: &str,
        settings: &SocketSettings,
        ssl: &SslSettings,
    ) -> Result<BlockingChannel, TransportError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_keepalive(settings.keep_alive)?;
        if settings.receive_buffer_size > 0 {
            socket.set_recv_buffer_size(settings.receive_buffer_size as usize)?;
        }
        if settings.send_buffer_size > 0 {
            socket.set_send_buffer_size(settings.send_buffer_size as usize)?;
        }
        socket.set_read_timeout(settings.read_timeout())?;

        let target = SockAddr::from(addr);
        match settings.connect_timeout() {
            Some(timeout) => socket.connect_timeout(&target, timeout)?,
            None => socket.connect(&target)?,
        }
        let tcp: TcpStream = socket.into();

        if !ssl.enabled {
            return Ok(BlockingChannel::Plain(tcp));
        }

        let config = tls::client_config(ssl)?;
        let server_name = tls::server_name(ssl, host)?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
        let mut stream = StreamOwned::new(conn, tcp);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
        }
        tracing::debug!("TLS handshake with {} complete", addr);
        Ok(BlockingChannel::Tls(Box::new(stream)))
    }
}

/// A stream over a blocking socket. Supports only the blocking family.
pub struct SocketStream {
    address: ServerAddress,
    settings: SocketSettings,
    ssl: SslSettings,
    factory: Arc<dyn SocketFactory>,
    buffers: Arc<dyn BufferProvider>,
    channel: Mutex<Option<BlockingChannel>>,
    /// Second handle to the socket so `close` can unblock a pending read.
    interrupt: Mutex<Option<TcpStream>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl SocketStream {
    pub fn new(
        address: ServerAddress,
        settings: SocketSettings,
        ssl: SslSettings,
        buffers: Arc<dyn BufferProvider>,
    ) -> Self {
        Self {
            address,
            settings,
            ssl,
            factory: Arc::new(DefaultSocketFactory),
            buffers,
            channel: Mutex::new(None),
            interrupt: Mutex::new(None),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn settings(&self) -> &SocketSettings {
        &self.settings
    }

    /// Tries candidates in order. Only a connect timeout moves on to the next
    /// candidate, and only when one remains.
    fn initialize_channel(&self) -> Result<BlockingChannel, TransportError> {
        let candidates = self
            .address
            .socket_addresses()
            .map_err(|e| TransportError::Open {
                address: self.address.clone(),
                source: Some(e),
            })?;

        let mut remaining = candidates.into_iter().peekable();
        while let Some(addr) = remaining.next() {
            tracing::debug!("Connecting to {} ({})...", self.address, addr);
            match self
                .factory
                .connect(addr, self.address.host(), &self.settings, &self.ssl)
            {
                Ok(channel) => {
                    tracing::debug!("Connected to {}", addr);
                    return Ok(channel);
                }
                Err(TransportError::Io(e))
                    if e.kind() == io::ErrorKind::TimedOut && remaining.peek().is_some() =>
                {
                    tracing::debug!("Connect to {} timed out, trying next address", addr);
                }
                Err(TransportError::Io(e)) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    return Err(TransportError::Open {
                        address: self.address.clone(),
                        source: Some(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(TransportError::Open {
            address: self.address.clone(),
            source: None,
        })
    }

    fn unavailable(&self) -> TransportError {
        if self.closed.load(Ordering::SeqCst) {
            TransportError::Closed
        } else {
            TransportError::NotOpen
        }
    }

    fn unsupported() -> TransportError {
        TransportError::Unsupported {
            stream: "SocketStream",
            family: "asynchronous",
        }
    }
}

impl Stream for SocketStream {
    fn get_buffer(&self, size: usize) -> ByteBuf {
        self.buffers.get_buffer(size)
    }

    fn open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpen);
        }

        match self.initialize_channel() {
            Ok(channel) => {
                *self.interrupt.lock() = channel.try_clone_socket().ok();
                *self.channel.lock() = Some(channel);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn open_async(&self, completion: Completion<()>) {
        completion.fail(Self::unsupported());
    }

    fn write(&self, buffers: Vec<ByteBuf>) -> Result<(), TransportError> {
        let mut guard = self.channel.lock();
        let channel = guard.as_mut().ok_or_else(|| self.unavailable())?;
        for buffer in &buffers {
            channel.write_all(buffer)?;
        }
        channel.flush()?;
        Ok(())
    }

    fn write_async(&self, _buffers: Vec<ByteBuf>, completion: Completion<()>) {
        completion.fail(Self::unsupported());
    }

    fn read(&self, num_bytes: usize) -> Result<ByteBuf, TransportError> {
        let mut guard = self.channel.lock();
        let channel = guard.as_mut().ok_or_else(|| self.unavailable())?;

        let mut buffer = self.buffers.get_buffer(num_bytes);
        let mut filled = 0;
        while filled < buffer.len() {
            match channel.read(&mut buffer[filled..]) {
                Ok(0) => {
                    buffer.release();
                    tracing::debug!(
                        "Peer {} closed after {} of {} bytes",
                        self.address,
                        filled,
                        num_bytes
                    );
                    return Err(TransportError::PrematureEndOfStream {
                        address: self.address.clone(),
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    buffer.release();
                    return Err(TransportError::ReadTimeout {
                        address: self.address.clone(),
                    });
                }
                Err(e) => {
                    buffer.release();
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(buffer)
    }

    fn read_async(&self, _num_bytes: usize, completion: Completion<ByteBuf>) {
        completion.fail(Self::unsupported());
    }

    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(socket) = self.interrupt.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(channel) = self.channel.lock().take() {
            let _ = channel.shutdown();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

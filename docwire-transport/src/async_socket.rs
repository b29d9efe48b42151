//! Async socket stream.
//!
//! All I/O runs as tasks on a caller-supplied tokio runtime; no call blocks a
//! runtime thread. The blocking family is a thin adapter that starts the async
//! operation and waits on its completion, so it must be called from outside
//! that runtime.
//!
//! `close` cancels in-flight operations: they complete with
//! [`TransportError::Closed`] and drop their buffers and socket halves.

use crate::buffer::{BufferProvider, ByteBuf};
use crate::channel::AsyncChannel;
use crate::completion::{block_on, Completion};
use crate::config::{SocketSettings, SslSettings};
use crate::error::TransportError;
use crate::stream::Stream;
use crate::tls;
use docwire_protocol::ServerAddress;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;

/// A stream whose I/O is driven by a tokio runtime.
#[derive(Clone)]
pub struct AsyncSocketStream {
    inner: Arc<Inner>,
}

struct Inner {
    address: ServerAddress,
    settings: SocketSettings,
    ssl: SslSettings,
    buffers: Arc<dyn BufferProvider>,
    runtime: Handle,
    /// Read half, checked out by the in-flight read.
    reader: Mutex<Option<ReadHalf<AsyncChannel>>>,
    /// Write half, checked out by the in-flight write.
    writer: Mutex<Option<WriteHalf<AsyncChannel>>>,
    opened: AtomicBool,
    closed: AtomicBool,
    /// Flips to `true` on close; in-flight tasks select on it.
    shutdown: watch::Sender<bool>,
}

impl AsyncSocketStream {
    pub fn new(
        address: ServerAddress,
        settings: SocketSettings,
        ssl: SslSettings,
        buffers: Arc<dyn BufferProvider>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                address,
                settings,
                ssl,
                buffers,
                runtime,
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                opened: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: watch::channel(false).0,
            }),
        }
    }

    pub fn settings(&self) -> &SocketSettings {
        &self.inner.settings
    }
}

/// Resolves once the stream is closed.
async fn closed(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

impl Inner {
    async fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let address = self.address.clone();
        tokio::task::spawn_blocking(move || address.socket_addresses())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|resolved| resolved)
            .map_err(|e| TransportError::Open {
                address: self.address.clone(),
                source: Some(e),
            })
    }

    /// Works through the candidate queue until one connects. Any failure moves
    /// on to the next candidate; only the last failure is reported.
    async fn connect_with_fallback(&self) -> Result<AsyncChannel, TransportError> {
        let mut remaining: VecDeque<SocketAddr> = self.resolve().await?.into();

        let Some(mut next) = remaining.pop_front() else {
            return Err(TransportError::Open {
                address: self.address.clone(),
                source: None,
            });
        };

        loop {
            tracing::debug!("Connecting to {} ({})...", self.address, next);
            match self.attempt(next).await {
                Ok(channel) => {
                    tracing::debug!("Connected to {}", next);
                    return Ok(channel);
                }
                Err(e) => match remaining.pop_front() {
                    Some(addr) => {
                        tracing::debug!("Connect to {} failed ({}), trying {}", next, e, addr);
                        next = addr;
                    }
                    None => {
                        tracing::debug!("Connect to {} failed: {}", next, e);
                        return Err(match e {
                            TransportError::Io(source) => TransportError::Open {
                                address: self.address.clone(),
                                source: Some(source),
                            },
                            other => other,
                        });
                    }
                },
            }
        }
    }

    async fn attempt(&self, addr: SocketAddr) -> Result<AsyncChannel, TransportError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(self.settings.keep_alive)?;
        if self.settings.receive_buffer_size > 0 {
            socket.set_recv_buffer_size(self.settings.receive_buffer_size)?;
        }
        if self.settings.send_buffer_size > 0 {
            socket.set_send_buffer_size(self.settings.send_buffer_size)?;
        }

        let tcp: TcpStream = match self.settings.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
            None => socket.connect(addr).await?,
        };
        tcp.set_nodelay(true)?;

        if !self.ssl.enabled {
            return Ok(AsyncChannel::Plain { stream: tcp });
        }

        let connector = TlsConnector::from(tls::client_config(&self.ssl)?);
        let server_name = tls::server_name(&self.ssl, self.address.host())?;
        tracing::debug!("Performing TLS handshake with {}...", addr);
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
        Ok(AsyncChannel::Tls { stream })
    }

    /// Fills `buffer` completely. The buffer is released on every failure.
    async fn fill(
        &self,
        reader: &mut ReadHalf<AsyncChannel>,
        mut buffer: ByteBuf,
    ) -> Result<ByteBuf, TransportError> {
        let mut filled = 0;
        while filled < buffer.len() {
            let read = reader.read(&mut buffer[filled..]);
            let result = match self.settings.read_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, read).await.ok(),
                None => Some(read.await),
            };
            let Some(result) = result else {
                buffer.release();
                return Err(TransportError::ReadTimeout {
                    address: self.address.clone(),
                });
            };

            match result {
                Ok(0) => {
                    buffer.release();
                    tracing::debug!("Peer {} closed after {} bytes", self.address, filled);
                    return Err(TransportError::PrematureEndOfStream {
                        address: self.address.clone(),
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    buffer.release();
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(buffer)
    }

    /// Writes each buffer until drained before moving on to the next.
    async fn drain(
        writer: &mut WriteHalf<AsyncChannel>,
        buffers: &[ByteBuf],
    ) -> Result<(), TransportError> {
        for buffer in buffers {
            let mut written = 0;
            while written < buffer.len() {
                let n = writer.write(&buffer[written..]).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                written += n;
            }
        }
        writer.flush().await?;
        Ok(())
    }

    fn unavailable(&self) -> TransportError {
        if self.closed.load(Ordering::SeqCst) {
            TransportError::Closed
        } else {
            TransportError::NotOpen
        }
    }

    fn install(&self, channel: AsyncChannel) -> Result<(), TransportError> {
        let (read_half, write_half) = tokio::io::split(channel);
        let mut reader = self.reader.lock();
        let mut writer = self.writer.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        *reader = Some(read_half);
        *writer = Some(write_half);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        let reader = self.reader.lock().take();
        let writer = self.writer.lock().take();
        if reader.is_some() || writer.is_some() {
            tracing::debug!("Closing channel to {}", self.address);
        }
    }

    fn check_in_reader(&self, half: ReadHalf<AsyncChannel>) {
        let mut slot = self.reader.lock();
        if !self.closed.load(Ordering::SeqCst) {
            *slot = Some(half);
        }
    }

    fn check_in_writer(&self, half: WriteHalf<AsyncChannel>) {
        let mut slot = self.writer.lock();
        if !self.closed.load(Ordering::SeqCst) {
            *slot = Some(half);
        }
    }
}

impl Stream for AsyncSocketStream {
    fn get_buffer(&self, size: usize) -> ByteBuf {
        self.inner.buffers.get_buffer(size)
    }

    fn open(&self) -> Result<(), TransportError> {
        block_on(|completion| self.open_async(completion))
    }

    fn open_async(&self, completion: Completion<()>) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return completion.fail(TransportError::Closed);
        }
        if self.inner.opened.swap(true, Ordering::SeqCst) {
            return completion.fail(TransportError::AlreadyOpen);
        }

        let inner = self.inner.clone();
        let shutdown = self.inner.shutdown.subscribe();
        self.inner.runtime.spawn(async move {
            let result = tokio::select! {
                connected = inner.connect_with_fallback() => {
                    connected.and_then(|channel| inner.install(channel))
                }
                _ = closed(shutdown) => Err(TransportError::Closed),
            };
            if result.is_err() {
                inner.close();
            }
            completion.complete(result);
        });
    }

    fn write(&self, buffers: Vec<ByteBuf>) -> Result<(), TransportError> {
        block_on(|completion| self.write_async(buffers, completion))
    }

    fn write_async(&self, buffers: Vec<ByteBuf>, completion: Completion<()>) {
        let Some(mut writer) = self.inner.writer.lock().take() else {
            return completion.fail(self.inner.unavailable());
        };

        let inner = self.inner.clone();
        let shutdown = self.inner.shutdown.subscribe();
        self.inner.runtime.spawn(async move {
            let result = tokio::select! {
                written = Inner::drain(&mut writer, &buffers) => written,
                _ = closed(shutdown) => Err(TransportError::Closed),
            };
            inner.check_in_writer(writer);
            completion.complete(result);
        });
    }

    fn read(&self, num_bytes: usize) -> Result<ByteBuf, TransportError> {
        block_on(|completion| self.read_async(num_bytes, completion))
    }

    fn read_async(&self, num_bytes: usize, completion: Completion<ByteBuf>) {
        let Some(mut reader) = self.inner.reader.lock().take() else {
            return completion.fail(self.inner.unavailable());
        };

        let buffer = self.inner.buffers.get_buffer(num_bytes);
        let inner = self.inner.clone();
        let shutdown = self.inner.shutdown.subscribe();
        self.inner.runtime.spawn(async move {
            // A cancelled fill drops its buffer, which releases it.
            let result = tokio::select! {
                filled = inner.fill(&mut reader, buffer) => filled,
                _ = closed(shutdown) => Err(TransportError::Closed),
            };
            inner.check_in_reader(reader);
            completion.complete(result);
        });
    }

    fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

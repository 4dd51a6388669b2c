//! Connection handle — one accepted client stream, split into halves.
//!
//! The read half is consumed by whichever relay is forwarding *from* this
//! participant; the write half is shared by the owning relay and by
//! handshakes that notify this participant of presence. Both sit behind
//! their own mutex so a concurrent read and write never contend.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{watch, MappedMutexGuard, Mutex, MutexGuard};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered read side of a connection.
pub type ConnectionReader = BufReader<BoxedReader>;

/// Scratch buffer size for reads, large enough for any handshake record.
pub const READ_BUFFER_SIZE: usize = 8192;

// The read half plus any line fragment a cancelled `read_line` left behind.
struct ReadSide {
    buffered: ConnectionReader,
    partial: Vec<u8>,
}

pub struct Connection {
    id: u64,
    remote_addr: SocketAddr,
    reader: Mutex<ReadSide>,
    writer: Mutex<BoxedWriter>,
    // Sticky; flips to true exactly once.
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(id: u64, remote_addr: SocketAddr, reader: BoxedReader, writer: BoxedWriter) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            remote_addr,
            reader: Mutex::new(ReadSide {
                buffered: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
                partial: Vec::new(),
            }),
            writer: Mutex::new(writer),
            closed,
        }
    }

    pub fn from_tcp(id: u64, stream: TcpStream) -> io::Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::new(id, remote_addr, Box::new(read_half), Box::new(write_half)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Exclusive access to the buffered read half.
    pub async fn lock_reader(&self) -> MappedMutexGuard<'_, ConnectionReader> {
        MutexGuard::map(self.reader.lock().await, |side| &mut side.buffered)
    }

    /// Write `bytes` in full and flush. Aborts if the connection is closed
    /// while the write is pending.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        tokio::select! {
            _ = self.closed() => Err(closed_error()),
            result = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
        }
    }

    /// Read up to and including the next `\n` into `buf`.
    ///
    /// Returns 0 at end of stream. A trailing fragment without a delimiter
    /// is returned as-is before the 0. Fails if the connection is closed
    /// while the read is pending.
    ///
    /// Cancel safe: bytes of an unfinished line stay with the connection and
    /// are returned by the next call, whoever makes it.
    pub async fn read_line(&self, buf: &mut Vec<u8>) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        tokio::select! {
            _ = self.closed() => Err(closed_error()),
            result = async {
                let mut side = self.reader.lock().await;
                let ReadSide { buffered, partial } = &mut *side;
                buffered
                    .read_until(parley_core::wire::MESSAGE_DELIMITER, partial)
                    .await?;
                let n = partial.len();
                buf.append(partial);
                Ok::<_, io::Error>(n)
            } => result,
        }
    }

    /// Wait until the client either hangs up or sends something, without
    /// consuming any bytes. Returns `true` on hang-up.
    pub async fn probe_hangup(&self) -> io::Result<bool> {
        let mut side = self.reader.lock().await;
        if !side.partial.is_empty() {
            return Ok(false);
        }
        let available = side.buffered.fill_buf().await?;
        Ok(available.is_empty())
    }

    /// Mark the connection closed and shut down the write half.
    /// Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(conn = self.id, error = %e, "shutdown after close failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

/// In-memory connection for tests. The returned stream is the client end.
#[cfg(any(test, feature = "test-util"))]
pub fn duplex_connection(id: u64) -> (Connection, tokio::io::DuplexStream) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let (read_half, write_half) = tokio::io::split(server);
    let addr = SocketAddr::from(([127, 0, 0, 1], 40000 + (id % 20000) as u16));
    (
        Connection::new(id, addr, Box::new(read_half), Box::new(write_half)),
        client,
    )
}

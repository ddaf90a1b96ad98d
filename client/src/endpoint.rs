//! One framed connection: a shared send side and an owned receive side.
//!
//! The send side ([`Connection`]) is shared behind an `Arc` by every task that
//! needs to talk to the remote end. Sends are serialised by a per-connection
//! lock and bounded by [`WRITE_TIMEOUT`], so a stalled remote never blocks
//! sends to anyone else.
//!
//! The receive side ([`Receiver`]) is owned by the single task that reads the
//! connection, which keeps packets in arrival order. It decodes through its
//! own [`PacketBuffer`], so steady-state receiving does not allocate.
//!
//! Closing a [`Connection`] wakes a blocked [`Receiver::next`] immediately.

use crate::error::{Result, SessionError};
use log::trace;
use protocol::{Packet, PacketBuffer, HEADER_SIZE};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

/// Upper bound on acquiring the send lock plus writing one frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Writer {
    half: BoxedWriter,
    buf: Vec<u8>,
}

/// Send side of a connection.
pub struct Connection {
    writer: Mutex<Writer>,
    closed: watch::Sender<bool>,
    shut_down: AtomicBool,
    peer_addr: SocketAddr,
}

/// Receive side of a connection.
pub struct Receiver {
    reader: BoxedReader,
    frame: Vec<u8>,
    buffer: PacketBuffer,
    closed: watch::Receiver<bool>,
    peer_addr: SocketAddr,
}

/// Splits a stream into its shared send side and its receive side.
pub fn split<S>(stream: S, peer_addr: SocketAddr) -> (Arc<Connection>, Receiver)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (closed_tx, closed_rx) = watch::channel(false);
    let buffer = PacketBuffer::new();

    let conn = Arc::new(Connection {
        writer: Mutex::new(Writer {
            half: Box::new(write_half),
            buf: Vec::with_capacity(256),
        }),
        closed: closed_tx,
        shut_down: AtomicBool::new(false),
        peer_addr,
    });
    let receiver = Receiver {
        reader: Box::new(read_half),
        frame: Vec::with_capacity(buffer.capacity()),
        buffer,
        closed: closed_rx,
        peer_addr,
    };
    (conn, receiver)
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Encodes and writes one packet.
    ///
    /// A write that fails or times out part way leaves a torn frame on the
    /// stream, so the connection is marked closed before the error returns.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        trace!("-> {} {}", self.peer_addr, packet.name());
        let deadline = Instant::now() + WRITE_TIMEOUT;
        let mut writer = timeout_at(deadline, self.writer.lock())
            .await
            .map_err(|_| SessionError::Timeout)?;
        let Writer { half, buf } = &mut *writer;

        protocol::encode_into(packet, buf)?;
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let result = match timeout_at(deadline, half.write_all(buf)).await {
            Ok(written) => written.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout),
        };
        if result.is_err() {
            self.closed.send_replace(true);
        }
        result
    }

    /// Marks the connection closed and shuts down the write side.
    ///
    /// Idempotent. The receiving task observes the close at once.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(mut writer) = timeout(WRITE_TIMEOUT, self.writer.lock()).await {
            let _ = timeout(WRITE_TIMEOUT, writer.half.shutdown()).await;
        }
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        wait_closed(&mut rx).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Receiver {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Waits up to `limit` for the next frame and decodes it.
    ///
    /// The returned packet borrows the receiver's decode buffer and is valid
    /// until the next call.
    pub async fn next(&mut self, limit: Duration) -> Result<&Packet> {
        let Receiver {
            reader,
            frame,
            buffer,
            closed,
            peer_addr,
        } = self;

        if *closed.borrow() {
            return Err(SessionError::Closed);
        }

        tokio::select! {
            biased;
            _ = wait_closed(closed) => return Err(SessionError::Closed),
            result = timeout(limit, read_frame(reader, frame, buffer)) => match result {
                Ok(read) => read?,
                Err(_) => return Err(SessionError::Timeout),
            },
        }

        let (packet, _) = buffer.decode(frame)?;
        trace!("<- {} {}", peer_addr, packet.name());
        Ok(packet)
    }
}

/// Reads exactly one frame into `frame`, validating its header first.
async fn read_frame(
    reader: &mut BoxedReader,
    frame: &mut Vec<u8>,
    buffer: &PacketBuffer,
) -> Result<()> {
    frame.clear();
    frame.resize(HEADER_SIZE, 0);
    reader.read_exact(frame).await?;

    let header = buffer.parse_header(frame)?;
    frame.resize(header.size, 0);
    reader.read_exact(&mut frame[HEADER_SIZE..]).await?;
    Ok(())
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // Sender dropped: the connection is gone with it.
        if rx.changed().await.is_err() {
            return;
        }
    }
}

//! Transport seams and framed, deadline-bounded I/O.
//!
//! The engines never open sockets themselves. The sender gets a [`Dialer`]
//! it can call as often as it needs to reconnect; the receiver gets an
//! already-bound [`Acceptor`]. Each established connection is wrapped in a
//! [`Link`], which reads and writes whole frames and gives up on any single
//! read or write after the configured timeout.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use retransmit_core::{Frame, FrameHeader, HEADER_LEN};

use crate::error::LinkError;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Opens a fresh connection to the receiver. Called once per attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self) -> io::Result<Self::Conn>;

    /// Where this dialer connects, for logs.
    fn destination(&self) -> String;
}

/// Yields inbound connections together with a peer label for logs.
#[async_trait]
pub trait Acceptor: Send {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Conn, String)>;
}

/// Dials a `host:port` over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        // One small ack per frame; never wait for Nagle.
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn destination(&self) -> String {
        self.addr.clone()
    }
}

#[async_trait]
impl Acceptor for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// One established connection, spoken to in whole frames.
pub struct Link<C> {
    stream: C,
    timeout: Duration,
    peer: String,
}

impl<C> Link<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: C, timeout: Duration, peer: impl Into<String>) -> Self {
        Self {
            stream,
            timeout,
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read and verify the next frame, or fail once `timeout` has passed.
    pub async fn read_frame(&mut self) -> Result<Frame, LinkError> {
        let limit = self.timeout;
        tokio::time::timeout(limit, read_frame(&mut self.stream))
            .await
            .map_err(|_| LinkError::Timeout(limit))?
    }

    /// Encode and write `frame` in full, or fail once `timeout` has passed.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        let limit = self.timeout;
        tokio::time::timeout(limit, write_frame(&mut self.stream, frame))
            .await
            .map_err(|_| LinkError::Timeout(limit))?
    }

    /// Best-effort orderly close.
    pub async fn shutdown(&mut self) {
        let limit = self.timeout;
        let _ = tokio::time::timeout(limit, self.stream.shutdown()).await;
    }
}

/// Read exactly one frame: header, then `length` payload bytes.
///
/// A stream that ends part-way through surfaces as an `UnexpectedEof`
/// I/O error. Magic and length are checked before the payload is
/// allocated; the checksum once it has arrived.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).await?;
    let header = FrameHeader::parse(&head)?;

    let mut payload = BytesMut::zeroed(header.payload_len());
    reader.read_exact(&mut payload).await?;

    let frame = Frame::from_parts(&header, payload.freeze())?;
    tracing::trace!(
        sequence = frame.sequence,
        len = frame.len(),
        checksum = hex::encode(&header.checksum[..8]),
        "frame verified"
    );
    Ok(frame)
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

//! In-process transport with scripted faults.
//!
//! [`network`] returns a connected [`MemoryDialer`] / [`MemoryAcceptor`]
//! pair backed by `tokio::io::duplex`. Each dial consumes the next
//! [`Fault`] from the dialer's script (healthy once the script runs out),
//! so a test can refuse dials, or cut a connection after an exact number
//! of bytes in either direction, and get the same interleaving every run.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::link::{Acceptor, Dialer};

const PIPE_CAPACITY: usize = 64 * 1024;

/// What happens to the connection produced by one dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Healthy,
    /// The dial fails with `ConnectionRefused`.
    Refuse,
    /// Writes from the dialing side fail after this many bytes.
    CutWrite(usize),
    /// Reads on the dialing side fail after this many bytes.
    CutRead(usize),
    /// Reads on the dialing side never complete. Writes still go through,
    /// so the peer sees every frame but its replies vanish.
    MuteRead,
}

pub fn network() -> (MemoryDialer, MemoryAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dialer = MemoryDialer {
        incoming: tx.clone(),
        script: Arc::new(Mutex::new(VecDeque::new())),
        dials: Arc::new(AtomicUsize::new(0)),
    };
    let acceptor = MemoryAcceptor {
        incoming: rx,
        _keepalive: tx,
    };
    (dialer, acceptor)
}

#[derive(Clone)]
pub struct MemoryDialer {
    incoming: mpsc::UnboundedSender<(DuplexStream, String)>,
    script: Arc<Mutex<VecDeque<Fault>>>,
    dials: Arc<AtomicUsize>,
}

impl MemoryDialer {
    /// Queue faults for the next dials, in order.
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(faults);
    }

    /// Dial attempts so far, refused ones included.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn next_fault(&self) -> Fault {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Fault::Healthy)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Conn = Flaky<DuplexStream>;

    async fn dial(&self) -> io::Result<Flaky<DuplexStream>> {
        let n = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
        let fault = self.next_fault();
        if fault == Fault::Refuse {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            ));
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.incoming
            .send((remote, format!("memory-{n}")))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "acceptor dropped"))?;

        Ok(Flaky::new(local, fault))
    }

    fn destination(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryAcceptor {
    incoming: mpsc::UnboundedReceiver<(DuplexStream, String)>,
    // Keeps accept() pending rather than failing once every dialer is gone,
    // like a bound listener nobody connects to.
    _keepalive: mpsc::UnboundedSender<(DuplexStream, String)>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    type Conn = DuplexStream;

    async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "memory network closed"))
    }
}

// ── Flaky ─────────────────────────────────────────────────────────────────────

/// A stream that fails with `ConnectionReset` once a byte budget is spent,
/// or whose reads hang forever when muted.
pub struct Flaky<S> {
    inner: S,
    write_budget: Option<usize>,
    read_budget: Option<usize>,
    muted: bool,
}

impl<S> Flaky<S> {
    pub fn new(inner: S, fault: Fault) -> Self {
        let (write_budget, read_budget) = match fault {
            Fault::CutWrite(n) => (Some(n), None),
            Fault::CutRead(n) => (None, Some(n)),
            Fault::Healthy | Fault::Refuse | Fault::MuteRead => (None, None),
        };
        Self {
            inner,
            write_budget,
            read_budget,
            muted: fault == Fault::MuteRead,
        }
    }
}

fn cut() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "scripted disconnect")
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Flaky<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match this.write_budget {
            None => Pin::new(&mut this.inner).poll_write(cx, buf),
            Some(0) => Poll::Ready(Err(cut())),
            Some(left) => {
                let allowed = buf.len().min(left);
                match Pin::new(&mut this.inner).poll_write(cx, &buf[..allowed]) {
                    Poll::Ready(Ok(n)) => {
                        this.write_budget = Some(left - n);
                        Poll::Ready(Ok(n))
                    }
                    other => other,
                }
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Flaky<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.muted {
            return Poll::Pending;
        }
        match this.read_budget {
            None => Pin::new(&mut this.inner).poll_read(cx, buf),
            Some(0) => Poll::Ready(Err(cut())),
            Some(left) => {
                let mut scratch = vec![0u8; buf.remaining().min(left)];
                let mut limited = ReadBuf::new(&mut scratch);
                match Pin::new(&mut this.inner).poll_read(cx, &mut limited) {
                    Poll::Ready(Ok(())) => {
                        let got = limited.filled().len();
                        buf.put_slice(limited.filled());
                        this.read_budget = Some(left - got);
                        Poll::Ready(Ok(()))
                    }
                    other => other,
                }
            }
        }
    }
}

// ── Capture ───────────────────────────────────────────────────────────────────

/// An output sink that can be inspected after it has been handed away.
#[derive(Debug, Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AsyncWrite for Capture {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

//! Sender: chunk the input, then push frames through a connection that
//! may drop at any moment.
//!
//! Two tasks:
//! - the producer reads `frame_size` chunks from the input, numbers them
//!   0, 1, 2, ... and pushes them into a bounded queue (blocking when it is
//!   full), ending with an empty terminal frame;
//! - the connection loop dials, sends the held frame, waits for its ack,
//!   and only then takes the next frame from the queue.
//!
//! The held frame survives every connection failure. It is dropped only
//! after an ack carrying its exact sequence number arrives, and it is
//! re-sent byte-for-byte on the next connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use retransmit_core::{Frame, MAX_PAYLOAD};

use crate::backoff::{Backoff, Clock, FixedBackoff, TokioClock};
use crate::error::{LinkError, SendError};
use crate::link::{Dialer, Link};

/// Default read-ahead, in frames.
pub const QUEUE_DEPTH: usize = 16;

/// What a completed run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendSummary {
    /// Frames acknowledged, terminal frame included.
    pub frames: u64,
    /// Payload bytes acknowledged.
    pub bytes: u64,
    /// Connections established.
    pub connections: u64,
    /// Frames written again after a connection failure.
    pub retransmissions: u64,
}

pub struct SenderEngine<D> {
    dialer: D,
    frame_size: usize,
    timeout: Duration,
    queue_depth: usize,
    backoff: Arc<dyn Backoff>,
    clock: Arc<dyn Clock>,
}

/// Why a connection's exchange stopped early.
enum Interrupt {
    Link(LinkError),
    Fatal(SendError),
}

impl From<LinkError> for Interrupt {
    fn from(e: LinkError) -> Self {
        Interrupt::Link(e)
    }
}

/// State that outlives individual connections.
#[derive(Default)]
struct Progress {
    held: Option<Frame>,
    last_written: Option<u64>,
    failures: u32,
    summary: SendSummary,
}

impl<D: Dialer> SenderEngine<D> {
    pub fn new(dialer: D, frame_size: usize, timeout: Duration) -> Result<Self, SendError> {
        if frame_size == 0 || frame_size > MAX_PAYLOAD {
            return Err(SendError::InvalidFrameSize {
                got: frame_size,
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self {
            dialer,
            frame_size,
            timeout,
            queue_depth: QUEUE_DEPTH,
            backoff: Arc::new(FixedBackoff::default()),
            clock: Arc::new(TokioClock),
        })
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send everything `input` yields, then the terminal frame.
    ///
    /// Returns once the terminal frame is acknowledged. Network trouble is
    /// retried forever; only an unreadable input ends the run early.
    pub async fn run<R>(self, input: R) -> Result<SendSummary, SendError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::channel(self.queue_depth);
        let (failed_tx, failed_rx) = oneshot::channel();

        let frame_size = self.frame_size;
        let producer = tokio::spawn(async move {
            // The failure is on record before the queue closes.
            if let Err(e) = produce(input, frame_size, frames_tx.clone()).await {
                let _ = failed_tx.send(e);
            }
            drop(frames_tx);
        });

        // A clean producer exit drops failed_tx, which disables that branch.
        let mut failed_rx = failed_rx;
        let result = tokio::select! {
            Ok(e) = &mut failed_rx => Err(SendError::Source(e)),
            r = self.deliver(frames_rx) => r,
        };
        let result = match result {
            Err(SendError::SourceClosed) => match failed_rx.try_recv() {
                Ok(e) => Err(SendError::Source(e)),
                Err(_) => Err(SendError::SourceClosed),
            },
            other => other,
        };

        producer.abort();
        if let Err(e) = &result {
            tracing::error!(error = %e, "transfer abandoned");
        }
        result
    }

    async fn deliver(&self, mut queue: mpsc::Receiver<Frame>) -> Result<SendSummary, SendError> {
        let destination = self.dialer.destination();
        let mut progress = Progress::default();

        loop {
            tracing::info!(%destination, "connecting");
            let conn = match tokio::time::timeout(self.timeout, self.dialer.dial()).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    progress.failures += 1;
                    tracing::warn!(%destination, error = %e, attempt = progress.failures, "connecting failed");
                    self.pause(progress.failures).await;
                    continue;
                }
                Err(_) => {
                    progress.failures += 1;
                    tracing::warn!(%destination, timeout = ?self.timeout, attempt = progress.failures, "connecting timed out");
                    self.pause(progress.failures).await;
                    continue;
                }
            };

            progress.summary.connections += 1;
            tracing::info!(%destination, "connection opened");
            let mut link = Link::new(conn, self.timeout, destination.clone());

            match self.exchange(&mut link, &mut queue, &mut progress).await {
                Ok(()) => {
                    link.shutdown().await;
                    let s = &progress.summary;
                    tracing::info!(
                        frames = s.frames,
                        bytes = s.bytes,
                        connections = s.connections,
                        retransmissions = s.retransmissions,
                        "transfer complete"
                    );
                    return Ok(progress.summary);
                }
                Err(Interrupt::Fatal(e)) => return Err(e),
                Err(Interrupt::Link(e)) => {
                    progress.failures += 1;
                    tracing::warn!(
                        %destination,
                        error = %e,
                        held = ?progress.held.as_ref().map(|f| f.sequence),
                        "connection failed"
                    );
                }
            }

            self.pause(progress.failures).await;
        }
    }

    /// Stop-and-wait over one connection until the terminal frame is acked
    /// or the connection breaks.
    async fn exchange<C>(
        &self,
        link: &mut Link<C>,
        queue: &mut mpsc::Receiver<Frame>,
        progress: &mut Progress,
    ) -> Result<(), Interrupt>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            let frame = match &progress.held {
                Some(frame) => frame.clone(),
                None => {
                    let next = queue
                        .recv()
                        .await
                        .ok_or(Interrupt::Fatal(SendError::SourceClosed))?;
                    progress.held = Some(next.clone());
                    next
                }
            };

            if progress.last_written == Some(frame.sequence) {
                progress.summary.retransmissions += 1;
            }
            progress.last_written = Some(frame.sequence);
            link.write_frame(&frame).await?;
            tracing::debug!(sequence = frame.sequence, len = frame.len(), "sent frame");

            let ack = link.read_frame().await?;
            if ack.sequence != frame.sequence {
                return Err(LinkError::AckMismatch {
                    expected: frame.sequence,
                    got: ack.sequence,
                }
                .into());
            }

            progress.failures = 0;
            progress.summary.frames += 1;
            progress.summary.bytes += frame.len() as u64;
            tracing::debug!(
                sequence = ack.sequence,
                total_bytes = progress.summary.bytes,
                "received ack"
            );

            if frame.is_terminal() {
                return Ok(());
            }
            progress.held = None;
        }
    }

    async fn pause(&self, attempt: u32) {
        self.clock.sleep(self.backoff.delay(attempt)).await;
    }
}

/// Read `input` into numbered frames until it is exhausted.
///
/// Every frame but the last is exactly `frame_size` bytes. If the last data
/// frame is non-empty, an empty terminal frame follows it, so end of stream
/// is never ambiguous.
async fn produce<R>(mut input: R, frame_size: usize, frames: mpsc::Sender<Frame>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut sequence: u64 = 0;

    loop {
        let mut buf = BytesMut::zeroed(frame_size);
        let mut filled = 0;
        let mut eof = false;

        while filled < frame_size {
            match input.read(&mut buf[filled..]).await {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);

        if frames.send(Frame::data(sequence, buf.freeze())).await.is_err() {
            // Connection loop is gone; the run is already decided.
            return Ok(());
        }
        sequence += 1;

        if eof {
            if filled > 0 && frames.send(Frame::terminal(sequence)).await.is_err() {
                return Ok(());
            }
            tracing::debug!(frames = sequence + u64::from(filled > 0), "input exhausted");
            return Ok(());
        }
    }
}

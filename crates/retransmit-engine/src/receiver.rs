//! Receiver: accept connections, admit frames strictly in order, and hand
//! their payloads to a single writer task.
//!
//! Every connection gets its own handler task, but all handlers share one
//! [`SequenceTracker`]. A handler holds the tracker lock from `admit` until
//! the payload is in the delivery queue, so queue order is stream order no
//! matter how many connections are open. The ack is written only after
//! that, which means a failed ack write can never lose data: the sender
//! resends, the frame comes back as a Duplicate, and gets acked again.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};

use retransmit_core::{Admission, Frame, SequenceTracker};

use crate::backoff::{Backoff, Clock, FixedBackoff, TokioClock};
use crate::error::{LinkError, ReceiveError};
use crate::link::{Acceptor, Link};

/// Default number of payload chunks buffered ahead of the writer.
pub const DELIVERY_DEPTH: usize = 16;

/// Reconnects extend lingering, but never past this many linger windows.
const MAX_LINGER_WINDOWS: u32 = 4;

/// What a completed run delivered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// Frames accepted, terminal frame included.
    pub frames: u64,
    /// Payload bytes written to the sink.
    pub bytes: u64,
}

enum Delivery {
    Chunk(Bytes),
    End,
}

type HandlerExit = (String, Result<(), LinkError>);

pub struct ReceiverEngine {
    timeout: Duration,
    linger: Option<Duration>,
    delivery_depth: usize,
    backoff: Arc<dyn Backoff>,
    clock: Arc<dyn Clock>,
}

impl ReceiverEngine {
    /// `timeout` bounds every frame read and ack write.
    ///
    /// Unless set explicitly, linger is three timeouts plus one backoff
    /// pause: a sender that lost the final ack needs one timeout to give up
    /// on it, a pause, up to one timeout to redial, and then a round trip.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            linger: None,
            delivery_depth: DELIVERY_DEPTH,
            backoff: Arc::new(FixedBackoff::default()),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn delivery_depth(mut self, depth: usize) -> Self {
        self.delivery_depth = depth.max(1);
        self
    }

    /// How long to keep serving reconnects after the stream is complete.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
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

    /// Serve `acceptor` until one full stream has been written to `sink`.
    ///
    /// Returns after the terminal frame is delivered, the sink flushed and
    /// the linger window has passed without a new connection. Only a sink
    /// failure ends the run early.
    pub async fn run<A, W>(self, mut acceptor: A, sink: W) -> Result<ReceiveSummary, ReceiveError>
    where
        A: Acceptor,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (delivery_tx, delivery_rx) = mpsc::channel(self.delivery_depth);
        let tracker = Arc::new(Mutex::new(SequenceTracker::new()));
        let mut writer = tokio::spawn(drain(delivery_rx, sink));
        let mut handlers: JoinSet<HandlerExit> = JoinSet::new();
        let mut failures: u32 = 0;

        let summary = loop {
            tokio::select! {
                done = &mut writer => break done??,
                accepted = acceptor.accept() => match accepted {
                    Ok((conn, peer)) => {
                        failures = 0;
                        self.spawn_handler(&mut handlers, conn, peer, &tracker, &delivery_tx);
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(error = %e, attempt = failures, "accept failed");
                        self.clock.sleep(self.backoff.delay(failures)).await;
                    }
                },
                Some(joined) = handlers.join_next() => log_exit(joined),
            }
        };

        tracing::info!(
            frames = summary.frames,
            bytes = summary.bytes,
            "stream complete"
        );

        self.linger_on(&mut acceptor, &mut handlers, &tracker, &delivery_tx)
            .await;

        // Handlers still open are bounded by `timeout` on their next read.
        let settle = async {
            while let Some(joined) = handlers.join_next().await {
                log_exit(joined);
            }
        };
        if tokio::time::timeout(self.timeout, settle).await.is_err() {
            tracing::debug!(open = handlers.len(), "dropping idle connections");
        }
        handlers.shutdown().await;

        Ok(summary)
    }

    /// Keep accepting until `linger` passes with no new connection, so a
    /// sender that missed the final ack can come back for it.
    async fn linger_on<A: Acceptor>(
        &self,
        acceptor: &mut A,
        handlers: &mut JoinSet<HandlerExit>,
        tracker: &Arc<Mutex<SequenceTracker>>,
        delivery: &mpsc::Sender<Delivery>,
    ) {
        let linger = self
            .linger
            .unwrap_or_else(|| self.timeout * 3 + self.backoff.delay(1));
        if linger.is_zero() {
            return;
        }
        tracing::debug!(?linger, "lingering for late reconnects");

        let cap = tokio::time::Instant::now() + linger * MAX_LINGER_WINDOWS;
        let deadline = tokio::time::sleep(linger);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return,
                accepted = acceptor.accept() => match accepted {
                    Ok((conn, peer)) => {
                        self.spawn_handler(handlers, conn, peer, tracker, delivery);
                        deadline
                            .as_mut()
                            .reset((tokio::time::Instant::now() + linger).min(cap));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        self.clock.sleep(self.backoff.delay(1)).await;
                    }
                },
                Some(joined) = handlers.join_next() => log_exit(joined),
            }
        }
    }

    fn spawn_handler<C>(
        &self,
        handlers: &mut JoinSet<HandlerExit>,
        conn: C,
        peer: String,
        tracker: &Arc<Mutex<SequenceTracker>>,
        delivery: &mpsc::Sender<Delivery>,
    ) where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(%peer, "connection accepted");
        let link = Link::new(conn, self.timeout, peer.clone());
        let tracker = Arc::clone(tracker);
        let delivery = delivery.clone();
        handlers.spawn(async move { (peer, handle(link, tracker, delivery).await) });
    }
}

/// Serve one connection until it ends, errs, or completes the stream.
async fn handle<C>(
    mut link: Link<C>,
    tracker: Arc<Mutex<SequenceTracker>>,
    delivery: mpsc::Sender<Delivery>,
) -> Result<(), LinkError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let frame = link.read_frame().await?;

        let admission = {
            let mut tracker = tracker.lock().await;
            let admission = tracker.admit(frame.sequence);
            if admission == Admission::Accept {
                let item = if frame.is_terminal() {
                    Delivery::End
                } else {
                    Delivery::Chunk(frame.payload.clone())
                };
                delivery
                    .send(item)
                    .await
                    .map_err(|_| LinkError::DeliveryClosed)?;
            }
            admission
        };

        match admission {
            Admission::Accept => {
                tracing::debug!(peer = link.peer(), sequence = frame.sequence, len = frame.len(), "accepted frame");
            }
            Admission::Duplicate => {
                tracing::debug!(peer = link.peer(), sequence = frame.sequence, "duplicate frame, acking again");
            }
            Admission::Gap { expected } => {
                return Err(LinkError::Gap {
                    expected,
                    got: frame.sequence,
                });
            }
        }

        link.write_frame(&Frame::ack(frame.sequence)).await?;

        if frame.is_terminal() {
            link.shutdown().await;
            return Ok(());
        }
    }
}

/// Write delivered chunks to `sink` in queue order until the end marker.
async fn drain<W>(
    mut queue: mpsc::Receiver<Delivery>,
    mut sink: W,
) -> Result<ReceiveSummary, ReceiveError>
where
    W: AsyncWrite + Unpin,
{
    let mut summary = ReceiveSummary::default();

    while let Some(item) = queue.recv().await {
        summary.frames += 1;
        match item {
            Delivery::Chunk(bytes) => {
                sink.write_all(&bytes).await.map_err(ReceiveError::Sink)?;
                summary.bytes += bytes.len() as u64;
            }
            Delivery::End => {
                sink.flush().await.map_err(ReceiveError::Sink)?;
                return Ok(summary);
            }
        }
    }

    Err(ReceiveError::DeliveryClosed)
}

fn log_exit(joined: Result<HandlerExit, JoinError>) {
    match joined {
        Ok((peer, Ok(()))) => tracing::info!(%peer, "connection finished"),
        Ok((peer, Err(LinkError::Io(e)))) if e.kind() == io::ErrorKind::UnexpectedEof => {
            tracing::info!(%peer, "peer closed connection");
        }
        Ok((peer, Err(e))) => tracing::warn!(%peer, error = %e, "connection dropped"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::warn!(error = %e, "connection handler panicked"),
    }
}

//! Error taxonomy.
//!
//! [`LinkError`] is scoped to one connection: the sender reconnects, the
//! receiver drops that connection. It never escapes a run. [`SendError`]
//! and [`ReceiveError`] end the run and are returned to the caller.

use std::time::Duration;

use retransmit_core::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("no progress within {0:?}")]
    Timeout(Duration),

    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),

    #[error("unexpected ack: expected={expected}, got={got}")]
    AckMismatch { expected: u64, got: u64 },

    #[error("gap in sequence numbers: expected={expected}, got={got}")]
    Gap { expected: u64, got: u64 },

    #[error("delivery queue closed")]
    DeliveryClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("frame size must be in 1..={max}, got {got}")]
    InvalidFrameSize { got: usize, max: usize },

    #[error("reading input: {0}")]
    Source(std::io::Error),

    #[error("input producer stopped before the terminal frame")]
    SourceClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("writing output: {0}")]
    Sink(std::io::Error),

    #[error("delivery queue closed before the terminal frame")]
    DeliveryClosed,

    #[error("delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

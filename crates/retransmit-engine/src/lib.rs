//! retransmit-engine: the stop-and-wait sender and receiver.
//!
//! ```text
//!  input ──▶ producer ──▶ [queue] ──▶ connection loop ══ TCP ══▶ handler(s)
//!                                        ▲   │ frame              │
//!                                        │   ▼                    ▼
//!                                        └── ack ◀──── SequenceTracker
//!                                                             │
//!                                          output ◀── delivery task
//! ```
//!
//! - [`sender`]: chunking, bounded read-ahead, dial/send/await-ack loop
//! - [`receiver`]: accept loop, per-connection handlers, ordered delivery
//! - [`link`]: transport seams and deadline-bounded frame I/O
//! - [`backoff`]: retry delay policy and sleep source
//! - `memory`: in-process transport with scripted faults, behind the
//!   `testing` feature

pub mod backoff;
pub mod error;
pub mod link;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod receiver;
pub mod sender;

pub use backoff::{Backoff, Clock, FixedBackoff, TokioClock};
pub use error::{LinkError, ReceiveError, SendError};
pub use link::{Acceptor, Dialer, Link, TcpDialer};
pub use receiver::{ReceiveSummary, ReceiverEngine};
pub use sender::{SendSummary, SenderEngine};

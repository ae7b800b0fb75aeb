//! retransmit-core: wire format, receiver sequencing, and configuration.
//! Nothing in this crate touches a socket; the engine crate does the I/O.

pub mod config;
pub mod sequence;
pub mod wire;

pub use sequence::{Admission, SequenceTracker};
pub use wire::{Frame, FrameError, FrameHeader, HEADER_LEN, MAGIC, MAX_PAYLOAD};

//! Receiver-side sequencing. Decides whether an inbound frame is new,
//! a retransmission, or out of order.
//!
//! The tracker is a plain value. The receiver keeps exactly one behind a
//! lock and holds that lock for the whole admit-and-deliver step.

/// Outcome of [`SequenceTracker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Next in order. `expected` has already advanced past it.
    Accept,
    /// Already delivered. Acknowledge again, deliver nothing.
    Duplicate,
    /// Ahead of what we have. Protocol violation; drop the connection.
    Gap { expected: u64 },
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next frame that may be accepted.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Classify `sequence` and advance on an exact match.
    pub fn admit(&mut self, sequence: u64) -> Admission {
        if sequence == self.expected {
            self.expected += 1;
            Admission::Accept
        } else if sequence < self.expected {
            Admission::Duplicate
        } else {
            Admission::Gap {
                expected: self.expected,
            }
        }
    }
}

//! retransmit wire format: the frame that carries every byte and every ack.
//!
//! A frame is a fixed 56-byte header followed by `length` payload bytes.
//! All integers are big-endian. The checksum is BLAKE3 over the header
//! (with the checksum field zeroed) followed by the payload, so a single
//! flipped bit anywhere in a frame is caught before the payload is used.
//!
//! ```text
//!  0        8        16       24                       56
//!  +--------+--------+--------+------------------------+-----------
//!  | magic  | length |  seq   |   checksum (32 bytes)  | payload...
//!  +--------+--------+--------+------------------------+-----------
//! ```
//!
//! Acks reuse the layout: an empty payload and the sequence being confirmed.
//! A data frame with an empty payload is the terminal frame of a stream.
//!
//! The header is a zerocopy struct, so encoding and parsing never go
//! through unsafe code.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol identifier. Any other value in the first eight bytes is foreign.
///
/// Distinct from the magic of the SHA-256 framing with the same layout,
/// so a peer speaking that variant fails on the first eight bytes instead
/// of on every checksum.
pub const MAGIC: u64 = 0x7274_786d_b3a1_0001;

/// Size of [`FrameHeader`] on the wire.
pub const HEADER_LEN: usize = 56;

/// Largest payload a peer will accept.
/// Checked before the payload is allocated, so a corrupted length field
/// cannot make the receiver reserve gigabytes.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed-size frame header, exactly as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Always [`MAGIC`].
    pub magic: U64<BigEndian>,
    /// Payload length in bytes.
    pub length: U64<BigEndian>,
    /// Sequence number of the frame, or of the frame being acknowledged.
    pub sequence: U64<BigEndian>,
    /// BLAKE3 digest of header (this field zeroed) followed by payload.
    pub checksum: [u8; 32],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; HEADER_LEN]);

impl FrameHeader {
    /// Parse and sanity-check a header.
    ///
    /// Rejects a foreign magic and a length above [`MAX_PAYLOAD`]. The
    /// checksum can only be verified once the payload has been read, see
    /// [`Frame::from_parts`].
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let header = FrameHeader::read_from(&bytes[..]).ok_or(FrameError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        })?;

        header.check_magic()?;

        let length = header.length.get();
        if length > MAX_PAYLOAD as u64 {
            return Err(FrameError::PayloadTooLarge(length));
        }

        Ok(header)
    }

    fn check_magic(&self) -> Result<(), FrameError> {
        match self.magic.get() {
            MAGIC => Ok(()),
            found => Err(FrameError::MagicMismatch { found }),
        }
    }

    pub fn payload_len(&self) -> usize {
        // parse() bounds the length by MAX_PAYLOAD, which fits any usize.
        self.length.get() as usize
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.get()
    }
}

fn checksum(header: &FrameHeader, payload: &[u8]) -> [u8; 32] {
    let mut unsigned = header.clone();
    unsigned.checksum = [0u8; 32];

    let mut hasher = blake3::Hasher::new();
    hasher.update(unsigned.as_bytes());
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One unit of transfer and of acknowledgment.
///
/// Magic, length and checksum are derived on encode and verified on decode;
/// they are never stored separately, so a `Frame` cannot disagree with
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn data(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// End-of-stream marker. Sequenced and acknowledged like any other frame.
    pub fn terminal(sequence: u64) -> Self {
        Self {
            sequence,
            payload: Bytes::new(),
        }
    }

    /// Acknowledgment of `sequence`. Echoes the sequence; never allocates one.
    pub fn ack(sequence: u64) -> Self {
        Self::terminal(sequence)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// A data frame without payload marks the end of the stream.
    pub fn is_terminal(&self) -> bool {
        self.payload.is_empty()
    }

    /// Build the header for this frame, checksum included.
    pub fn header(&self) -> FrameHeader {
        let mut header = FrameHeader {
            magic: U64::new(MAGIC),
            length: U64::new(self.payload.len() as u64),
            sequence: U64::new(self.sequence),
            checksum: [0u8; 32],
        };
        header.checksum = checksum(&header, &self.payload);
        header
    }

    /// Serialize header and payload into one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let header = self.header();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Assemble a frame from a header and the payload read after it.
    ///
    /// The checksum is verified first, so a corrupted length field reports
    /// as a checksum mismatch like any other flipped bit.
    pub fn from_parts(header: &FrameHeader, payload: Bytes) -> Result<Self, FrameError> {
        if checksum(header, &payload) != header.checksum {
            return Err(FrameError::ChecksumMismatch {
                sequence: header.sequence(),
            });
        }

        let declared = header.length.get();
        if declared != payload.len() as u64 {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }
        if declared > MAX_PAYLOAD as u64 {
            return Err(FrameError::PayloadTooLarge(declared));
        }

        Ok(Self {
            sequence: header.sequence(),
            payload,
        })
    }

    /// Decode a buffer that holds exactly one encoded frame.
    ///
    /// Unlike [`FrameHeader::parse`], the length field is only trusted
    /// once the checksum has matched: the whole frame is already in memory.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::read_from_prefix(buf).ok_or(FrameError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        })?;

        header.check_magic()?;
        Frame::from_parts(&header, Bytes::copy_from_slice(&buf[HEADER_LEN..]))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
///
/// Every variant means the bytes came from a corrupted link or a foreign
/// peer. None of them is recoverable on the same connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid magic number: 0x{found:016x}")]
    MagicMismatch { found: u64 },

    #[error("checksum mismatch on frame {sequence}")]
    ChecksumMismatch { sequence: u64 },

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(u64),

    #[error("header declares {declared} payload bytes, found {actual}")]
    LengthMismatch { declared: u64, actual: usize },

    #[error("need {needed} bytes for a header, have {available}")]
    Truncated { needed: usize, available: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHECKSUM_OFFSET: usize = 24;
    /// Magic of the SHA-256 framing with the same header layout.
    const SHA256_MAGIC: u64 = 0xaabb_8b21_6c51_20f4;

    #[test]
    fn data_frame_round_trip() {
        let frame = Frame::data(17, vec![17u8, 23, 42]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert!(!decoded.is_terminal());
    }

    #[test]
    fn terminal_frame_round_trip() {
        let frame = Frame::terminal(0);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN);

        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence, 0);
        assert!(decoded.is_terminal());
    }

    #[test]
    fn ack_echoes_sequence_with_empty_payload() {
        let ack = Frame::ack(9_000_000_001);
        assert_eq!(ack.sequence, 9_000_000_001);
        assert!(ack.payload.is_empty());
        assert_eq!(ack.encode(), Frame::terminal(9_000_000_001).encode());
    }

    #[test]
    fn header_fields_are_big_endian_on_wire() {
        let bytes = Frame::data(0x0102_0304_0506_0708, &b"abc"[..]).encode();
        assert_eq!(&bytes[0..8], &MAGIC.to_be_bytes());
        assert_eq!(&bytes[8..16], &3u64.to_be_bytes());
        assert_eq!(&bytes[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[HEADER_LEN..], b"abc");
    }

    #[test]
    fn checksum_covers_header_with_zeroed_checksum_field() {
        let frame = Frame::data(5, &b"payload"[..]);
        let bytes = frame.encode();

        let mut zeroed = bytes.to_vec();
        zeroed[CHECKSUM_OFFSET..HEADER_LEN].fill(0);
        let expected = blake3::hash(&zeroed);

        assert_eq!(&bytes[CHECKSUM_OFFSET..HEADER_LEN], expected.as_bytes());
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let bytes = Frame::data(3, &b"retransmit"[..]).encode();

        for bit in 0..bytes.len() * 8 {
            let mut corrupted = bytes.to_vec();
            corrupted[bit / 8] ^= 1 << (bit % 8);

            let err = Frame::decode(&corrupted).unwrap_err();
            let byte = bit / 8;
            match byte {
                0..=7 => assert!(
                    matches!(err, FrameError::MagicMismatch { .. }),
                    "bit {bit}: {err}"
                ),
                _ => assert!(
                    matches!(err, FrameError::ChecksumMismatch { .. }),
                    "bit {bit}: {err}"
                ),
            }
        }
    }

    #[test]
    fn foreign_magic_is_rejected_before_payload() {
        let mut bytes = Frame::data(1, &b"x"[..]).encode().to_vec();
        bytes[0..8].copy_from_slice(&0xdead_beef_u64.to_be_bytes());
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::MagicMismatch { found: 0xdead_beef })
        );
    }

    #[test]
    fn sha256_framing_is_refused_on_magic() {
        let mut bytes = Frame::data(1, &b"x"[..]).encode().to_vec();
        bytes[0..8].copy_from_slice(&SHA256_MAGIC.to_be_bytes());
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::MagicMismatch { found: SHA256_MAGIC })
        );
    }

    #[test]
    fn length_is_checked_after_checksum() {
        let payload = &b"four"[..];
        let mut header = Frame::data(6, payload).header();
        header.length = U64::new(5);
        header.checksum = checksum(&header, payload);

        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(payload);
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::LengthMismatch {
                declared: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn oversized_length_is_rejected_by_header_parse() {
        let mut head = [0u8; HEADER_LEN];
        head.copy_from_slice(&Frame::terminal(0).encode());
        head[8..16].copy_from_slice(&(MAX_PAYLOAD as u64 + 1).to_be_bytes());

        assert_eq!(
            FrameHeader::parse(&head),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD as u64 + 1))
        );
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let bytes = Frame::data(2, &b"four"[..]).encode();

        assert!(matches!(
            Frame::decode(&bytes[..HEADER_LEN - 1]),
            Err(FrameError::Truncated { .. })
        ));
        assert_eq!(
            Frame::decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::ChecksumMismatch { sequence: 2 })
        );
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            sequence in any::<u64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let frame = Frame::data(sequence, payload);
            prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }
    }
}

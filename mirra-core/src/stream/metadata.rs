//! Frame metadata and chunk reassembly.
//!
//! Each frame goes out as one metadata datagram followed immediately by
//! its chunk datagrams. Chunks carry no header of their own, so the
//! receiver concatenates them in arrival order and relies on the declared
//! size and CRC-32 to reject anything that went wrong on the way.
//!
//! ## Wire format
//!
//! **Metadata datagram** (14 bytes, big-endian):
//! ```text
//! sequence:     u32  (4)
//! total_size:   u32  (4)
//! checksum:     u32  (4)   CRC-32 of the whole frame
//! chunk_count:  u16  (2)
//! ```
//!
//! **Chunk datagram**: raw frame bytes, at most the current packet size.

use bytes::{Bytes, BytesMut};

use crate::error::MirraError;

/// CRC-32 (IEEE) over a frame's bytes.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Number of chunks a frame of `len` bytes occupies at `chunk_size`.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

// ── FrameMetadata ────────────────────────────────────────────────

/// Per-frame record sent ahead of the frame's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u32,
    pub total_size: u32,
    pub checksum: u32,
    pub chunk_count: u16,
}

impl FrameMetadata {
    /// Encoded size on the wire.
    pub const SIZE: usize = 14;

    /// Describe `frame` as it will be split at `chunk_size`.
    pub fn describe(sequence: u32, frame: &[u8], chunk_size: usize) -> Result<Self, MirraError> {
        let chunks = chunk_count(frame.len(), chunk_size);
        let max = u16::MAX as usize * chunk_size;
        if chunks > u16::MAX as usize || frame.len() > u32::MAX as usize {
            return Err(MirraError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }
        Ok(Self {
            sequence,
            total_size: frame.len() as u32,
            checksum: checksum(frame),
            chunk_count: chunks as u16,
        })
    }

    /// Serialize to bytes (big-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.total_size.to_be_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_be_bytes());
        buf[12..14].copy_from_slice(&self.chunk_count.to_be_bytes());
        buf
    }

    /// Deserialize from bytes. Trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, MirraError> {
        let Some(head) = data.first_chunk::<{ FrameMetadata::SIZE }>() else {
            return Err(MirraError::MetadataTooShort {
                len: data.len(),
                need: Self::SIZE,
            });
        };
        Ok(Self {
            sequence: u32::from_be_bytes([head[0], head[1], head[2], head[3]]),
            total_size: u32::from_be_bytes([head[4], head[5], head[6], head[7]]),
            checksum: u32::from_be_bytes([head[8], head[9], head[10], head[11]]),
            chunk_count: u16::from_be_bytes([head[12], head[13]]),
        })
    }
}

// ── Reassembly ───────────────────────────────────────────────────

/// Collects the chunks of one frame and validates the result.
///
/// Nothing is delivered unless the chunk count, the total length and the
/// CRC-32 all match the metadata.
#[derive(Debug)]
pub struct Reassembly {
    metadata: FrameMetadata,
    buf: BytesMut,
    collected: u16,
}

impl Reassembly {
    pub fn new(metadata: FrameMetadata) -> Self {
        Self {
            metadata,
            buf: BytesMut::with_capacity(metadata.total_size as usize),
            collected: 0,
        }
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    /// Append the next chunk in arrival order.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        self.collected = self.collected.saturating_add(1);
    }

    /// Chunks collected so far.
    pub fn collected(&self) -> u16 {
        self.collected
    }

    /// Whether every declared chunk has arrived.
    pub fn is_complete(&self) -> bool {
        self.collected >= self.metadata.chunk_count
    }

    /// Validate and hand out the frame bytes.
    pub fn finish(self) -> Result<Bytes, MirraError> {
        let meta = self.metadata;
        if self.collected != meta.chunk_count {
            return Err(MirraError::IncompleteFrame {
                expected: meta.chunk_count,
                received: self.collected,
            });
        }
        if self.buf.len() != meta.total_size as usize {
            return Err(MirraError::SizeMismatch {
                expected: meta.total_size,
                actual: self.buf.len(),
            });
        }
        let actual = checksum(&self.buf);
        if actual != meta.checksum {
            return Err(MirraError::ChecksumMismatch {
                expected: meta.checksum,
                actual,
            });
        }
        Ok(self.buf.freeze())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn reassemble<'a>(meta: FrameMetadata, chunks: impl Iterator<Item = &'a [u8]>) -> Reassembly {
        let mut r = Reassembly::new(meta);
        for c in chunks {
            r.push(c);
        }
        r
    }

    #[test]
    fn metadata_wire_layout_is_big_endian() {
        let meta = FrameMetadata {
            sequence: 1,
            total_size: 0x0102_0304,
            checksum: 0xAABB_CCDD,
            chunk_count: 0x0506,
        };
        assert_eq!(
            meta.encode(),
            [0, 0, 0, 1, 1, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD, 5, 6]
        );
        assert_eq!(FrameMetadata::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn metadata_too_short() {
        let err = FrameMetadata::decode(&[0u8; 13]).unwrap_err();
        assert!(matches!(err, MirraError::MetadataTooShort { len: 13, .. }));
    }

    #[test]
    fn describe_counts_chunks() {
        let frame = sample_frame(5000);
        let meta = FrameMetadata::describe(3, &frame, 1400).unwrap();
        assert_eq!(meta.chunk_count, 4);
        assert_eq!(meta.total_size, 5000);
        assert_eq!(meta.checksum, checksum(&frame));

        let exact = FrameMetadata::describe(0, &sample_frame(2800), 1400).unwrap();
        assert_eq!(exact.chunk_count, 2);
    }

    #[test]
    fn describe_rejects_too_many_chunks() {
        let frame = vec![0u8; u16::MAX as usize * 2 + 1];
        assert!(matches!(
            FrameMetadata::describe(0, &frame, 2),
            Err(MirraError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn in_order_reassembly_matches_input() {
        for (len, size) in [(1, 508), (1399, 1400), (1400, 1400), (10_000, 508), (65_000, 1400)] {
            let frame = sample_frame(len);
            let meta = FrameMetadata::describe(0, &frame, size).unwrap();
            let out = reassemble(meta, frame.chunks(size)).finish().unwrap();
            assert_eq!(&out[..], &frame[..]);
            assert_eq!(checksum(&out), checksum(&frame));
        }
    }

    #[test]
    fn any_flipped_bit_is_rejected() {
        let frame = sample_frame(3000);
        let meta = FrameMetadata::describe(0, &frame, 1000).unwrap();
        for byte in [0usize, 999, 1000, 1500, 2999] {
            for bit in [0u8, 3, 7] {
                let mut corrupt = frame.clone();
                corrupt[byte] ^= 1 << bit;
                let err = reassemble(meta, corrupt.chunks(1000)).finish().unwrap_err();
                assert!(matches!(err, MirraError::ChecksumMismatch { .. }));
            }
        }
    }

    #[test]
    fn missing_chunk_is_rejected() {
        let frame = sample_frame(3000);
        let meta = FrameMetadata::describe(0, &frame, 1000).unwrap();
        let r = reassemble(meta, frame.chunks(1000).take(2));
        assert!(!r.is_complete());
        assert!(matches!(
            r.finish(),
            Err(MirraError::IncompleteFrame {
                expected: 3,
                received: 2
            })
        ));
    }

    #[test]
    fn stray_datagram_in_place_of_chunk_is_a_size_mismatch() {
        let frame = sample_frame(3000);
        let meta = FrameMetadata::describe(0, &frame, 1000).unwrap();
        let mut r = Reassembly::new(meta);
        r.push(&frame[..1000]);
        r.push(&frame[2000..]);
        // Next frame's metadata swallowed as the third chunk.
        r.push(&meta.encode());
        assert!(r.is_complete());
        assert!(matches!(r.finish(), Err(MirraError::SizeMismatch { .. })));
    }

    #[test]
    fn swapped_chunks_fail_checksum() {
        let frame = sample_frame(2000);
        let meta = FrameMetadata::describe(0, &frame, 1000).unwrap();
        let mut r = Reassembly::new(meta);
        r.push(&frame[1000..]);
        r.push(&frame[..1000]);
        assert!(matches!(r.finish(), Err(MirraError::ChecksumMismatch { .. })));
    }
}

//! Per-face frame reassembly.
//!
//! Stream faces deliver arbitrary slices of the byte stream. The framer
//! accumulates them and hands out one length-validated packet at a time,
//! resynchronizing on corrupted or foreign data.

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use rust_cefnd_common::tlv::{self, FixedHeader};
use rust_cefnd_common::types::PacketType;

/// One complete packet recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Bytes,
    /// Split point between the header and the message TLVs.
    pub header_len: usize,
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// A complete packet; its bytes were removed from the buffer.
    Message(Frame),
    /// More bytes are needed. The buffer was not touched.
    Incomplete,
    /// `n` bytes of garbage were dropped; call again.
    Discarded(usize),
}

/// Counters kept per framer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramerStats {
    pub messages: u64,
    pub discarded_bytes: u64,
    pub resets: u64,
}

/// Accumulation buffer for one face.
#[derive(Debug, Default)]
pub struct Framer {
    buf: BytesMut,
    stats: FramerStats,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Try to extract the next packet from the front of the buffer.
    pub fn extract_next(&mut self) -> Extract {
        if self.buf.is_empty() {
            return Extract::Incomplete;
        }

        if self.buf[0] != tlv::VERSION {
            let skip = self.resync_offset();
            return self.discard(skip);
        }

        let header = match FixedHeader::peek(&self.buf) {
            Some(header) => header,
            None => return Extract::Incomplete,
        };

        // An unknown type at a version-aligned start means the stream is
        // beyond repair: drop everything we hold.
        if header.packet_type > PacketType::MAX {
            let n = self.buf.len();
            debug!("Invalid packet type {}, resetting {} buffered bytes", header.packet_type, n);
            self.buf.clear();
            self.stats.resets += 1;
            self.stats.discarded_bytes += n as u64;
            return Extract::Discarded(n);
        }

        if !plausible_start(&self.buf) {
            return self.discard(1);
        }

        let packet_len = header.packet_len as usize;
        let header_len = header.header_len as usize;
        if self.buf.len() < packet_len {
            trace!("Waiting for {} more bytes", packet_len - self.buf.len());
            return Extract::Incomplete;
        }

        let bytes = self.buf.split_to(packet_len).freeze();
        self.stats.messages += 1;
        Extract::Message(Frame { bytes, header_len })
    }

    /// Extract every complete packet currently buffered.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.extract_next() {
                Extract::Message(frame) => frames.push(frame),
                Extract::Discarded(_) => continue,
                Extract::Incomplete => return frames,
            }
        }
    }

    fn discard(&mut self, n: usize) -> Extract {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
        self.stats.discarded_bytes += n as u64;
        Extract::Discarded(n)
    }

    /// Offset of the next byte that could start a packet, judged on the
    /// bytes present. Discards everything when no candidate exists.
    fn resync_offset(&self) -> usize {
        (1..self.buf.len())
            .find(|&i| plausible_start(&self.buf[i..]))
            .unwrap_or(self.buf.len())
    }
}

/// Whether `buf` could begin with a packet. Only the bytes already present
/// are inspected, so a truncated candidate passes as long as nothing seen
/// so far contradicts it.
fn plausible_start(buf: &[u8]) -> bool {
    if buf.first() != Some(&tlv::VERSION) {
        return false;
    }
    if buf.get(tlv::OFFSET_PACKET_TYPE).map_or(false, |&t| t > PacketType::MAX) {
        return false;
    }
    let header = match FixedHeader::peek(buf) {
        Some(header) => header,
        None => return true,
    };

    let header_len = header.header_len as usize;
    let packet_len = header.packet_len as usize;
    if header_len < tlv::FIXED_HEADER_LEN
        || packet_len < header_len + tlv::TLV_HEADER_LEN
        || packet_len > tlv::MAX_PACKET_LEN
    {
        return false;
    }

    if let Some(t) = buf.get(header_len..header_len + 2) {
        let message_type = u16::from_be_bytes([t[0], t[1]]);
        if !matches!(message_type, tlv::T_INTEREST | tlv::T_OBJECT | tlv::T_DISCOVERY) {
            return false;
        }
    }

    tlvs_consistent(buf, tlv::FIXED_HEADER_LEN, header_len)
        && tlvs_consistent(buf, header_len, packet_len)
}

/// Sum the TLV lengths of `buf[start..end]` as far as bytes are available.
/// A TLV overrunning `end`, or a tail too short to hold a TLV header, is a
/// mismatch.
fn tlvs_consistent(buf: &[u8], start: usize, end: usize) -> bool {
    let available = buf.len().min(end);
    let mut index = start;
    while index < end {
        if end - index < tlv::TLV_HEADER_LEN {
            return false;
        }
        if index + tlv::TLV_HEADER_LEN > available {
            return true;
        }
        let length = u16::from_be_bytes([buf[index + 2], buf[index + 3]]) as usize;
        index += tlv::TLV_HEADER_LEN + length;
        if index > end {
            return false;
        }
    }
    true
}

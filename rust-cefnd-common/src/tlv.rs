//! TLV (Type‑Length‑Value) encoding and decoding utilities.
//!
//! Every packet starts with an 8-byte fixed header followed by optional
//! hop-by-hop TLVs (inside the header) and the message TLVs. Types and
//! lengths are 2-byte big-endian fields.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/* ---------------------------------------------------------------- *
 * Fixed header
 * ---------------------------------------------------------------- */

/// Protocol version carried in byte 0 of every packet.
pub const VERSION: u8 = 0x01;

/// Size of the fixed header.
pub const FIXED_HEADER_LEN: usize = 8;

/// Size of a TLV type+length prefix.
pub const TLV_HEADER_LEN: usize = 4;

/// Largest packet the forwarder accepts.
pub const MAX_PACKET_LEN: usize = 65_535;

pub const OFFSET_VERSION: usize = 0;
pub const OFFSET_PACKET_TYPE: usize = 1;
pub const OFFSET_PACKET_LEN: usize = 2;
pub const OFFSET_HOP_LIMIT: usize = 4;
pub const OFFSET_RETURN_CODE: usize = 5;
pub const OFFSET_FLAGS: usize = 6;
pub const OFFSET_HEADER_LEN: usize = 7;

/* ---------------------------------------------------------------- *
 * TLV type constants
 * ---------------------------------------------------------------- */

// hop-by-hop headers
pub const T_INTLIFE: u16 = 0x0001;
pub const T_CACHETIME: u16 = 0x0002;
pub const T_SYMBOLIC: u16 = 0x1001;
pub const T_SELECTIVE: u16 = 0x1002;
pub const T_NONCE: u16 = 0x1003;

// top-level message types
pub const T_INTEREST: u16 = 0x0001;
pub const T_OBJECT: u16 = 0x0002;
pub const T_VALIDATION_ALG: u16 = 0x0003;
pub const T_VALIDATION_PAYLOAD: u16 = 0x0004;
pub const T_DISCOVERY: u16 = 0x0008;

// message body
pub const T_NAME: u16 = 0x0000;
pub const T_PAYLOAD: u16 = 0x0001;
pub const T_KEYIDRESTR: u16 = 0x0002;
pub const T_OBJHASHRESTR: u16 = 0x0003;
pub const T_PAYLDTYPE: u16 = 0x0005;
pub const T_EXPIRY: u16 = 0x0006;

// name segments
pub const T_NAMESEGMENT: u16 = 0x0001;
pub const T_CHUNK: u16 = 0x0010;

// validation algorithm body
pub const T_CRC32C: u16 = 0x0002;
pub const T_KEYID: u16 = 0x0009;

/* ---------------------------------------------------------------- *
 * Fixed header accessors
 * ---------------------------------------------------------------- */

/// The fields of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub version: u8,
    pub packet_type: u8,
    pub packet_len: u16,
    pub hop_limit: u8,
    pub return_code: u8,
    pub flags: u8,
    pub header_len: u8,
}

impl FixedHeader {
    /// Read the fixed header from the front of `buf` without consuming it.
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIXED_HEADER_LEN {
            return None;
        }
        Some(Self {
            version: buf[OFFSET_VERSION],
            packet_type: buf[OFFSET_PACKET_TYPE],
            packet_len: u16::from_be_bytes([buf[OFFSET_PACKET_LEN], buf[OFFSET_PACKET_LEN + 1]]),
            hop_limit: buf[OFFSET_HOP_LIMIT],
            return_code: buf[OFFSET_RETURN_CODE],
            flags: buf[OFFSET_FLAGS],
            header_len: buf[OFFSET_HEADER_LEN],
        })
    }

    /// Encode the fixed header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.packet_len);
        buf.put_u8(self.hop_limit);
        buf.put_u8(self.return_code);
        buf.put_u8(self.flags);
        buf.put_u8(self.header_len);
    }
}

/* ---------------------------------------------------------------- *
 * Encoding helpers
 * ---------------------------------------------------------------- */

/// Encode a TLV type+length prefix.
pub fn encode_tlv_header(tlv_type: u16, length: usize, buf: &mut BytesMut) {
    buf.put_u16(tlv_type);
    buf.put_u16(length as u16);
}

/// Encode a whole TLV.
pub fn encode_tlv(tlv_type: u16, value: &[u8], buf: &mut BytesMut) {
    encode_tlv_header(tlv_type, value.len(), buf);
    buf.extend_from_slice(value);
}

/// Encode an unsigned integer with the fewest big-endian bytes (at least one).
pub fn encode_uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    bytes[skip..].to_vec()
}

/* ---------------------------------------------------------------- *
 * Decoding helpers
 * ---------------------------------------------------------------- */

/// Decode a big-endian unsigned integer of 1 to 8 bytes.
pub fn decode_uint(value: &[u8]) -> Result<u64, Error> {
    if value.is_empty() || value.len() > 8 {
        return Err(Error::Tlv(format!(
            "Integer field of {} bytes is out of range",
            value.len()
        )));
    }
    Ok(value.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Check that the TLVs in `buf` tile it exactly: every declared length fits
/// and the running sum lands on the end of the region.
pub fn tlvs_tile(buf: &[u8]) -> bool {
    let mut index = 0;
    while index < buf.len() {
        if buf.len() - index < TLV_HEADER_LEN {
            return false;
        }
        let length = u16::from_be_bytes([buf[index + 2], buf[index + 3]]) as usize;
        index += TLV_HEADER_LEN + length;
    }
    index == buf.len()
}

/* ---------------------------------------------------------------- *
 * TLV element wrapper
 * ---------------------------------------------------------------- */

/// A generic TLV element consisting of *type*, *length* and *value*.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement {
    pub tlv_type: u16,
    pub value: Bytes,
}

impl TlvElement {
    /// Create a new wrapper from raw parts.
    pub fn new(tlv_type: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }

    /// Total number of bytes when this element is encoded.
    pub fn len(&self) -> usize {
        TLV_HEADER_LEN + self.value.len()
    }

    /// Encode this element into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_tlv(self.tlv_type, &self.value, buf);
    }

    /// Decode a single element from `buf` **in‑place**.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < TLV_HEADER_LEN {
            return Err(Error::Tlv("Buffer too small for TLV header".into()));
        }

        let tlv_type = buf.get_u16();
        let length = buf.get_u16() as usize;

        if buf.remaining() < length {
            return Err(Error::Tlv(format!(
                "Buffer underflow: TLV value requires {} bytes but only {} available",
                length,
                buf.remaining()
            )));
        }

        // bytes 1.*: cheap zero‑copy slice
        let value = buf.copy_to_bytes(length);
        Ok(Self { tlv_type, value })
    }

    /// Decode every element of `value` in order.
    pub fn decode_all(value: &Bytes) -> Result<Vec<Self>, Error> {
        let mut buf = value.clone();
        let mut elements = Vec::new();
        while buf.has_remaining() {
            elements.push(Self::decode(&mut buf)?);
        }
        Ok(elements)
    }
}

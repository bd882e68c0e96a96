//! Message types and structures.
//!
//! This module provides the parsed view of a packet used by the forwarding
//! engine, and a builder used to produce packets locally (Interest Returns,
//! administrative answers, test traffic).

use crate::error::Error;
use crate::tlv::{self, FixedHeader, TlvElement};
use crate::types::{PacketType, ReturnCode, DEFAULT_HOP_LIMIT};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Maximum number of components in a name.
pub const MAX_NAME_COMPONENTS: usize = 64;

/// Length of key ids and object hashes.
pub const DIGEST_LEN: usize = 32;

/// Represents a name component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameComponent(pub Bytes);

impl NameComponent {
    /// Creates a new name component from a byte slice.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the component as bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print printable ASCII characters directly, otherwise use hex
        let printable = self.0.iter().all(|&b| b.is_ascii_graphic() && b != b'/');

        if printable {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x")?;
            for &b in self.0.iter() {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

/// A name: an ordered sequence of components. The chunk number is kept
/// outside the name (see [`Message::chunk`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    /// Creates a new empty name.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Creates a name from a string with '/' as component separator. A
    /// leading `ccnx:` scheme is accepted and ignored.
    pub fn from_string(s: &str) -> Self {
        let s = s.strip_prefix("ccnx:").unwrap_or(s);
        let components = s
            .split('/')
            .filter(|comp| !comp.is_empty())
            .map(|comp| NameComponent::new(comp.as_bytes().to_vec()))
            .collect();

        Self { components }
    }

    /// Adds a component to the name.
    pub fn push(&mut self, component: NameComponent) -> &mut Self {
        self.components.push(component);
        self
    }

    /// Returns the number of components in the name.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true if the name has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns an iterator over the name components.
    pub fn components(&self) -> impl Iterator<Item = &NameComponent> {
        self.components.iter()
    }

    /// Gets a component at the specified index.
    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    /// Returns a prefix of this name with the specified length.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            components: self.components.iter().take(len).cloned().collect(),
        }
    }

    /// Checks if this name is a prefix of another name.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.len() <= other.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Encodes the name (and optional chunk number) as a T_NAME element.
    pub fn to_tlv(&self, chunk: Option<u32>) -> TlvElement {
        let mut buf = BytesMut::new();
        for component in &self.components {
            tlv::encode_tlv(tlv::T_NAMESEGMENT, component.as_bytes(), &mut buf);
        }
        if let Some(chunk) = chunk {
            tlv::encode_tlv(tlv::T_CHUNK, &tlv::encode_uint(chunk as u64), &mut buf);
        }
        TlvElement::new(tlv::T_NAME, buf.freeze())
    }

    /// Decodes a T_NAME element into the name and its chunk number.
    pub fn from_tlv(element: &TlvElement) -> Result<(Self, Option<u32>), Error> {
        if element.tlv_type != tlv::T_NAME {
            return Err(Error::Message(format!(
                "Expected name TLV type {}, got {}",
                tlv::T_NAME,
                element.tlv_type
            )));
        }

        let mut components = Vec::new();
        let mut chunk = None;
        for segment in TlvElement::decode_all(&element.value)? {
            match segment.tlv_type {
                tlv::T_CHUNK => {
                    let value = tlv::decode_uint(&segment.value)?;
                    let value = u32::try_from(value)
                        .map_err(|_| Error::Message(format!("Chunk number {} too large", value)))?;
                    chunk = Some(value);
                }
                _ => components.push(NameComponent(segment.value)),
            }
        }

        if components.len() > MAX_NAME_COMPONENTS {
            return Err(Error::Message(format!(
                "Name has {} components (max {})",
                components.len(),
                MAX_NAME_COMPONENTS
            )));
        }

        Ok((Self { components }, chunk))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }

        for component in &self.components {
            write!(f, "/{}", component)?;
        }

        Ok(())
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of a message, taken from the fixed header packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Interest,
    ContentObject,
    InterestReturn,
    TraceRequest,
    TraceReply,
}

impl MessageKind {
    fn packet_type(self) -> PacketType {
        match self {
            MessageKind::Interest => PacketType::Interest,
            MessageKind::ContentObject => PacketType::ContentObject,
            MessageKind::InterestReturn => PacketType::InterestReturn,
            MessageKind::TraceRequest => PacketType::TraceRequest,
            MessageKind::TraceReply => PacketType::TraceReply,
        }
    }

    fn message_tlv(self) -> u16 {
        match self {
            MessageKind::Interest | MessageKind::InterestReturn => tlv::T_INTEREST,
            MessageKind::ContentObject => tlv::T_OBJECT,
            MessageKind::TraceRequest | MessageKind::TraceReply => tlv::T_DISCOVERY,
        }
    }
}

impl From<PacketType> for MessageKind {
    fn from(pt: PacketType) -> Self {
        match pt {
            PacketType::Interest => MessageKind::Interest,
            PacketType::ContentObject => MessageKind::ContentObject,
            PacketType::InterestReturn => MessageKind::InterestReturn,
            PacketType::TraceRequest => MessageKind::TraceRequest,
            PacketType::TraceReply => MessageKind::TraceReply,
        }
    }
}

/// Request subtype of an Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterestType {
    /// One exact name (+ chunk).
    Regular,
    /// A sliding window over the chunks of a name.
    Symbolic,
    /// An explicit run of chunks of a name.
    Selective,
}

/// Chunk run requested by a Selective Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectiveRange {
    pub first: u32,
    pub count: u16,
}

impl SelectiveRange {
    /// Iterate over the requested chunk numbers.
    pub fn chunks(&self) -> impl Iterator<Item = u32> {
        let first = self.first;
        (0..self.count as u32).filter_map(move |i| first.checked_add(i))
    }
}

/// A parsed packet.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub name: Name,
    pub chunk: Option<u32>,
    pub hop_limit: u8,
    pub lifetime: Option<Duration>,
    pub interest_type: InterestType,
    pub selective: Option<SelectiveRange>,
    pub nonce: Option<u64>,
    pub key_id_restriction: Option<[u8; DIGEST_LEN]>,
    pub object_hash_restriction: Option<[u8; DIGEST_LEN]>,
    /// Signer key id found in the validation block.
    pub key_id: Option<[u8; DIGEST_LEN]>,
    /// Whether a validation block is present.
    pub signed: bool,
    pub return_code: Option<ReturnCode>,
    pub payload: Option<Bytes>,
    pub cache_time: Option<Duration>,
    pub expiry: Option<u64>,
    pub header_len: usize,
    raw: Bytes,
}

impl Message {
    /// Parse a complete packet, as extracted by the framer.
    pub fn parse(raw: Bytes) -> Result<Self, Error> {
        let header = FixedHeader::peek(&raw)
            .ok_or_else(|| Error::Message("Packet shorter than the fixed header".into()))?;

        if header.version != tlv::VERSION {
            return Err(Error::Message(format!("Unsupported version {}", header.version)));
        }
        let packet_type = PacketType::from_u8(header.packet_type)
            .ok_or_else(|| Error::Message(format!("Unknown packet type {}", header.packet_type)))?;
        if header.packet_len as usize != raw.len() {
            return Err(Error::Message(format!(
                "Packet length {} does not match buffer length {}",
                header.packet_len,
                raw.len()
            )));
        }
        let header_len = header.header_len as usize;
        if header_len < tlv::FIXED_HEADER_LEN || header_len > raw.len() {
            return Err(Error::Message(format!("Invalid header length {}", header_len)));
        }

        let kind = MessageKind::from(packet_type);
        let mut msg = Message {
            kind,
            name: Name::new(),
            chunk: None,
            hop_limit: header.hop_limit,
            lifetime: None,
            interest_type: InterestType::Regular,
            selective: None,
            nonce: None,
            key_id_restriction: None,
            object_hash_restriction: None,
            key_id: None,
            signed: false,
            return_code: None,
            payload: None,
            cache_time: None,
            expiry: None,
            header_len,
            raw: raw.clone(),
        };

        if kind == MessageKind::InterestReturn {
            msg.return_code = ReturnCode::from_u8(header.return_code);
        }

        let hop_by_hop = raw.slice(tlv::FIXED_HEADER_LEN..header_len);
        for element in TlvElement::decode_all(&hop_by_hop)? {
            msg.apply_hop_by_hop(&element)?;
        }

        let body = raw.slice(header_len..);
        let mut elements = TlvElement::decode_all(&body)?.into_iter();
        let message = elements
            .next()
            .ok_or_else(|| Error::Message("Missing message TLV".into()))?;
        if message.tlv_type != kind.message_tlv() {
            return Err(Error::Message(format!(
                "Message TLV type {} does not match packet type {:?}",
                message.tlv_type, packet_type
            )));
        }

        let mut has_name = false;
        for field in TlvElement::decode_all(&message.value)? {
            match field.tlv_type {
                tlv::T_NAME => {
                    let (name, chunk) = Name::from_tlv(&field)?;
                    msg.name = name;
                    msg.chunk = chunk;
                    has_name = true;
                }
                tlv::T_PAYLOAD => msg.payload = Some(field.value),
                tlv::T_KEYIDRESTR => msg.key_id_restriction = Some(digest(&field.value)?),
                tlv::T_OBJHASHRESTR => msg.object_hash_restriction = Some(digest(&field.value)?),
                tlv::T_EXPIRY => msg.expiry = Some(tlv::decode_uint(&field.value)?),
                _ => {}
            }
        }
        if !has_name {
            return Err(Error::Message("Message carries no name".into()));
        }

        for element in elements {
            match element.tlv_type {
                tlv::T_VALIDATION_ALG => {
                    msg.signed = true;
                    msg.key_id = find_key_id(&element.value)?;
                }
                tlv::T_VALIDATION_PAYLOAD => {}
                other => {
                    return Err(Error::Message(format!("Unexpected top-level TLV {}", other)));
                }
            }
        }

        Ok(msg)
    }

    fn apply_hop_by_hop(&mut self, element: &TlvElement) -> Result<(), Error> {
        match element.tlv_type {
            tlv::T_INTLIFE => {
                self.lifetime = Some(Duration::from_millis(tlv::decode_uint(&element.value)?));
            }
            tlv::T_CACHETIME => {
                self.cache_time = Some(Duration::from_millis(tlv::decode_uint(&element.value)?));
            }
            tlv::T_SYMBOLIC => self.interest_type = InterestType::Symbolic,
            tlv::T_SELECTIVE => {
                let v = &element.value;
                if v.len() != 6 {
                    return Err(Error::Message(format!(
                        "Selective header must be 6 bytes, got {}",
                        v.len()
                    )));
                }
                self.interest_type = InterestType::Selective;
                self.selective = Some(SelectiveRange {
                    first: u32::from_be_bytes([v[0], v[1], v[2], v[3]]),
                    count: u16::from_be_bytes([v[4], v[5]]),
                });
            }
            tlv::T_NONCE => self.nonce = Some(tlv::decode_uint(&element.value)?),
            _ => {}
        }
        Ok(())
    }

    /// The complete packet as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The message region (everything after the header).
    pub fn body(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }

    /// SHA-256 of the message region; compared against object-hash
    /// restrictions.
    pub fn object_hash(&self) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.body());
        hasher.finalize().into()
    }

    /// Request fingerprint used to tell retransmissions apart: the nonce
    /// when the sender supplied one, otherwise a hash of the message body.
    pub fn fingerprint(&self) -> u64 {
        match self.nonce {
            Some(nonce) => nonce,
            None => fnv1a_64(self.body()),
        }
    }

    /// Copy of the packet with a different hop limit.
    pub fn with_hop_limit(&self, hop_limit: u8) -> Bytes {
        let mut buf = BytesMut::from(&self.raw[..]);
        buf[tlv::OFFSET_HOP_LIMIT] = hop_limit;
        buf.freeze()
    }

    /// Interest Return for this Interest: same packet, packet type and
    /// return code rewritten.
    pub fn to_interest_return(&self, code: ReturnCode) -> Bytes {
        let mut buf = BytesMut::from(&self.raw[..]);
        buf[tlv::OFFSET_PACKET_TYPE] = PacketType::InterestReturn as u8;
        buf[tlv::OFFSET_RETURN_CODE] = code as u8;
        buf.freeze()
    }
}

fn digest(value: &[u8]) -> Result<[u8; DIGEST_LEN], Error> {
    value
        .try_into()
        .map_err(|_| Error::Message(format!("Digest must be {} bytes, got {}", DIGEST_LEN, value.len())))
}

/// Look one level into the validation algorithm block for a KeyId.
fn find_key_id(value: &Bytes) -> Result<Option<[u8; DIGEST_LEN]>, Error> {
    for alg in TlvElement::decode_all(value)? {
        for field in TlvElement::decode_all(&alg.value)? {
            if field.tlv_type == tlv::T_KEYID {
                return Ok(Some(digest(&field.value)?));
            }
        }
    }
    Ok(None)
}

/// 64-bit FNV-1a hash.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/* ---------------------------------------------------------------- *
 * Builder
 * ---------------------------------------------------------------- */

/// Builds packets in wire format.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    kind: MessageKind,
    name: Name,
    chunk: Option<u32>,
    hop_limit: u8,
    return_code: Option<ReturnCode>,
    lifetime: Option<Duration>,
    cache_time: Option<Duration>,
    symbolic: bool,
    selective: Option<SelectiveRange>,
    nonce: Option<u64>,
    key_id_restriction: Option<[u8; DIGEST_LEN]>,
    object_hash_restriction: Option<[u8; DIGEST_LEN]>,
    key_id: Option<[u8; DIGEST_LEN]>,
    expiry: Option<u64>,
    payload: Option<Bytes>,
}

impl MessageBuilder {
    pub fn new(kind: MessageKind, name: Name) -> Self {
        Self {
            kind,
            name,
            chunk: None,
            hop_limit: DEFAULT_HOP_LIMIT,
            return_code: None,
            lifetime: None,
            cache_time: None,
            symbolic: false,
            selective: None,
            nonce: None,
            key_id_restriction: None,
            object_hash_restriction: None,
            key_id: None,
            expiry: None,
            payload: None,
        }
    }

    /// An Interest with the default 4 second lifetime.
    pub fn interest(name: Name) -> Self {
        Self::new(MessageKind::Interest, name).lifetime(Duration::from_millis(4000))
    }

    /// A ContentObject carrying `payload`.
    pub fn object(name: Name, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::ContentObject, name).payload(payload)
    }

    pub fn chunk(mut self, chunk: u32) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn return_code(mut self, code: ReturnCode) -> Self {
        self.return_code = Some(code);
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn symbolic(mut self) -> Self {
        self.symbolic = true;
        self.selective = None;
        self
    }

    pub fn selective(mut self, first: u32, count: u16) -> Self {
        self.selective = Some(SelectiveRange { first, count });
        self.symbolic = false;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn key_id_restriction(mut self, key_id: [u8; DIGEST_LEN]) -> Self {
        self.key_id_restriction = Some(key_id);
        self
    }

    pub fn object_hash_restriction(mut self, hash: [u8; DIGEST_LEN]) -> Self {
        self.object_hash_restriction = Some(hash);
        self
    }

    /// Attach a validation block naming the signer's key id.
    pub fn key_id(mut self, key_id: [u8; DIGEST_LEN]) -> Self {
        self.key_id = Some(key_id);
        self
    }

    pub fn expiry(mut self, expiry: u64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut hop_by_hop = BytesMut::new();
        if let Some(lifetime) = self.lifetime {
            tlv::encode_tlv(tlv::T_INTLIFE, &tlv::encode_uint(lifetime.as_millis() as u64), &mut hop_by_hop);
        }
        if let Some(cache_time) = self.cache_time {
            tlv::encode_tlv(tlv::T_CACHETIME, &tlv::encode_uint(cache_time.as_millis() as u64), &mut hop_by_hop);
        }
        if self.symbolic {
            tlv::encode_tlv(tlv::T_SYMBOLIC, &[], &mut hop_by_hop);
        }
        if let Some(range) = self.selective {
            let mut value = Vec::with_capacity(6);
            value.extend_from_slice(&range.first.to_be_bytes());
            value.extend_from_slice(&range.count.to_be_bytes());
            tlv::encode_tlv(tlv::T_SELECTIVE, &value, &mut hop_by_hop);
        }
        if let Some(nonce) = self.nonce {
            tlv::encode_tlv(tlv::T_NONCE, &nonce.to_be_bytes(), &mut hop_by_hop);
        }

        let header_len = tlv::FIXED_HEADER_LEN + hop_by_hop.len();
        if header_len > u8::MAX as usize {
            return Err(Error::Message(format!("Header of {} bytes does not fit", header_len)));
        }

        let mut body = BytesMut::new();
        self.name.to_tlv(self.chunk).encode(&mut body);
        if let Some(key_id) = self.key_id_restriction {
            tlv::encode_tlv(tlv::T_KEYIDRESTR, &key_id, &mut body);
        }
        if let Some(hash) = self.object_hash_restriction {
            tlv::encode_tlv(tlv::T_OBJHASHRESTR, &hash, &mut body);
        }
        if let Some(expiry) = self.expiry {
            tlv::encode_tlv(tlv::T_EXPIRY, &tlv::encode_uint(expiry), &mut body);
        }
        if let Some(payload) = &self.payload {
            tlv::encode_tlv(tlv::T_PAYLOAD, payload, &mut body);
        }

        let mut message = BytesMut::new();
        tlv::encode_tlv(self.kind.message_tlv(), &body, &mut message);
        if let Some(key_id) = self.key_id {
            let mut key = BytesMut::new();
            tlv::encode_tlv(tlv::T_KEYID, &key_id, &mut key);
            let mut alg = BytesMut::new();
            tlv::encode_tlv(tlv::T_CRC32C, &key, &mut alg);
            tlv::encode_tlv(tlv::T_VALIDATION_ALG, &alg, &mut message);
            tlv::encode_tlv(tlv::T_VALIDATION_PAYLOAD, &[0u8; 4], &mut message);
        }

        let packet_len = header_len + message.len();
        if packet_len > tlv::MAX_PACKET_LEN {
            return Err(Error::Message(format!("Packet of {} bytes is too large", packet_len)));
        }

        let return_code = match self.kind {
            MessageKind::InterestReturn => self.return_code.map(|c| c as u8).unwrap_or(0),
            _ => 0,
        };

        let mut buf = BytesMut::with_capacity(packet_len);
        FixedHeader {
            version: tlv::VERSION,
            packet_type: self.kind.packet_type() as u8,
            packet_len: packet_len as u16,
            hop_limit: self.hop_limit,
            return_code,
            flags: 0,
            header_len: header_len as u8,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&hop_by_hop);
        buf.extend_from_slice(&message);
        Ok(buf.freeze())
    }

    /// Encode and parse back, for callers that want the parsed view.
    pub fn build(&self) -> Result<Message, Error> {
        Message::parse(self.encode()?)
    }
}

#[cfg(test)]
mod tests;

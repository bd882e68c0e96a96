//! Common types shared by the forwarding engine and the operator tools.
//!
//! Faces are referenced everywhere by a small numeric id; the tables never
//! own the face itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default UDP/TCP port of the forwarder.
pub const DEFAULT_PORT: u16 = 9896;

/// Maximum number of entries in the FIB table.
pub const MAX_FIB_ENTRIES: usize = 1024;

/// Maximum number of entries in the PIT table.
pub const MAX_PIT_ENTRIES: usize = 2048;

/// Maximum number of entries in the content store.
pub const MAX_CS_ENTRIES: usize = 4096;

/// Hop limit stamped on Interests built locally.
pub const DEFAULT_HOP_LIMIT: u8 = 32;

/// Unique identifier for a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaceId(pub u16);

impl FaceId {
    /// Reserved id meaning "no face" (internally generated traffic).
    pub const NONE: FaceId = FaceId(0);

    /// Bucket of this face when work is sharded over `buckets` workers.
    pub fn bucket(self, buckets: usize) -> usize {
        if buckets == 0 {
            0
        } else {
            self.0 as usize % buckets
        }
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceId({})", self.0)
    }
}

impl From<u16> for FaceId {
    fn from(id: u16) -> Self {
        FaceId(id)
    }
}

/// Transport type of a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceType {
    /// UDP peer sharing the listening socket.
    Udp,
    /// TCP connection.
    Tcp,
    /// Local application over a Unix domain socket.
    Local,
}

impl FaceType {
    /// Local faces connect applications on this host; hop limits are not
    /// decremented for traffic entering through them.
    pub fn is_local(self) -> bool {
        matches!(self, FaceType::Local)
    }

    /// Parse the protocol column of the route file / control requests.
    pub fn from_protocol(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Some(FaceType::Udp),
            "tcp" => Some(FaceType::Tcp),
            "local" | "unix" => Some(FaceType::Local),
            _ => None,
        }
    }
}

impl fmt::Display for FaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaceType::Udp => "udp",
            FaceType::Tcp => "tcp",
            FaceType::Local => "local",
        };
        f.write_str(s)
    }
}

/// Packet type carried in the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Interest = 0x00,
    ContentObject = 0x01,
    InterestReturn = 0x02,
    TraceRequest = 0x03,
    TraceReply = 0x04,
}

impl PacketType {
    /// Highest valid packet type value.
    pub const MAX: u8 = 0x04;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(PacketType::Interest),
            0x01 => Some(PacketType::ContentObject),
            0x02 => Some(PacketType::InterestReturn),
            0x03 => Some(PacketType::TraceRequest),
            0x04 => Some(PacketType::TraceReply),
            _ => None,
        }
    }

    /// Whether packets of this type carry a meaningful hop limit.
    pub fn is_interest_like(self) -> bool {
        matches!(self, PacketType::Interest | PacketType::TraceRequest)
    }
}

/// Reason code of an Interest Return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReturnCode {
    NoRoute = 0x01,
    HopLimitExceeded = 0x02,
    NoResources = 0x03,
    PathError = 0x04,
    Prohibited = 0x05,
    Congested = 0x06,
    MtuTooLarge = 0x07,
    UnsupportedHashRestriction = 0x08,
    MalformedInterest = 0x09,
}

impl ReturnCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ReturnCode::NoRoute),
            0x02 => Some(ReturnCode::HopLimitExceeded),
            0x03 => Some(ReturnCode::NoResources),
            0x04 => Some(ReturnCode::PathError),
            0x05 => Some(ReturnCode::Prohibited),
            0x06 => Some(ReturnCode::Congested),
            0x07 => Some(ReturnCode::MtuTooLarge),
            0x08 => Some(ReturnCode::UnsupportedHashRestriction),
            0x09 => Some(ReturnCode::MalformedInterest),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_bucket() {
        assert_eq!(FaceId(7).bucket(4), 3);
        assert_eq!(FaceId(8).bucket(4), 0);
        assert_eq!(FaceId(5).bucket(0), 0);
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!(FaceType::from_protocol("UDP"), Some(FaceType::Udp));
        assert_eq!(FaceType::from_protocol("tcp"), Some(FaceType::Tcp));
        assert_eq!(FaceType::from_protocol("sctp"), None);
        assert!(FaceType::Local.is_local());
        assert!(!FaceType::Udp.is_local());
    }

    #[test]
    fn test_packet_type_range() {
        assert_eq!(PacketType::from_u8(PacketType::MAX), Some(PacketType::TraceReply));
        assert_eq!(PacketType::from_u8(PacketType::MAX + 1), None);
        assert!(PacketType::TraceRequest.is_interest_like());
        assert!(!PacketType::ContentObject.is_interest_like());
    }
}

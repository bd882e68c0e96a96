//! Common types and utilities for the cefnd named-data forwarder.
//!
//! This crate provides the pieces shared by the forwarding engine and the
//! operator tools: face identifiers, the TLV wire codec, the parsed message
//! model and the metrics primitives.

pub mod error;
pub mod message;
pub mod metrics;
pub mod tlv;
pub mod types;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

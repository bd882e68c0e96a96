//! Error types for the cefnd implementation.

use thiserror::Error;

/// All possible errors that can occur within the cefnd libraries.
#[derive(Error, Debug)]
pub enum Error {
    /// Error related to TLV encoding/decoding.
    #[error("TLV error: {0}")]
    Tlv(String),

    /// Error related to message parsing or construction.
    #[error("message error: {0}")]
    Message(String),

    /// Error reported by a face.
    #[error("face error: {0}")]
    Face(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error on the administrative control channel.
    #[error("control error: {0}")]
    Control(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

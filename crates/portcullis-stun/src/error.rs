//! Error types for the STUN codec.

use thiserror::Error;

/// Decoding errors for the legacy STUN dialect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StunError {
    /// Input shorter than the 20-byte message header
    #[error("message too short: {0} bytes")]
    TooShort(usize),

    /// Declared message length exceeds the available bytes
    #[error("message truncated: header declares {declared} attribute bytes, {available} available")]
    Truncated {
        /// Attribute byte count from the header
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },

    /// An attribute header or value runs past the end of the message
    #[error("attribute 0x{0:04x} truncated")]
    TruncatedAttribute(u16),

    /// An attribute value has an impossible length for its type
    #[error("attribute 0x{attr:04x} has invalid length {len}")]
    InvalidLength {
        /// Attribute type
        attr: u16,
        /// Declared value length
        len: usize,
    },
}

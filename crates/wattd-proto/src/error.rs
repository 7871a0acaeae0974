//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The frame did not start with the protocol magic.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic value.
        expected: u32,
        /// Value found on the wire.
        got: u32,
    },

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Locally supported version.
        expected: u8,
        /// Version found on the wire.
        got: u8,
    },

    /// The frame kind byte is not a known kind.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownKind(u8),

    /// The declared payload length exceeds the frame size bound.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: u32,
        /// Maximum accepted size.
        max_size: u32,
    },

    /// Fewer bytes than a complete header or payload requires.
    #[error("short frame: need {need} bytes, have {have}")]
    ShortFrame {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// Payload serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for ProtoError {
    fn from(e: bincode::Error) -> Self {
        ProtoError::Codec(e.to_string())
    }
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtoError>;

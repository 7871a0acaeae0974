//! Framing layer for the wattd remote-command protocol.
//!
//! Every message on the wire is one frame: a fixed 10-byte header
//! (magic, version, kind, payload length, big-endian) followed by the
//! payload bytes. Commands, acknowledgements and status blocks are all
//! carried as frame payloads; nothing is sent as a raw native struct.

use crate::error::{ProtoError, Result};

/// Frame header size in bytes (magic:4 + version:1 + kind:1 + payload_length:4).
pub const FRAME_HEADER_SIZE: usize = 10;

/// Protocol magic number for frame validation.
pub const MAGIC: u32 = 0x57415444; // "WATD"

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a frame payload. A status block for a very large
/// cluster stays well below this.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A serialized [`crate::Command`].
    Command = 1,
    /// An 8-byte acknowledgement code.
    Ack = 2,
    /// A status block: record count followed by the records.
    Status = 3,
}

impl FrameKind {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(FrameKind::Command),
            2 => Ok(FrameKind::Ack),
            3 => Ok(FrameKind::Status),
            other => Err(ProtoError::UnknownKind(other)),
        }
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic number.
    pub magic: u32,
    /// Protocol version.
    pub version: u8,
    /// Payload kind.
    pub kind: FrameKind,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Creates a header for the given kind and payload length.
    pub fn new(kind: FrameKind, payload_length: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            kind,
            payload_length,
        }
    }

    /// Serializes the header into its 10-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.kind as u8;
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Parses and validates a header from its wire form.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtoError::ShortFrame {
                need: FRAME_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(ProtoError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(ProtoError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let kind = FrameKind::from_u8(buf[5])?;
        let payload_length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(ProtoError::PayloadTooLarge {
                size: payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            magic,
            version,
            kind,
            payload_length,
        })
    }
}

/// One protocol frame: header plus payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame of the given kind around a payload.
    pub fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        let header = FrameHeader::new(kind, payload.len() as u32);
        Self { header, payload }
    }

    /// Serializes header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::new(FrameKind::Command, 42);
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = FrameHeader::new(FrameKind::Ack, 8).encode();
        buf[0] = 0xFF;
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(ProtoError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = FrameHeader::new(FrameKind::Ack, 8).encode();
        buf[4] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(ProtoError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut buf = FrameHeader::new(FrameKind::Ack, 8).encode();
        buf[5] = 0x7F;
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(ProtoError::UnknownKind(0x7F))
        ));
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut buf = FrameHeader::new(FrameKind::Status, 0).encode();
        buf[6..10].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(ProtoError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(
            FrameHeader::decode(&[0u8; 4]),
            Err(ProtoError::ShortFrame { .. })
        ));
    }

    #[test]
    fn frame_encode_layout() {
        let frame = Frame::new(FrameKind::Ack, vec![1, 2, 3]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE + 3);
        assert_eq!(&bytes[FRAME_HEADER_SIZE..], &[1, 2, 3]);
    }
}

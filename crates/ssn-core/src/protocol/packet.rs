//! Packet framing.
//!
//! ```text
//! ┌──────────┬──────────┬───────────────────┐
//! │   Tag    │  Length  │     Payload       │
//! │ (1 byte) │ (4 bytes)│   (variable)      │
//! └──────────┴──────────┴───────────────────┘
//! ```

use super::types::PacketType;
use crate::error::{Error, Result};

/// Header size: tag (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Packet header.
///
/// The tag byte is kept raw so that headers round-trip for every byte value;
/// dispatch goes through [`PacketHeader::packet_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw type tag.
    pub tag: u8,
    /// Payload length in bytes.
    pub length: u32,
}

impl PacketHeader {
    /// Create a new header.
    pub fn new(packet_type: PacketType, length: u32) -> Self {
        Self {
            tag: packet_type.to_byte(),
            length,
        }
    }

    /// Packet type for dispatch. Unknown tags are `Invalid`.
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_byte(self.tag)
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.tag;
        bytes[1..5].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Parse header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Protocol("header too short".into()));
        }

        let length = u32::from_be_bytes(
            bytes[1..5]
                .try_into()
                .map_err(|_| Error::Protocol("invalid length field".into()))?,
        );

        Ok(Self {
            tag: bytes[0],
            length,
        })
    }
}

/// Encode a packet to wire bytes.
pub fn encode(packet_type: PacketType, payload: &[u8]) -> Result<Vec<u8>> {
    let length =
        u32::try_from(payload.len()).map_err(|_| Error::Protocol("payload too large".into()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&PacketHeader::new(packet_type, length).to_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

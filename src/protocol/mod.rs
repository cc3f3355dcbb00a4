//! # DSU Wire Protocol
//!
//! Binary layer of the cemuhook "DSU" controller protocol as spoken by this server.
//!
//! ```text
//! protocol/
//! ├── writer.rs    - bounds-checked little-endian cursor writer
//! ├── codec.rs     - header framing, CRC-32 checksum, inbound header parsing
//! └── messages.rs  - request parsing and port-info payloads
//! ```
//!
//! Every packet starts with a 16-byte header followed by a payload whose first field is the
//! 32-bit message type:
//!
//! ```text
//! ┌───────┬─────────┬────────┬──────────┬───────────┬──────────────┬─────────┐
//! │ magic │ version │ length │ checksum │ server id │ message type │ body... │
//! │ 4 B   │ u16 LE  │ u16 LE │ u32 LE   │ u32 LE    │ u32 LE       │         │
//! └───────┴─────────┴────────┴──────────┴───────────┴──────────────┴─────────┘
//! ```
//!
//! `length` counts every byte after the header, message type included. The checksum is a
//! CRC-32 over the whole packet computed while its own field is zero.

pub mod codec;
pub mod messages;
pub mod writer;

use std::fmt;

pub use codec::{decode_header, encode_header, finalize, frame, validate, PacketHeader};
pub use messages::{ListPortsRequest, PadDataRequest, PortInfo};
pub use writer::PacketWriter;

/// Magic tag on packets sent by clients.
pub const CLIENT_MAGIC: [u8; 4] = *b"DSUC";
/// Magic tag on packets sent by this server.
pub const SERVER_MAGIC: [u8; 4] = *b"DSUS";

pub const MAX_PROTOCOL_VERSION: u16 = 1001;
pub const DEFAULT_SERVER_ID: u32 = 1234;
pub const DEFAULT_PORT: u16 = 26760;
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 5000;

pub const HEADER_LEN: usize = 16;
/// Byte offset of the checksum field inside the header.
pub const CHECKSUM_OFFSET: usize = 8;

/// The only controller slot this server exposes.
pub const SUPPORTED_SLOT: u8 = 0;

pub const SLOT_STATE_CONNECTED: u8 = 0x02;
pub const CONNECTION_USB: u8 = 0x01;
pub const BATTERY_CHARGED: u8 = 0xEF;

/// MAC reported for slot 0 and accepted in MAC-targeted pad data requests.
pub const PLACEHOLDER_MAC: MacAddress = MacAddress([0x00, 0x00, 0x00, 0x00, 0x00, 0xFF]);

/// Errors raised while encoding or decoding DSU packets.
///
/// None of these ever reach the far end: the dispatcher logs them and drops the datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid magic tag {0:02X?}")]
    InvalidMagic([u8; 4]),

    #[error("truncated packet: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unknown message type {0:#08x}")]
    UnknownMessageType(u32),

    #[error("write of {requested} bytes at offset {offset} overflows {capacity} byte buffer")]
    BufferOverflow {
        offset: usize,
        requested: usize,
        capacity: usize,
    },
}

/// Message type codes. Requests and responses share the same code per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Version,
    ListPorts,
    PadData,
}

impl MessageType {
    pub const fn code(self) -> u32 {
        match self {
            MessageType::Version => 0x10_0000,
            MessageType::ListPorts => 0x10_0001,
            MessageType::PadData => 0x10_0002,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0x10_0000 => Ok(MessageType::Version),
            0x10_0001 => Ok(MessageType::ListPorts),
            0x10_0002 => Ok(MessageType::PadData),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Hardware address carried in port info and pad data messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Little-endian read helpers over a byte slice. Out-of-range reads become `Truncated`.
pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or(ProtocolError::Truncated {
            needed: offset + 2,
            available: data.len(),
        })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(ProtocolError::Truncated {
            needed: offset + 4,
            available: data.len(),
        })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

//! Header framing and checksum handling for DSU packets.

use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::debug;

use super::{
    read_u16_le, read_u32_le, PacketWriter, ProtocolError, CHECKSUM_OFFSET, CLIENT_MAGIC,
    HEADER_LEN, MAX_PROTOCOL_VERSION, SERVER_MAGIC,
};

// zlib-compatible CRC-32, which is what cemuhook clients compute
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Parsed view of an inbound packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol_version: u16,
    /// Declared byte count following the header.
    pub length: u16,
    pub checksum: u32,
    /// Sender id: the client id on inbound packets.
    pub sender_id: u32,
    /// Offset of the first payload byte (the message type).
    pub body_offset: usize,
}

/// Builds an outbound header with a zero checksum placeholder.
pub fn encode_header(payload_length: u16, server_id: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&SERVER_MAGIC);
    header[4..6].copy_from_slice(&MAX_PROTOCOL_VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&payload_length.to_le_bytes());
    // bytes 8..12 stay zero until finalize
    header[12..16].copy_from_slice(&server_id.to_le_bytes());
    header
}

/// CRC-32 over the whole packet as if the checksum field were zero.
pub fn checksum(packet: &[u8]) -> Result<u32, ProtocolError> {
    if packet.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: packet.len(),
        });
    }
    let mut digest = CRC32.digest();
    digest.update(&packet[..CHECKSUM_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&packet[CHECKSUM_OFFSET + 4..]);
    Ok(digest.finalize())
}

/// Writes the packet checksum into the header. Call once, after the payload is complete.
pub fn finalize(packet: &mut [u8]) -> Result<u32, ProtocolError> {
    let crc = checksum(packet)?;
    packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
    Ok(crc)
}

/// Parses the header of a client packet.
pub fn decode_header(datagram: &[u8]) -> Result<PacketHeader, ProtocolError> {
    if datagram.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: datagram.len(),
        });
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&datagram[0..4]);
    if magic != CLIENT_MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let header = PacketHeader {
        protocol_version: read_u16_le(datagram, 4)?,
        length: read_u16_le(datagram, 6)?,
        checksum: read_u32_le(datagram, CHECKSUM_OFFSET)?,
        sender_id: read_u32_le(datagram, 12)?,
        body_offset: HEADER_LEN,
    };

    let declared = HEADER_LEN + header.length as usize;
    if declared > datagram.len() {
        return Err(ProtocolError::Truncated {
            needed: declared,
            available: datagram.len(),
        });
    }

    Ok(header)
}

/// Recomputes the checksum and compares it with the value stored in the header.
pub fn verify_checksum(datagram: &[u8]) -> Result<(), ProtocolError> {
    let expected = read_u32_le(datagram, CHECKSUM_OFFSET)?;
    let actual = checksum(datagram)?;
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

pub fn validate(datagram: &[u8]) -> bool {
    match verify_checksum(datagram) {
        Ok(()) => true,
        Err(e) => {
            debug!("Checksum validation failed: {}", e);
            false
        }
    }
}

/// Frames a payload (message type first) into a finalized server packet.
pub fn frame(server_id: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    frame_with_magic(SERVER_MAGIC, server_id, payload)
}

/// Like [`frame`] with a caller-chosen magic tag; [`CLIENT_MAGIC`] builds client requests.
pub fn frame_with_magic(
    magic: [u8; 4],
    sender_id: u32,
    payload: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let length = u16::try_from(payload.len()).map_err(|_| ProtocolError::BufferOverflow {
        offset: HEADER_LEN,
        requested: payload.len(),
        capacity: u16::MAX as usize,
    })?;

    let mut header = encode_header(length, sender_id);
    header[0..4].copy_from_slice(&magic);

    let mut writer = PacketWriter::with_capacity(HEADER_LEN + payload.len());
    writer.write_bytes(&header)?.write_bytes(payload)?;

    let crc = checksum(writer.as_slice())?;
    writer.patch_u32_le(CHECKSUM_OFFSET, crc)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn client_packet(payload: &[u8]) -> Vec<u8> {
        frame_with_magic(CLIENT_MAGIC, 42, payload).unwrap()
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = encode_header(12, 1234);
        assert_eq!(&header[0..4], b"DSUS");
        assert_eq!(&header[4..6], &1001u16.to_le_bytes());
        assert_eq!(&header[6..8], &[12, 0]);
        assert_eq!(&header[8..12], &[0, 0, 0, 0]);
        assert_eq!(&header[12..16], &1234u32.to_le_bytes());
    }

    #[test]
    fn checksum_matches_zlib_crc32() {
        // crc32("123456789") check value
        let mut digest = CRC32.digest();
        digest.update(b"123456789");
        assert_eq!(digest.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn finalize_writes_crc_over_zeroed_field() {
        let mut packet = frame(1234, &[1, 0, 16, 0]).unwrap();
        let stored = u32::from_le_bytes(packet[8..12].try_into().unwrap());

        packet[8..12].copy_from_slice(&[0, 0, 0, 0]);
        let mut digest = CRC32.digest();
        digest.update(&packet);
        assert_eq!(stored, digest.finalize());
    }

    #[test]
    fn framing_matches_header_plus_finalize() {
        let payload = [0x02, 0x00, 0x10, 0x00, 0x07, 0x08];
        let mut manual = encode_header(payload.len() as u16, 1234).to_vec();
        manual.extend_from_slice(&payload);
        let crc = finalize(&mut manual).unwrap();

        let framed = frame(1234, &payload).unwrap();
        assert_eq!(framed, manual);
        assert_eq!(&framed[8..12], &crc.to_le_bytes());
    }

    #[test]
    fn decode_reads_client_header() {
        let packet = client_packet(&[0x01, 0x00, 0x10, 0x00, 0xAA]);
        let header = decode_header(&packet).unwrap();

        assert_eq!(header.protocol_version, 1001);
        assert_eq!(header.length, 5);
        assert_eq!(header.sender_id, 42);
        assert_eq!(header.body_offset, HEADER_LEN);
        assert_eq!(
            header.checksum,
            u32::from_le_bytes(packet[8..12].try_into().unwrap())
        );
    }

    #[test]
    fn decode_rejects_server_magic() {
        let packet = frame(1, &[0, 0, 0x10, 0]).unwrap();
        assert_eq!(
            decode_header(&packet),
            Err(ProtocolError::InvalidMagic(*b"DSUS"))
        );
    }

    #[test]
    fn decode_rejects_short_datagrams() {
        let packet = client_packet(&[0, 0, 0x10, 0]);
        assert_eq!(
            decode_header(&packet[..15]),
            Err(ProtocolError::Truncated {
                needed: 16,
                available: 15
            })
        );
        // header intact but declared length exceeds what arrived
        assert_eq!(
            decode_header(&packet[..18]),
            Err(ProtocolError::Truncated {
                needed: 20,
                available: 18
            })
        );
    }

    #[test]
    fn verify_reports_both_checksums() {
        let mut packet = client_packet(&[0, 0, 0x10, 0]);
        packet[8] ^= 0xFF;
        assert!(matches!(
            verify_checksum(&packet),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(!validate(&packet));
    }

    proptest! {
        #[test]
        fn finalized_packets_validate(payload in proptest::collection::vec(any::<u8>(), 0..128)) {
            let packet = frame(1234, &payload).unwrap();
            prop_assert!(validate(&packet));

            let mut inbound = packet.clone();
            inbound[0..4].copy_from_slice(&CLIENT_MAGIC);
            finalize(&mut inbound).unwrap();
            prop_assert!(validate(&inbound));
            prop_assert_eq!(decode_header(&inbound).unwrap().length as usize, payload.len());
        }

        #[test]
        fn single_bit_flip_fails_validation(
            payload in proptest::collection::vec(any::<u8>(), 1..96),
            bit in any::<proptest::sample::Index>(),
        ) {
            let mut packet = frame(1234, &payload).unwrap();
            let flip = bit.index(packet.len() * 8);
            packet[flip / 8] ^= 1 << (flip % 8);
            prop_assert!(!validate(&packet));
        }
    }
}

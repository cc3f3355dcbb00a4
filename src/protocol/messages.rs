//! Request bodies and the shared port-info block.
//!
//! Parsers take the bytes that follow the message type code.

use super::{
    MacAddress, MessageType, PacketWriter, ProtocolError, BATTERY_CHARGED, CONNECTION_USB,
    PLACEHOLDER_MAC, SLOT_STATE_CONNECTED, SUPPORTED_SLOT,
};

/// Device model reported in port info replies.
pub const PORT_INFO_MODEL: u8 = 0x03;
/// Device model reported in pad data reports.
pub const PAD_DATA_MODEL: u8 = 0x02;

/// Size of the port-info block shared by port info and pad data messages.
pub const PORT_INFO_LEN: usize = 11;

/// `ListPorts` request: the slots a client wants described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPortsRequest {
    pub slots: Vec<u8>,
}

impl ListPortsRequest {
    /// Reads the u32 count and up to that many slot bytes.
    ///
    /// A count larger than the bytes actually present is clamped; missing entries are ignored.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let count = super::read_u32_le(body, 0)? as usize;
        let available = &body[4..];
        let slots = available[..count.min(available.len())].to_vec();
        Ok(Self { slots })
    }
}

/// `PadDataRequest`: a client subscribing to pad data reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadDataRequest {
    pub flags: u8,
    pub slot: u8,
    pub mac: MacAddress,
}

impl PadDataRequest {
    pub const FLAG_SLOT_VALID: u8 = 0x01;
    pub const FLAG_MAC_VALID: u8 = 0x02;
    const LEN: usize = 8;

    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < Self::LEN {
            return Err(ProtocolError::Truncated {
                needed: Self::LEN,
                available: body.len(),
            });
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&body[2..8]);
        Ok(Self {
            flags: body[0],
            slot: body[1],
            mac: MacAddress(mac),
        })
    }
}

/// Slot description sent in port info replies and at the start of every pad data report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub slot: u8,
    pub state: u8,
    pub model: u8,
    pub connection: u8,
    pub mac: MacAddress,
    pub battery: u8,
}

impl PortInfo {
    /// The one slot this server exposes: connected over USB, fully charged.
    pub fn connected_slot(model: u8) -> Self {
        Self {
            slot: SUPPORTED_SLOT,
            state: SLOT_STATE_CONNECTED,
            model,
            connection: CONNECTION_USB,
            mac: PLACEHOLDER_MAC,
            battery: BATTERY_CHARGED,
        }
    }

    pub fn write_to(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        writer
            .write_u8(self.slot)?
            .write_u8(self.state)?
            .write_u8(self.model)?
            .write_u8(self.connection)?
            .write_bytes(&self.mac.octets())?
            .write_u8(self.battery)?;
        Ok(())
    }

    /// Payload of a port info reply: message type, port-info block, trailing zero.
    pub fn encode_response(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut writer = PacketWriter::with_capacity(4 + PORT_INFO_LEN + 1);
        writer.write_u32_le(MessageType::ListPorts.code())?;
        self.write_to(&mut writer)?;
        writer.write_u8(0x00)?;
        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_ports_reads_requested_slots() {
        let body = [3, 0, 0, 0, 0, 1, 2];
        let request = ListPortsRequest::parse(&body).unwrap();
        assert_eq!(request.slots, vec![0, 1, 2]);
    }

    #[test]
    fn list_ports_clamps_count_to_available_bytes() {
        let body = [0xFF, 0xFF, 0xFF, 0xFF, 0, 3];
        let request = ListPortsRequest::parse(&body).unwrap();
        assert_eq!(request.slots, vec![0, 3]);

        assert!(ListPortsRequest::parse(&[1, 0]).is_err());
    }

    #[test]
    fn pad_data_request_parses_flags_slot_and_mac() {
        let body = [0x02, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF];
        let request = PadDataRequest::parse(&body).unwrap();
        assert_eq!(request.flags, PadDataRequest::FLAG_MAC_VALID);
        assert_eq!(request.slot, 5);
        assert_eq!(request.mac, PLACEHOLDER_MAC);

        assert_eq!(
            PadDataRequest::parse(&body[..7]),
            Err(ProtocolError::Truncated {
                needed: 8,
                available: 7
            })
        );
    }

    #[test]
    fn port_info_response_layout() {
        let payload = PortInfo::connected_slot(PORT_INFO_MODEL)
            .encode_response()
            .unwrap();
        assert_eq!(&payload[..4], &0x10_0001u32.to_le_bytes());
        assert_eq!(
            &payload[4..],
            &[0x00, 0x02, 0x03, 0x01, 0, 0, 0, 0, 0, 0xFF, 0xEF, 0x00]
        );
    }
}

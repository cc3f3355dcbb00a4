//! Inbound request handling.
//!
//! Every datagram goes through the same pipeline: header, checksum, message type, handler.
//! Any failure yields an `Err` for the caller to log and no reply is produced.

use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BridgeContext, OutboundPacket};
use crate::protocol::messages::PORT_INFO_MODEL;
use crate::protocol::{
    decode_header, read_u32_le, ListPortsRequest, MessageType, PadDataRequest, PortInfo,
    ProtocolError, PLACEHOLDER_MAC, SUPPORTED_SLOT,
};

/// How a `PadDataRequest` is matched against slot 0.
///
/// A flags value of zero always subscribes. `PerBit` is the default: each flag bit enables
/// its own comparison. `Literal` matches servers whose two bit tests both reduce to
/// `flags & 1`: bit 0 gates the slot and MAC comparisons alike, and bit 1 on its own never
/// matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Bit 0 enables the slot comparison, bit 1 the MAC comparison.
    #[default]
    PerBit,
    /// Bit 0 enables both comparisons; other bits are ignored.
    Literal,
}

impl RegistrationPolicy {
    pub fn matches(self, request: &PadDataRequest) -> bool {
        if request.flags == 0 {
            return true;
        }
        let slot_hit = request.slot == SUPPORTED_SLOT;
        let mac_hit = request.mac == PLACEHOLDER_MAC;
        match self {
            RegistrationPolicy::PerBit => {
                (request.flags & PadDataRequest::FLAG_SLOT_VALID != 0 && slot_hit)
                    || (request.flags & PadDataRequest::FLAG_MAC_VALID != 0 && mac_hit)
            }
            RegistrationPolicy::Literal => {
                request.flags & PadDataRequest::FLAG_SLOT_VALID != 0 && (slot_hit || mac_hit)
            }
        }
    }
}

/// Handles one inbound datagram and returns the replies it calls for.
pub fn dispatch(
    ctx: &mut BridgeContext,
    datagram: &[u8],
    from: SocketAddr,
    now: Instant,
) -> Result<Vec<OutboundPacket>, ProtocolError> {
    let header = decode_header(datagram)?;
    crate::protocol::codec::verify_checksum(datagram)?;

    let body_end = header.body_offset + header.length as usize;
    let payload = &datagram[header.body_offset..body_end];
    let message_type = MessageType::try_from(read_u32_le(payload, 0)?)?;
    let body = &payload[4..];

    debug!(
        "{:?} from {} (client id {}, protocol {})",
        message_type, from, header.sender_id, header.protocol_version
    );

    match message_type {
        MessageType::Version => {
            info!("Version request from {} ignored", from);
            Ok(Vec::new())
        }
        MessageType::ListPorts => list_ports(ctx, body, from),
        MessageType::PadData => {
            register_pad_data(ctx, body, from, now)?;
            Ok(Vec::new())
        }
    }
}

fn list_ports(
    ctx: &BridgeContext,
    body: &[u8],
    from: SocketAddr,
) -> Result<Vec<OutboundPacket>, ProtocolError> {
    let request = ListPortsRequest::parse(body)?;
    let mut replies = Vec::new();

    for slot in request.slots {
        if slot != SUPPORTED_SLOT {
            debug!("Ignoring port info request for unsupported slot {}", slot);
            continue;
        }
        let payload = PortInfo::connected_slot(PORT_INFO_MODEL).encode_response()?;
        replies.push(OutboundPacket {
            destination: from,
            bytes: crate::protocol::frame(ctx.server_id, &payload)?,
        });
    }

    Ok(replies)
}

fn register_pad_data(
    ctx: &mut BridgeContext,
    body: &[u8],
    from: SocketAddr,
    now: Instant,
) -> Result<(), ProtocolError> {
    let request = PadDataRequest::parse(body)?;

    if !ctx.policy.matches(&request) {
        debug!(
            "Pad data request from {} for slot {} / {} does not match (flags {:#04x})",
            from, request.slot, request.mac, request.flags
        );
        return Ok(());
    }

    let was_live = ctx.registry.is_live(now, ctx.client_timeout);
    match ctx.registry.register(from, now) {
        Some(previous) => info!("Client {} replaces {} as pad data subscriber", from, previous),
        None if !was_live => info!("Client {} subscribed to pad data", from),
        None => debug!("Client {} refreshed its subscription", from),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::frame_with_magic;
    use crate::protocol::{validate, CLIENT_MAGIC, HEADER_LEN, MacAddress};
    use std::time::Duration;

    fn client(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    fn request(message_type: MessageType, body: &[u8]) -> Vec<u8> {
        let mut payload = message_type.code().to_le_bytes().to_vec();
        payload.extend_from_slice(body);
        frame_with_magic(CLIENT_MAGIC, 99, &payload).unwrap()
    }

    fn pad_request(flags: u8, slot: u8, mac: [u8; 6]) -> Vec<u8> {
        let mut body = vec![flags, slot];
        body.extend_from_slice(&mac);
        request(MessageType::PadData, &body)
    }

    #[test]
    fn list_ports_slot_zero_yields_port_info() {
        let mut ctx = BridgeContext::default();
        let datagram = request(MessageType::ListPorts, &[1, 0, 0, 0, 0]);

        let replies = dispatch(&mut ctx, &datagram, client(5000), Instant::now()).unwrap();
        assert_eq!(replies.len(), 1);

        let reply = &replies[0];
        assert_eq!(reply.destination, client(5000));
        assert!(validate(&reply.bytes));
        assert_eq!(&reply.bytes[0..4], b"DSUS");
        assert_eq!(u16::from_le_bytes([reply.bytes[6], reply.bytes[7]]), 16);
        assert_eq!(&reply.bytes[12..16], &1234u32.to_le_bytes());
        assert_eq!(&reply.bytes[HEADER_LEN..HEADER_LEN + 4], &0x10_0001u32.to_le_bytes());
        assert_eq!(
            &reply.bytes[HEADER_LEN + 4..],
            &[0x00, 0x02, 0x03, 0x01, 0, 0, 0, 0, 0, 0xFF, 0xEF, 0x00]
        );
    }

    #[test]
    fn list_ports_skips_other_slots() {
        let mut ctx = BridgeContext::default();
        let datagram = request(MessageType::ListPorts, &[4, 0, 0, 0, 3, 0, 1, 0]);

        let replies = dispatch(&mut ctx, &datagram, client(5000), Instant::now()).unwrap();
        assert_eq!(replies.len(), 2);
    }

    #[test]
    fn version_request_gets_no_reply() {
        let mut ctx = BridgeContext::default();
        let datagram = request(MessageType::Version, &[]);
        assert!(dispatch(&mut ctx, &datagram, client(1), Instant::now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn wildcard_pad_request_registers_sender() {
        let mut ctx = BridgeContext::default();
        let now = Instant::now();
        let datagram = pad_request(0x00, 7, [1, 2, 3, 4, 5, 6]);

        let replies = dispatch(&mut ctx, &datagram, client(6000), now).unwrap();
        assert!(replies.is_empty());

        let session = ctx.registry.current().unwrap();
        assert_eq!(session.address, client(6000));
        assert_eq!(session.last_request_at, now);
    }

    #[test]
    fn new_request_overwrites_session() {
        let mut ctx = BridgeContext::default();
        let t0 = Instant::now();
        dispatch(&mut ctx, &pad_request(0, 0, [0; 6]), client(1), t0).unwrap();

        let t1 = t0 + Duration::from_millis(100);
        dispatch(&mut ctx, &pad_request(0, 0, [0; 6]), client(2), t1).unwrap();

        let session = ctx.registry.current().unwrap();
        assert_eq!(session.address, client(2));
        assert_eq!(session.last_request_at, t1);
    }

    #[test]
    fn per_bit_policy_checks_flag_bits() {
        let policy = RegistrationPolicy::PerBit;
        let req = |flags, slot, mac| PadDataRequest {
            flags,
            slot,
            mac: MacAddress(mac),
        };
        let other_mac = [1, 1, 1, 1, 1, 1];
        let placeholder = PLACEHOLDER_MAC.octets();

        assert!(policy.matches(&req(0x00, 3, other_mac)));
        assert!(policy.matches(&req(0x01, 0, other_mac)));
        assert!(!policy.matches(&req(0x01, 3, placeholder)));
        assert!(policy.matches(&req(0x02, 3, placeholder)));
        assert!(!policy.matches(&req(0x02, 0, other_mac)));
        assert!(!policy.matches(&req(0x04, 0, placeholder)));
    }

    #[test]
    fn literal_policy_gates_both_comparisons_on_bit_zero() {
        let policy = RegistrationPolicy::Literal;
        let req = |flags, slot, mac| PadDataRequest {
            flags,
            slot,
            mac: MacAddress(mac),
        };
        let placeholder = PLACEHOLDER_MAC.octets();

        assert!(policy.matches(&req(0x00, 3, [9; 6])));
        assert!(policy.matches(&req(0x01, 0, [9; 6])));
        assert!(policy.matches(&req(0x01, 3, placeholder)));
        assert!(policy.matches(&req(0x03, 3, placeholder)));
        assert!(!policy.matches(&req(0x02, 3, placeholder)));
        assert!(!policy.matches(&req(0x02, 0, [9; 6])));
        assert!(!policy.matches(&req(0x04, 0, [9; 6])));
        assert!(!policy.matches(&req(0x04, 0, placeholder)));
        assert!(!policy.matches(&req(0x03, 1, [9; 6])));
    }

    #[test]
    fn literal_policy_leaves_mac_only_requests_unregistered() {
        let mut ctx = BridgeContext::default();
        ctx.policy = RegistrationPolicy::Literal;
        let now = Instant::now();

        dispatch(&mut ctx, &pad_request(0x02, 3, PLACEHOLDER_MAC.octets()), client(1), now)
            .unwrap();
        dispatch(&mut ctx, &pad_request(0x04, 0, [9; 6]), client(2), now).unwrap();
        assert!(ctx.registry.current().is_none());

        dispatch(&mut ctx, &pad_request(0x01, 3, PLACEHOLDER_MAC.octets()), client(3), now)
            .unwrap();
        assert_eq!(ctx.registry.current().unwrap().address, client(3));
    }

    #[test]
    fn unmatched_request_changes_nothing() {
        let mut ctx = BridgeContext::default();
        let t0 = Instant::now();
        dispatch(&mut ctx, &pad_request(0, 0, [0; 6]), client(1), t0).unwrap();

        let later = t0 + Duration::from_secs(1);
        dispatch(&mut ctx, &pad_request(0x01, 2, [0; 6]), client(2), later).unwrap();

        let session = ctx.registry.current().unwrap();
        assert_eq!(session.address, client(1));
        assert_eq!(session.last_request_at, t0);
    }

    #[test]
    fn corrupted_checksum_is_dropped() {
        let mut ctx = BridgeContext::default();
        let mut datagram = pad_request(0, 0, [0; 6]);
        let last = datagram.len() - 1;
        datagram[last] ^= 0x01;

        let result = dispatch(&mut ctx, &datagram, client(1), Instant::now());
        assert!(matches!(result, Err(ProtocolError::ChecksumMismatch { .. })));
        assert!(ctx.registry.current().is_none());
    }

    #[test]
    fn server_magic_and_short_packets_are_dropped() {
        let mut ctx = BridgeContext::default();
        let mut datagram = request(MessageType::ListPorts, &[1, 0, 0, 0, 0]);
        datagram[3] = b'S';
        assert_eq!(
            dispatch(&mut ctx, &datagram, client(1), Instant::now()),
            Err(ProtocolError::InvalidMagic(*b"DSUS"))
        );

        assert!(matches!(
            dispatch(&mut ctx, &[b'D', b'S', b'U', b'C'], client(1), Instant::now()),
            Err(ProtocolError::Truncated { .. })
        ));

        // valid header and checksum but no room for the pad data fields
        let short = request(MessageType::PadData, &[0, 0, 0]);
        assert!(matches!(
            dispatch(&mut ctx, &short, client(1), Instant::now()),
            Err(ProtocolError::Truncated { .. })
        ));
        assert!(ctx.registry.current().is_none());
    }

    #[test]
    fn unknown_message_type_is_ignored() {
        let mut ctx = BridgeContext::default();
        let payload = 0x10_0009u32.to_le_bytes();
        let datagram = frame_with_magic(CLIENT_MAGIC, 1, &payload).unwrap();
        assert_eq!(
            dispatch(&mut ctx, &datagram, client(1), Instant::now()),
            Err(ProtocolError::UnknownMessageType(0x10_0009))
        );
    }
}

//! Pad data reports.
//!
//! Payload layout after the message type:
//!
//! ```text
//! offset  size  field
//!  0      11    port-info block (slot 0, connected, model, usb, mac, battery)
//! 11       1    active (0x01)
//! 12       4    packet counter (u32 LE)
//! 16       1    dpad mask     left down right up b10 0 0 b9
//! 17       1    button mask   b1 b2 b3 b4 b6 b5 b8 b7
//! 18       2    PS, touch (always 0)
//! 20       4    LX LY RX RY
//! 24      12    pressure: dpad L D R U, b1 b2 b3 b4 b6 b5 b8 b7 (0xFF / 0x00)
//! ```
//!
//! Touchpad and motion sections are not sent; the header length ends the packet here.

use std::time::Instant;

use tracing::debug;

use super::{BridgeContext, OutboundPacket};
use crate::controller::ControllerState;
use crate::protocol::messages::{PAD_DATA_MODEL, PORT_INFO_LEN};
use crate::protocol::{frame, MessageType, PacketWriter, PortInfo, ProtocolError};

/// Bytes following the header in a pad data report.
pub const PAD_DATA_PAYLOAD_LEN: usize = 4 + PORT_INFO_LEN + 1 + 4 + 4 + 4 + 12;

pub fn dpad_mask(state: &ControllerState) -> u8 {
    bits([
        state.dpad_left,
        state.dpad_down,
        state.dpad_right,
        state.dpad_up,
        state.b10,
        false,
        false,
        state.b9,
    ])
}

pub fn button_mask(state: &ControllerState) -> u8 {
    bits([
        state.b1, state.b2, state.b3, state.b4, state.b6, state.b5, state.b8, state.b7,
    ])
}

/// Packs flags MSB first.
fn bits(flags: [bool; 8]) -> u8 {
    flags
        .iter()
        .fold(0u8, |acc, &set| (acc << 1) | u8::from(set))
}

fn pressure(pressed: bool) -> u8 {
    if pressed {
        0xFF
    } else {
        0x00
    }
}

/// Serializes one report payload, message type first.
pub fn encode_pad_data(state: &ControllerState, counter: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = PacketWriter::with_capacity(PAD_DATA_PAYLOAD_LEN);
    writer.write_u32_le(MessageType::PadData.code())?;
    PortInfo::connected_slot(PAD_DATA_MODEL).write_to(&mut writer)?;

    writer
        .write_u8(0x01)?
        .write_u32_le(counter)?
        .write_u8(dpad_mask(state))?
        .write_u8(button_mask(state))?
        // PS and touch buttons
        .write_u8(0x00)?
        .write_u8(0x00)?
        .write_u8(state.left.x)?
        .write_u8(state.left.y)?
        .write_u8(state.right.x)?
        .write_u8(state.right.y)?;

    for pressed in [
        state.dpad_left,
        state.dpad_down,
        state.dpad_right,
        state.dpad_up,
        state.b1,
        state.b2,
        state.b3,
        state.b4,
        state.b6,
        state.b5,
        state.b8,
        state.b7,
    ] {
        writer.write_u8(pressure(pressed))?;
    }

    Ok(writer.into_inner())
}

/// Builds a report for the live subscriber, if any.
///
/// The packet counter advances as soon as a packet is built; a failed send does not give
/// the number back.
pub fn emit_report(
    ctx: &mut BridgeContext,
    state: &ControllerState,
    now: Instant,
) -> Result<Option<OutboundPacket>, ProtocolError> {
    let Some(session) = ctx.registry.live_session(now, ctx.client_timeout) else {
        return Ok(None);
    };

    let counter = ctx.next_packet_number();
    let payload = encode_pad_data(state, counter)?;
    debug!("Pad data #{} for {}", counter, session.address);

    Ok(Some(OutboundPacket {
        destination: session.address,
        bytes: frame(ctx.server_id, &payload)?,
    }))
}

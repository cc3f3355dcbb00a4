use serde::{Deserialize, Serialize};

/// Analog stick position on the byte scale reported to DSU clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StickPosition {
    pub x: u8,
    pub y: u8,
}

impl StickPosition {
    pub const CENTERED: Self = Self { x: 128, y: 128 };

    /// Maps gilrs axis values (-1.0..=1.0, +y up) to bytes with 0 at the top-left.
    pub fn from_axes(x: f32, y: f32) -> Self {
        Self {
            x: axis_to_byte(x),
            y: axis_to_byte(-y),
        }
    }
}

impl Default for StickPosition {
    fn default() -> Self {
        Self::CENTERED
    }
}

fn axis_to_byte(value: f32) -> u8 {
    let value = value.clamp(-1.0, 1.0);
    ((value + 1.0) * 127.5).round() as u8
}

/// Snapshot of the pad as seen by the DSU encoder.
///
/// Buttons follow the numbering of a generic dual-analog pad: b1..b4 are the face buttons
/// (left, bottom, right, top), b5/b6 the shoulders, b7/b8 the triggers, b9 select, b10 start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerState {
    pub b1: bool,
    pub b2: bool,
    pub b3: bool,
    pub b4: bool,
    pub b5: bool,
    pub b6: bool,
    pub b7: bool,
    pub b8: bool,
    pub b9: bool,
    pub b10: bool,

    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,

    pub left: StickPosition,
    pub right: StickPosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_map_to_byte_range() {
        assert_eq!(StickPosition::from_axes(0.0, 0.0), StickPosition { x: 128, y: 128 });
        assert_eq!(StickPosition::from_axes(-1.0, 1.0), StickPosition { x: 0, y: 0 });
        assert_eq!(StickPosition::from_axes(1.0, -1.0), StickPosition { x: 255, y: 255 });
        // out-of-range driver values are clamped
        assert_eq!(StickPosition::from_axes(3.0, -7.5).x, 255);
    }

    #[test]
    fn default_state_is_idle_and_centered() {
        let state = ControllerState::default();
        assert!(!state.b1 && !state.b10 && !state.dpad_up);
        assert_eq!(state.left, StickPosition::CENTERED);
        assert_eq!(state.right, StickPosition::CENTERED);
    }
}

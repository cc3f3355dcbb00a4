use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::{ControllerState, StickPosition};

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
    pub trigger_threshold: f32,
    pub poll_interval_us: u64,
    pub gamepad_index: Option<usize>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
            trigger_threshold: 0.5,
            poll_interval_us: 100,
            gamepad_index: None,
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send state: {0}")]
    StateSendError(String),

    #[error("State receiver closed")]
    ChannelClosed,
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct EventCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad
    active_gamepad: Option<GamepadId>,

    // Collector settings
    settings: CollectorSettings,

    // Channel for sending snapshots to the server
    state_sender: mpsc::Sender<ControllerState>,

    // Pad state as of the last event
    pad_state: ControllerState,

    // Last deadzoned stick axes, needed because gilrs reports x and y separately
    left_axes: (f32, f32),
    right_axes: (f32, f32),
}

// Implementation for Initializing state
impl EventCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        state_sender: mpsc::Sender<ControllerState>,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            None,
            settings,
            state_sender,
            ControllerState::default(),
            (0.0, 0.0), // left_axes
            (0.0, 0.0), // right_axes
        ))
    }

    // Pick the gamepad and transition to Collecting state
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        info!(
            "Initializing Event Collector with deadzone: {}",
            self.settings.joystick_deadzone
        );

        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, waiting for one to appear");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!(
                    "  [{}] ID: {}, Name: {}, UUID: {:?}",
                    idx,
                    id,
                    gamepad.name(),
                    gamepad.uuid()
                );
            }

            let index = match self.settings.gamepad_index {
                Some(index) if index < gamepads.len() => index,
                Some(index) => {
                    warn!(
                        "Configured gamepad index {} not present, using the first gamepad",
                        index
                    );
                    0
                }
                None => 0,
            };
            let (id, gamepad) = &gamepads[index];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

// Implementation for Controller in Collecting state
impl EventCollector<Collecting> {
    /// Handles at most one pending gilrs event. Returns whether a snapshot was sent.
    pub fn collect_next_event(&mut self) -> Result<bool, CollectorError> {
        let Some(Event { id, event, .. }) = self.gilrs.next_event() else {
            return Ok(false);
        };

        if self.active_gamepad.is_none() {
            if let EventType::Connected = event {
                info!("Gamepad {} connected, selecting it", id);
                self.active_gamepad = Some(id);
            }
        }

        if let Some(active_id) = self.active_gamepad {
            if id != active_id {
                debug!("Skipping event from non-active gamepad: {:?}", id);
                return Ok(false);
            }
        }

        if !self.apply_event(event) {
            return Ok(false);
        }

        match self.state_sender.try_send(self.pad_state) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CollectorError::ChannelClosed),
            Err(e) => Err(CollectorError::StateSendError(e.to_string())),
        }
    }

    // Run the collector until the server drops its receiver
    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");

        let mut sent = 0u64;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(30);
        let poll_interval = std::time::Duration::from_micros(self.settings.poll_interval_us);

        loop {
            match self.collect_next_event() {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(CollectorError::ChannelClosed) => {
                    info!("State receiver closed, stopping Event Collector");
                    return Ok(());
                }
                // a full queue only drops this snapshot, the next change resends everything
                Err(e) => warn!("Error collecting event: {}", e),
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Event Collector stats: {} snapshots in last {} seconds (avg {:.2}/sec)",
                    sent,
                    log_interval.num_seconds(),
                    sent as f64 / log_interval.num_seconds() as f64
                );
                sent = 0;
                last_log_time = now;
            }

            std::thread::sleep(poll_interval);
        }
    }

    /// Folds one gilrs event into the pad state. Returns whether anything changed.
    fn apply_event(&mut self, event: EventType) -> bool {
        match event {
            EventType::ButtonPressed(button, _) => self.set_button(button, true),
            EventType::ButtonReleased(button, _) => self.set_button(button, false),
            EventType::AxisChanged(axis, value, _) => self.set_axis(axis, value),
            EventType::Disconnected => {
                warn!("Active gamepad disconnected, reporting idle state");
                self.active_gamepad = None;
                self.left_axes = (0.0, 0.0);
                self.right_axes = (0.0, 0.0);
                let changed = self.pad_state != ControllerState::default();
                self.pad_state = ControllerState::default();
                changed
            }
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                false
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                false
            }
        }
    }

    fn set_button(&mut self, button: Button, pressed: bool) -> bool {
        let Some(flag) = button_flag(&mut self.pad_state, button) else {
            debug!("Ignoring unmapped button: {:?}", button);
            return false;
        };
        let changed = *flag != pressed;
        *flag = pressed;
        if changed {
            debug!("Button {:?} {}", button, if pressed { "pressed" } else { "released" });
        }
        changed
    }

    fn set_axis(&mut self, axis: Axis, value: f32) -> bool {
        let deadzone = self.settings.joystick_deadzone;
        let before = self.pad_state;

        match axis {
            Axis::LeftStickX => self.left_axes.0 = apply_deadzone(value, deadzone),
            Axis::LeftStickY => self.left_axes.1 = apply_deadzone(value, deadzone),
            Axis::RightStickX => self.right_axes.0 = apply_deadzone(value, deadzone),
            Axis::RightStickY => self.right_axes.1 = apply_deadzone(value, deadzone),
            Axis::LeftZ => self.pad_state.b7 = value > self.settings.trigger_threshold,
            Axis::RightZ => self.pad_state.b8 = value > self.settings.trigger_threshold,
            _ => {
                debug!("Ignoring unsupported axis: {:?}", axis);
                return false;
            }
        }

        self.pad_state.left = StickPosition::from_axes(self.left_axes.0, self.left_axes.1);
        self.pad_state.right = StickPosition::from_axes(self.right_axes.0, self.right_axes.1);
        self.pad_state != before
    }
}

/// The state flag a gilrs button drives, using the dual-analog numbering.
fn button_flag(state: &mut ControllerState, button: Button) -> Option<&mut bool> {
    let flag = match button {
        Button::West => &mut state.b1,
        Button::South => &mut state.b2,
        Button::East => &mut state.b3,
        Button::North => &mut state.b4,
        Button::LeftTrigger => &mut state.b5,
        Button::RightTrigger => &mut state.b6,
        Button::LeftTrigger2 => &mut state.b7,
        Button::RightTrigger2 => &mut state.b8,
        Button::Select => &mut state.b9,
        Button::Start => &mut state.b10,
        Button::DPadUp => &mut state.dpad_up,
        Button::DPadDown => &mut state.dpad_down,
        Button::DPadLeft => &mut state.dpad_left,
        Button::DPadRight => &mut state.dpad_right,
        _ => return None,
    };
    Some(flag)
}

// Helper function to apply deadzone to analog stick values
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        // Rescale the value to the range outside the deadzone
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_zeroes_small_values_and_rescales_the_rest() {
        assert_eq!(apply_deadzone(0.04, 0.05), 0.0);
        assert_eq!(apply_deadzone(-0.04, 0.05), 0.0);
        assert!((apply_deadzone(1.0, 0.05) - 1.0).abs() < f32::EPSILON);
        assert!((apply_deadzone(-1.0, 0.05) + 1.0).abs() < f32::EPSILON);
        assert!((apply_deadzone(0.525, 0.05) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn buttons_map_to_dual_analog_numbering() {
        let cases = [
            (Button::West, 1),
            (Button::South, 2),
            (Button::East, 3),
            (Button::North, 4),
            (Button::LeftTrigger, 5),
            (Button::RightTrigger, 6),
            (Button::LeftTrigger2, 7),
            (Button::RightTrigger2, 8),
            (Button::Select, 9),
            (Button::Start, 10),
        ];

        for (button, number) in cases {
            let mut state = ControllerState::default();
            *button_flag(&mut state, button).unwrap() = true;
            let flags = [
                state.b1, state.b2, state.b3, state.b4, state.b5, state.b6, state.b7, state.b8,
                state.b9, state.b10,
            ];
            let pressed: Vec<usize> = flags
                .iter()
                .enumerate()
                .filter(|&(_, &set)| set)
                .map(|(i, _)| i + 1)
                .collect();
            assert_eq!(pressed, vec![number], "{:?}", button);
        }
    }

    #[test]
    fn dpad_buttons_map_to_dpad_flags() {
        let mut state = ControllerState::default();
        for button in [
            Button::DPadUp,
            Button::DPadDown,
            Button::DPadLeft,
            Button::DPadRight,
        ] {
            *button_flag(&mut state, button).unwrap() = true;
        }
        assert!(state.dpad_up && state.dpad_down && state.dpad_left && state.dpad_right);
        assert!(!state.b1 && !state.b9);
    }

    #[test]
    fn unmapped_buttons_are_ignored() {
        let mut state = ControllerState::default();
        assert!(button_flag(&mut state, Button::Mode).is_none());
        assert!(button_flag(&mut state, Button::LeftThumb).is_none());
    }
}

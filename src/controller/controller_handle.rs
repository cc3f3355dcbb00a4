//! Controller Handle - Unified API for gamepad input
//!
//! Owns the settings of the collector and the lifecycle of its thread.
//!

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub use super::event_collector::{CollectorError, CollectorSettings, EventCollector};
use super::state::ControllerState;

/// Configuration settings for the controller subsystem
///
/// Loaded from the `[controller]` table of the configuration file.
///
/// # Examples
///
/// ```rust
/// use dsu_bridge::controller::ControllerSettings;
///
/// // Second pad, tighter deadzone
/// let settings = ControllerSettings {
///     gamepad_index: Some(1),
///     joystick_deadzone: 0.03,
///     ..ControllerSettings::default()
/// };
/// assert_eq!(settings.channel_capacity, 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Analog stick deadzone as a fraction (0.0-1.0)
    ///
    /// Prevents analog stick drift by ignoring small movements near the center position.
    /// Typical values range from 0.03 (precise) to 0.1 (loose/worn controllers).
    pub joystick_deadzone: f32,

    /// Analog trigger travel (0.0-1.0) above which b7/b8 count as pressed
    pub trigger_threshold: f32,

    /// Sleep between gilrs polls in microseconds
    ///
    /// Lower values reduce input latency at the cost of CPU time.
    pub poll_interval_us: u64,

    /// Index into the list of connected gamepads; the first one when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamepad_index: Option<usize>,

    /// Capacity of the snapshot queue between collector and server
    pub channel_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05, // 5% deadzone for typical controllers
            trigger_threshold: 0.5,
            poll_interval_us: 100,
            gamepad_index: None,
            channel_capacity: 1000,
        }
    }
}

/// Errors that can occur during controller initialization
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Error from the event collection subsystem
    ///
    /// Typically indicates gamepad detection issues or driver problems.
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    /// The collector thread could not be started or died before reporting back
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Handle for the gamepad collector thread
///
/// gilrs polling blocks, so the collector lives on its own OS thread instead of a tokio
/// task. It stops by itself once the receiving end of the snapshot channel is dropped.
pub struct ControllerHandle {
    thread: std::thread::JoinHandle<()>,
}

impl ControllerHandle {
    /// Spawns the collector and waits until gilrs is initialized
    ///
    /// # Arguments
    ///
    /// * `settings` - Optional configuration; uses defaults if None
    /// * `sender` - Channel receiving a [`ControllerState`] after every change
    ///
    /// # Errors
    ///
    /// * [`ControllerError::CollectorError`] - gilrs could not be initialized
    /// * [`ControllerError::InitializationError`] - the thread could not be started
    pub fn spawn(
        settings: Option<ControllerSettings>,
        sender: mpsc::Sender<ControllerState>,
    ) -> Result<Self, ControllerError> {
        info!(
            "Initializing Controller system with settings: {:?}",
            settings
        );

        let settings = settings.unwrap_or_default();
        let collector_settings = CollectorSettings {
            joystick_deadzone: settings.joystick_deadzone,
            trigger_threshold: settings.trigger_threshold,
            poll_interval_us: settings.poll_interval_us,
            gamepad_index: settings.gamepad_index,
        };
        debug!("Collector settings: {:?}", collector_settings);

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let thread = std::thread::Builder::new()
            .name("gamepad-collector".to_string())
            .spawn(move || {
                let collector = match EventCollector::create(Some(collector_settings), sender) {
                    Ok(collector) => {
                        let _ = ready_tx.send(Ok(()));
                        collector
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                match collector.initialize() {
                    Ok(mut collecting_state) => {
                        if let Err(e) = collecting_state.run_collection_loop() {
                            error!("Collector thread terminated with error: {}", e);
                        } else {
                            info!("Event Collector finished");
                        }
                    }
                    Err(e) => error!("Failed to initialize Event Collector: {}", e),
                }
            })
            .map_err(|e| ControllerError::InitializationError(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|e| ControllerError::InitializationError(e.to_string()))??;

        info!("Controller system initialized successfully");
        Ok(Self { thread })
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

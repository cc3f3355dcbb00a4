//! Controller subsystem for gamepad input handling
//!
//! Turns gilrs events into [`ControllerState`] snapshots for the DSU server:
//!
//! 1. [`event_collector`] - Gamepad polling and state tracking
//! 2. [`controller_handle`] - Settings and lifecycle management
//! 3. [`state`] - The snapshot type shared with the protocol encoder
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► Collector ──[ControllerState]──► DSU server
//!            (OS thread)    (mpsc channel)
//! ```
//!
//! A snapshot is pushed after every event that changes the pad state.

pub mod controller_handle;
pub mod event_collector;
pub mod state;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use state::{ControllerState, StickPosition};

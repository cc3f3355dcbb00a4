//! DSU (cemuhook) server streaming one gamepad to UDP clients.
//!
//! - [`protocol`] - wire format, checksums and request parsing
//! - [`server`] - session registry, request dispatch and pad data reports
//! - [`controller`] - gilrs collector producing [`controller::ControllerState`] snapshots
//! - [`config`] - the TOML configuration file

pub mod config;
pub mod controller;
pub mod protocol;
pub mod server;

//! MQTT bridge for Zity zoned HVAC controllers.
//!
//! The bridge polls the controller over Modbus (RTU or TCP), publishes zone
//! and system state as retained MQTT messages, applies commands received
//! over MQTT, and flags zones whose settings were changed at the device
//! itself.
//!
//! # Topics
//!
//! ```text
//! <base>/zone/<zone_id>/{temp,setpoint,mode,power,fan_mode,preset_mode,damper_status,manual_override}
//! <base>/zone/<zone_id>/{set_temp,set_mode,set_fan_mode,set_preset_mode,set_manual_override}
//! <base>/system/<register_key>
//! <base>/system/{set_mode,set_power}
//! <base>/system/alarm_<register>
//! <base>/bridge/status
//! ```
//!
//! # Components
//!
//! - [`gateway`] - register I/O and the controller's write protocol
//! - [`state`] - per-zone commanded state behind one lock
//! - [`detector`] - comparison of polled and commanded values
//! - [`commands`] - inbound command handling
//! - [`poller`] - periodic polling and publishing
//! - [`control`] - inbound event loop, override recovery, subscriptions
//! - [`discovery`] - autodiscovery descriptors

pub mod bridge;
pub mod commands;
pub mod config;
pub mod control;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod poller;
pub mod registers;
pub mod state;

pub use bridge::ZityBridge;
pub use config::ZityBridgeConfig;
pub use error::{GatewayError, SyncError};
pub use gateway::{ModbusBus, RegisterBus, RegisterGateway};

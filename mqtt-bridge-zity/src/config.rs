//! Configuration for the Zity bridge.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use zity_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, MqttConfig};

/// System register key holding the current system mode.
pub const SYSTEM_MODE_KEY: &str = "mode";
/// System register key used to write the system mode.
pub const SYSTEM_MODE_WRITE_KEY: &str = "mode_write";
/// System register key used to write the system power mode.
pub const SYSTEM_POWER_WRITE_KEY: &str = "power_mode_write";

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZityBridgeConfig {
    /// MQTT connection settings
    pub mqtt: MqttConfig,

    /// Modbus link settings
    pub modbus: ModbusConfig,

    /// Controller register map and behaviour
    pub zity: ZityConfig,

    /// Autodiscovery metadata publishing
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus slave ID of the controller (1-247)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Timeout of a single register read or write, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_slave_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl ModbusConfig {
    /// Timeout of a single register operation.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection (e.g. through a serial gateway)
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Controller register map and synchronization behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZityConfig {
    /// Register that must be written with `1` before every substantive write
    pub trigger_register: u16,

    /// Zone that claims the shared fan-mode register during a fan-mode change
    pub master_zone: String,

    /// Poll cycles after a command during which the zone is not checked for
    /// overrides and its commandable values are not republished
    #[serde(default = "default_latency")]
    pub latency: u32,

    /// Zones, in the order they are polled and claimed
    pub zones: Vec<ZoneConfig>,

    /// System-level registers by key
    pub system_registers: BTreeMap<String, u16>,

    /// Alarm registers
    #[serde(default)]
    pub alarms: Vec<AlarmConfig>,

    /// Delays and intervals
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_latency() -> u32 {
    2
}

/// Register map of a single zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone identifier (used in topics)
    pub id: String,
    /// Display name
    pub name: String,
    pub setpoint_read_register: u16,
    pub setpoint_write_register: u16,
    /// Zone power (0 = off)
    pub status_read_register: u16,
    pub status_write_register: u16,
    pub fan_mode_read_register: u16,
    pub fan_mode_write_register: u16,
    pub preset_mode_read_register: u16,
    pub preset_mode_write_register: u16,
    pub damper_status_read_register: u16,
    pub temp_read_register: u16,
    /// Selects which zone owns the fan-mode register
    pub master_slave_register: u16,
    pub fan_control_register: u16,
}

/// A named alarm register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub register: u16,
    pub name: String,
}

/// Delays and intervals of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay before the first poll cycle
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,

    /// Interval between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay before retrying after a failed Modbus (re)connect
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Settle delay after a trigger write
    #[serde(default = "default_trigger_settle")]
    pub trigger_settle_ms: u64,

    /// Settle delay between the writes of the fan-control claim sequence
    #[serde(default = "default_claim_settle")]
    pub claim_settle_ms: u64,

    /// How long retained override flags are collected after connecting
    #[serde(default = "default_override_recovery")]
    pub override_recovery_ms: u64,
}

fn default_startup_delay() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_trigger_settle() -> u64 {
    200
}

fn default_claim_settle() -> u64 {
    100
}

fn default_override_recovery() -> u64 {
    2000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: default_startup_delay(),
            poll_interval_secs: default_poll_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            trigger_settle_ms: default_trigger_settle(),
            claim_settle_ms: default_claim_settle(),
            override_recovery_ms: default_override_recovery(),
        }
    }
}

impl TimingConfig {
    /// All delays zero; used by tests.
    pub fn immediate() -> Self {
        Self {
            startup_delay_secs: 0,
            poll_interval_secs: 0,
            reconnect_delay_secs: 0,
            trigger_settle_ms: 0,
            claim_settle_ms: 0,
            override_recovery_ms: 0,
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn trigger_settle(&self) -> Duration {
        Duration::from_millis(self.trigger_settle_ms)
    }

    pub fn claim_settle(&self) -> Duration {
        Duration::from_millis(self.claim_settle_ms)
    }

    pub fn override_recovery(&self) -> Duration {
        Duration::from_millis(self.override_recovery_ms)
    }
}

/// Autodiscovery metadata settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Publish discovery descriptors on connect
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,

    /// Discovery topic prefix
    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,
}

fn default_discovery_enabled() -> bool {
    true
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            prefix: default_discovery_prefix(),
        }
    }
}

impl ZityConfig {
    /// Look up a zone by id.
    pub fn zone(&self, zone_id: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    /// Address of a system register by key.
    pub fn system_register(&self, key: &str) -> Option<u16> {
        self.system_registers.get(key).copied()
    }

    /// Address of the system mode register.
    pub fn system_mode_register(&self) -> u16 {
        self.required(SYSTEM_MODE_KEY)
    }

    /// Address of the system mode write register.
    pub fn system_mode_write_register(&self) -> u16 {
        self.required(SYSTEM_MODE_WRITE_KEY)
    }

    /// Address of the system power-mode write register.
    pub fn system_power_write_register(&self) -> u16 {
        self.required(SYSTEM_POWER_WRITE_KEY)
    }

    /// System registers that can be read, i.e. whose key does not designate
    /// a write-only address.
    pub fn readable_system_registers(&self) -> impl Iterator<Item = (&str, u16)> {
        self.system_registers
            .iter()
            .filter(|(key, _)| !is_write_key(key))
            .map(|(key, addr)| (key.as_str(), *addr))
    }

    // Presence of required keys is checked by `validate`.
    fn required(&self, key: &str) -> u16 {
        self.system_register(key).unwrap_or_default()
    }

    /// Validate the controller section.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.zones.is_empty() {
            return Err(BridgeError::validation(
                "At least one zone must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if zone.id.is_empty() || zone.id.contains(['/', '+', '#']) {
                return Err(BridgeError::validation(format!(
                    "Zone id '{}' must be non-empty and free of '/', '+' and '#'",
                    zone.id
                )));
            }
            if !seen.insert(zone.id.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate zone id '{}'",
                    zone.id
                )));
            }
        }

        if self.zone(&self.master_zone).is_none() {
            return Err(BridgeError::validation(format!(
                "master_zone '{}' is not a configured zone",
                self.master_zone
            )));
        }

        for key in [SYSTEM_MODE_KEY, SYSTEM_MODE_WRITE_KEY, SYSTEM_POWER_WRITE_KEY] {
            if !self.system_registers.contains_key(key) {
                return Err(BridgeError::validation(format!(
                    "system_registers must define '{}'",
                    key
                )));
            }
        }

        Ok(())
    }
}

/// Whether a system register key designates a write-only address.
pub fn is_write_key(key: &str) -> bool {
    key.contains("write")
}

impl BridgeConfig for ZityBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.modbus.slave_id == 0 || self.modbus.slave_id > 247 {
            return Err(BridgeError::validation("modbus.slave_id must be 1-247"));
        }

        if let ConnectionConfig::Rtu { parity, .. } = &self.modbus.connection {
            match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(BridgeError::validation(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            }
        }

        self.zity.validate()
    }
}

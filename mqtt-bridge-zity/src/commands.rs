//! Command Handler.
//!
//! Applies inbound control-plane commands to the controller. Every command
//! that touches the device primes it with a trigger write first, then writes
//! the payload and records it as commanded in one critical section, and
//! finally echoes the accepted value once the store lock is released.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use zity_bridge_framework::Publisher;
use zity_common::topic::{
    self, ParsedTopic, SET_FAN_MODE, SET_MANUAL_OVERRIDE, SET_MODE, SET_POWER, SET_PRESET_MODE,
    SET_TEMP,
};
use zity_common::TopicBuilder;

use crate::config::{ZityConfig, ZoneConfig};
use crate::error::{Result, SyncError};
use crate::gateway::RegisterGateway;
use crate::registers::{self, MODE_OFF, PRESET_ECO, PRESET_NONE, SYSTEM_MODES};
use crate::state::{Commanded, ZoneStateStore};

/// Leaf of a zone's override flag topic.
pub const MANUAL_OVERRIDE: &str = "manual_override";

/// Payload of an active override flag.
pub const OVERRIDE_ON: &str = "ON";
/// Payload of an inactive override flag.
pub const OVERRIDE_OFF: &str = "OFF";

/// Render an override flag.
pub fn override_payload(active: bool) -> &'static str {
    if active { OVERRIDE_ON } else { OVERRIDE_OFF }
}

/// Parse an override flag, case-insensitively.
pub fn parse_override(payload: &str) -> Option<bool> {
    let payload = payload.trim();
    if payload.eq_ignore_ascii_case(OVERRIDE_ON) {
        Some(true)
    } else if payload.eq_ignore_ascii_case(OVERRIDE_OFF) {
        Some(false)
    } else {
        None
    }
}

/// Per-zone actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneAction {
    SetTemperature,
    SetMode,
    SetFanMode,
    SetPresetMode,
    SetManualOverride,
}

/// System-wide actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    SetMode,
    SetPower,
}

/// A command addressed by its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Zone { zone_id: String, action: ZoneAction },
    System(SystemAction),
}

impl Command {
    /// Map a topic to a command. Topics that are not commands yield `None`.
    pub fn parse(topics: &TopicBuilder, topic: &str) -> Option<Self> {
        match topics.parse(topic).ok()? {
            ParsedTopic::Zone { zone_id, leaf } => {
                let action = match leaf.as_str() {
                    SET_TEMP => ZoneAction::SetTemperature,
                    SET_MODE => ZoneAction::SetMode,
                    SET_FAN_MODE => ZoneAction::SetFanMode,
                    SET_PRESET_MODE => ZoneAction::SetPresetMode,
                    SET_MANUAL_OVERRIDE => ZoneAction::SetManualOverride,
                    _ => return None,
                };
                Some(Command::Zone { zone_id, action })
            }
            ParsedTopic::System { leaf } => match leaf.as_str() {
                SET_MODE => Some(Command::System(SystemAction::SetMode)),
                SET_POWER => Some(Command::System(SystemAction::SetPower)),
                _ => None,
            },
        }
    }
}

/// Applies commands to the device and the state store.
#[derive(Clone)]
pub struct CommandHandler {
    config: Arc<ZityConfig>,
    gateway: Arc<RegisterGateway>,
    store: Arc<ZoneStateStore>,
    publisher: Publisher,
    topics: TopicBuilder,
}

impl CommandHandler {
    pub fn new(
        config: Arc<ZityConfig>,
        gateway: Arc<RegisterGateway>,
        store: Arc<ZoneStateStore>,
        publisher: Publisher,
        topics: TopicBuilder,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            publisher,
            topics,
        }
    }

    /// Handle one inbound message, logging any failure.
    ///
    /// Messages on unknown topics or for unknown zones are ignored.
    pub async fn handle(&self, topic: &str, payload: &str) {
        let Some(command) = Command::parse(&self.topics, topic) else {
            debug!(topic = %topic, "Ignoring message on non-command topic");
            return;
        };

        match self.execute(&command, payload).await {
            Ok(()) => {}
            Err(SyncError::UnknownTarget(target)) => {
                debug!(topic = %topic, target = %target, "Ignoring command for unknown target");
            }
            Err(e @ SyncError::Validation { .. }) => {
                warn!(topic = %topic, error = %e, "Rejected command");
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Command failed");
            }
        }
    }

    /// Execute a parsed command.
    pub async fn execute(&self, command: &Command, payload: &str) -> Result<()> {
        let payload = payload.trim();
        match command {
            Command::Zone { zone_id, action } => {
                if self.config.zone(zone_id).is_none() {
                    return Err(SyncError::UnknownTarget(format!("zone '{}'", zone_id)));
                }
                match action {
                    ZoneAction::SetTemperature => self.set_temperature(zone_id, payload).await,
                    ZoneAction::SetMode => self.set_mode(zone_id, payload).await,
                    ZoneAction::SetFanMode => self.set_fan_mode(zone_id, payload).await,
                    ZoneAction::SetPresetMode => self.set_preset_mode(zone_id, payload).await,
                    ZoneAction::SetManualOverride => {
                        self.set_manual_override(zone_id, payload).await
                    }
                }
            }
            Command::System(SystemAction::SetMode) => self.set_system_mode(payload).await,
            Command::System(SystemAction::SetPower) => self.set_power(payload).await,
        }
    }

    /// Write a register and record the commanded value atomically.
    async fn write_commanded(
        &self,
        zone_id: &str,
        address: u16,
        value: u16,
        commanded: Commanded,
    ) -> Result<()> {
        let mut state = self.store.lock().await;
        self.gateway.write_register(address, value).await?;
        state.set_commanded(zone_id, commanded)
    }

    async fn set_temperature(&self, zone_id: &str, payload: &str) -> Result<()> {
        let celsius: f64 = payload
            .parse()
            .map_err(|_| SyncError::validation(SET_TEMP, payload, "not a number"))?;
        let tenths = registers::celsius_to_tenths(celsius)
            .ok_or_else(|| SyncError::validation(SET_TEMP, payload, "out of register range"))?;
        let address = self.zone_register(zone_id, |z| z.setpoint_write_register)?;

        self.gateway.prime().await?;
        // Record what the device holds, so the read-back compares equal
        let commanded = f64::from(tenths) / 10.0;
        self.write_commanded(zone_id, address, tenths, Commanded::Temperature(commanded))
            .await?;

        self.publisher
            .publish_state(&self.topics.zone(zone_id, "setpoint"), celsius)
            .await?;
        info!(zone = %zone_id, setpoint = celsius, "Setpoint set");
        Ok(())
    }

    async fn set_mode(&self, zone_id: &str, payload: &str) -> Result<()> {
        let address = self.zone_register(zone_id, |z| z.status_write_register)?;

        let (value, mode) = if payload.eq_ignore_ascii_case(MODE_OFF) {
            (0, MODE_OFF)
        } else {
            // Powering a zone on resumes whatever the system is doing
            let system_mode = self
                .gateway
                .read_register(self.config.system_mode_register())
                .await?;
            (1, registers::mode_name(system_mode)?)
        };

        self.gateway.prime().await?;
        self.write_commanded(zone_id, address, value, Commanded::Mode(mode.to_string()))
            .await?;

        self.publisher
            .publish_state(&self.topics.zone(zone_id, "mode"), mode)
            .await?;
        info!(zone = %zone_id, mode = %mode, "Mode set");
        Ok(())
    }

    async fn set_fan_mode(&self, zone_id: &str, payload: &str) -> Result<()> {
        let fan_mode = payload.to_lowercase();
        let value = registers::fan_mode_ordinal(&fan_mode).ok_or_else(|| {
            SyncError::validation(SET_FAN_MODE, payload, "expected auto, low, medium or high")
        })?;
        let address = self.zone_register(zone_id, |z| z.fan_mode_write_register)?;

        self.gateway.prime().await?;
        self.gateway
            .claim_fan_control(&self.config.zones, &self.config.master_zone)
            .await?;
        self.write_commanded(zone_id, address, value, Commanded::FanMode(fan_mode.clone()))
            .await?;

        self.publisher
            .publish_state(&self.topics.zone(zone_id, "fan_mode"), &fan_mode)
            .await?;
        info!(zone = %zone_id, fan_mode = %fan_mode, "Fan mode set");
        Ok(())
    }

    async fn set_preset_mode(&self, zone_id: &str, payload: &str) -> Result<()> {
        let (value, preset) = if payload.eq_ignore_ascii_case(PRESET_NONE) {
            (0, PRESET_NONE)
        } else {
            (1, PRESET_ECO)
        };
        let address = self.zone_register(zone_id, |z| z.preset_mode_write_register)?;

        self.gateway.prime().await?;
        self.write_commanded(
            zone_id,
            address,
            value,
            Commanded::PresetMode(preset.to_string()),
        )
        .await?;

        self.publisher
            .publish_state(&self.topics.zone(zone_id, "preset_mode"), preset)
            .await?;
        info!(zone = %zone_id, preset_mode = %preset, "Preset mode set");
        Ok(())
    }

    async fn set_manual_override(&self, zone_id: &str, payload: &str) -> Result<()> {
        let active = parse_override(payload)
            .ok_or_else(|| SyncError::validation(SET_MANUAL_OVERRIDE, payload, "expected ON or OFF"))?;

        self.store.lock().await.set_override(zone_id, active)?;

        self.publisher
            .publish_state(
                &self.topics.zone(zone_id, MANUAL_OVERRIDE),
                override_payload(active),
            )
            .await?;
        info!(zone = %zone_id, state = override_payload(active), "Manual override set");
        Ok(())
    }

    async fn set_system_mode(&self, payload: &str) -> Result<()> {
        let mode = payload.to_lowercase();
        let value = SYSTEM_MODES
            .contains(&mode.as_str())
            .then(|| registers::mode_ordinal(&mode))
            .flatten()
            .ok_or_else(|| {
                SyncError::validation(
                    "system set_mode",
                    payload,
                    format!("expected one of {}", SYSTEM_MODES.join(", ")),
                )
            })?;

        self.gateway.prime().await?;
        let updated = {
            let mut state = self.store.lock().await;
            self.gateway
                .write_register(self.config.system_mode_write_register(), value)
                .await?;
            state.set_system_mode(mode.as_str());
            state.propagate_system_mode(&mode)
        };

        self.publisher
            .publish_state(&self.topics.system("mode"), &mode)
            .await?;
        info!(mode = %mode, "System mode set");

        for zone in &self.config.zones {
            if updated.contains(&zone.id) {
                self.publisher
                    .publish_state_logged(&self.topics.zone(&zone.id, "mode"), &mode)
                    .await;
                info!(zone = %zone.id, mode = %mode, "Mode follows system");
            } else {
                info!(zone = %zone.id, "Zone is switched off; remains off");
            }
        }
        Ok(())
    }

    async fn set_power(&self, payload: &str) -> Result<()> {
        let power = payload.to_lowercase();
        let value = match power.as_str() {
            "on" => 1,
            "off" => 0,
            _ => return Err(SyncError::validation(SET_POWER, payload, "expected on or off")),
        };

        self.gateway.prime().await?;
        {
            let mut state = self.store.lock().await;
            self.gateway
                .write_register(self.config.system_power_write_register(), value)
                .await?;
            state.set_system_power(power.as_str());
        }

        self.publisher
            .publish_state(&self.topics.system("power_mode"), &power)
            .await?;
        info!(power_mode = %power, "System power mode set");
        Ok(())
    }

    fn zone_register(
        &self,
        zone_id: &str,
        register: impl FnOnce(&ZoneConfig) -> u16,
    ) -> Result<u16> {
        self.config
            .zone(zone_id)
            .map(register)
            .ok_or_else(|| SyncError::UnknownTarget(format!("zone '{}'", zone_id)))
    }
}

/// Topic filters of every command the bridge accepts.
pub fn command_topics(topics: &TopicBuilder, config: &ZityConfig) -> Vec<String> {
    let mut filters: Vec<String> = config
        .zones
        .iter()
        .flat_map(|zone| {
            topic::ZONE_COMMANDS
                .iter()
                .map(move |leaf| topics.zone(&zone.id, leaf))
        })
        .collect();
    filters.extend(topic::SYSTEM_COMMANDS.iter().map(|leaf| topics.system(leaf)));
    filters
}

//! Autodiscovery descriptors.
//!
//! Each zone is announced as a climate device with companion sensors and an
//! override switch; the controller itself carries the system registers and
//! alarms. Descriptors are plain values, published retained on connect.

use serde_json::{Value, json};
use zity_common::TopicBuilder;

use crate::commands::{MANUAL_OVERRIDE, OVERRIDE_OFF, OVERRIDE_ON};
use crate::config::{AlarmConfig, ZityConfig, ZoneConfig, is_write_key};
use crate::registers::SYSTEM_MODES;

const CONTROLLER_ID: &str = "zity_controller";
const MANUFACTURER: &str = "Madel";
const MODEL: &str = "Zity 2.0";

/// Setpoint range offered to the user, °C.
const MIN_SETPOINT: f64 = 16.5;
const MAX_SETPOINT: f64 = 30.0;
const SETPOINT_STEP: f64 = 0.5;

/// A retained discovery message.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEntry {
    pub topic: String,
    pub payload: Value,
}

/// Builds discovery descriptors for one bridge.
#[derive(Debug, Clone)]
pub struct Discovery {
    prefix: String,
    topics: TopicBuilder,
}

impl Discovery {
    pub fn new(prefix: impl Into<String>, topics: TopicBuilder) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            topics,
        }
    }

    /// All descriptors of the configured controller.
    pub fn entries(&self, config: &ZityConfig) -> Vec<DiscoveryEntry> {
        let mut entries: Vec<DiscoveryEntry> = config
            .zones
            .iter()
            .flat_map(|zone| self.zone_entries(zone))
            .collect();
        entries.extend(self.system_entries(config));
        entries.extend(config.alarms.iter().map(|alarm| self.alarm_entry(alarm)));
        entries
    }

    fn entry(&self, component: &str, object_id: &str, payload: Value) -> DiscoveryEntry {
        DiscoveryEntry {
            topic: format!("{}/{}/{}/config", self.prefix, component, object_id),
            payload,
        }
    }

    /// Climate, damper, temperature, setpoint and override entities of a zone.
    pub fn zone_entries(&self, zone: &ZoneConfig) -> Vec<DiscoveryEntry> {
        let id = zone.id.as_str();
        let object_id = format!("zity_zone_{}", id);
        let topic = |leaf: &str| self.topics.zone(id, leaf);
        let device = zone_device(zone);

        let climate = json!({
            "name": format!("Airco {}", zone.name),
            "unique_id": object_id,
            "mode_command_topic": topic("set_mode"),
            "mode_state_topic": topic("mode"),
            "temperature_command_topic": topic("set_temp"),
            "temperature_state_topic": topic("setpoint"),
            "current_temperature_topic": topic("temp"),
            "fan_mode_command_topic": topic("set_fan_mode"),
            "fan_mode_state_topic": topic("fan_mode"),
            "preset_mode_command_topic": topic("set_preset_mode"),
            "preset_mode_state_topic": topic("preset_mode"),
            "min_temp": MIN_SETPOINT,
            "max_temp": MAX_SETPOINT,
            "temp_step": SETPOINT_STEP,
            "modes": SYSTEM_MODES,
            "preset_modes": ["eco"],
            "precision": 0.1,
            "optimistic": true,
            "icon": "mdi:air-conditioner",
            "device": device,
        });

        let damper = json!({
            "name": format!("{} Damper", zone.name),
            "unique_id": format!("{}_damper", object_id),
            "state_topic": topic("damper_status"),
            "payload_on": "open",
            "payload_off": "closed",
            "device_class": "running",
            "device": device,
        });

        let current_temperature = json!({
            "name": format!("{} Current Temperature", zone.name),
            "unique_id": format!("{}_current_temperature", object_id),
            "state_topic": topic("temp"),
            "device_class": "temperature",
            "unit_of_measurement": "°C",
            "device": device,
        });

        let setpoint = json!({
            "name": format!("{} Setpoint", zone.name),
            "unique_id": format!("{}_setpoint", object_id),
            "state_topic": topic("setpoint"),
            "device_class": "temperature",
            "unit_of_measurement": "°C",
            "device": device,
        });

        let manual_override = json!({
            "name": format!("{} Manual Override", zone.name),
            "unique_id": format!("{}_manual_override", object_id),
            "state_topic": topic(MANUAL_OVERRIDE),
            "command_topic": topic("set_manual_override"),
            "payload_on": OVERRIDE_ON,
            "payload_off": OVERRIDE_OFF,
            "state_on": OVERRIDE_ON,
            "state_off": OVERRIDE_OFF,
            "icon": "mdi:account-edit",
            "optimistic": false,
            "device": device,
        });

        vec![
            self.entry("climate", &object_id, climate),
            self.entry("binary_sensor", &format!("{}_damper", object_id), damper),
            self.entry(
                "sensor",
                &format!("{}_current_temperature", object_id),
                current_temperature,
            ),
            self.entry("sensor", &format!("{}_setpoint", object_id), setpoint),
            self.entry(
                "switch",
                &format!("{}_manual_override", object_id),
                manual_override,
            ),
        ]
    }

    /// One entity per readable system register, plus the system mode select.
    pub fn system_entries(&self, config: &ZityConfig) -> Vec<DiscoveryEntry> {
        let mut entries: Vec<DiscoveryEntry> = config
            .system_registers
            .keys()
            .filter(|key| !is_write_key(key))
            .map(|key| self.system_register_entry(key))
            .collect();

        let select = json!({
            "name": "Zity System Mode",
            "unique_id": "zity_system_mode_select",
            "command_topic": self.topics.system("set_mode"),
            "state_topic": self.topics.system("mode"),
            "options": SYSTEM_MODES,
            "optimistic": true,
            "device": controller_device(),
        });
        entries.push(self.entry("select", "zity_system_mode", select));
        entries
    }

    fn system_register_entry(&self, key: &str) -> DiscoveryEntry {
        let object_id = format!("zity_system_{}", key);
        let mut payload = json!({
            "name": format!("Zity System {}", title_case(key)),
            "unique_id": object_id,
            "state_topic": self.topics.system(key),
            "device": controller_device(),
        });

        if key.contains("temp") || key.contains("setpoint") {
            payload["unit_of_measurement"] = json!("°C");
        }

        let component = match key {
            "power_mode" => {
                payload["command_topic"] = json!(self.topics.system("set_power"));
                payload["payload_on"] = json!("on");
                payload["payload_off"] = json!("off");
                "switch"
            }
            "controller_mode" => {
                payload["payload_on"] = json!("on");
                payload["payload_off"] = json!("off");
                "binary_sensor"
            }
            _ => "sensor",
        };

        self.entry(component, &object_id, payload)
    }

    /// Problem sensor of an alarm register.
    pub fn alarm_entry(&self, alarm: &AlarmConfig) -> DiscoveryEntry {
        let object_id = format!("zity_alarm_{}", alarm.name);
        let payload = json!({
            "name": format!("Zity Alarm {}", title_case(&alarm.name)),
            "unique_id": object_id,
            "state_topic": self.topics.alarm(alarm.register),
            "payload_on": "1",
            "payload_off": "0",
            "device_class": "problem",
            "device": controller_device(),
        });
        self.entry("binary_sensor", &object_id, payload)
    }
}

fn zone_device(zone: &ZoneConfig) -> Value {
    json!({
        "identifiers": [format!("zity_zone_{}", zone.id)],
        "name": format!("Zity Zone {}", zone.name),
        "manufacturer": MANUFACTURER,
        "model": MODEL,
        "via_device": CONTROLLER_ID,
    })
}

fn controller_device() -> Value {
    json!({
        "identifiers": [CONTROLLER_ID],
        "name": "Zity Controller",
        "manufacturer": MANUFACTURER,
        "model": MODEL,
    })
}

/// `flexi_fan_mode` -> `Flexi Fan Mode`
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

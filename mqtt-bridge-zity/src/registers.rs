//! Register value tables and decoding rules of the Zity controller.

use crate::error::SyncError;

/// Mode names by register ordinal. Empty entries are unused ordinals.
pub const MODE_TABLE: [&str; 15] = [
    "off", "heat", "heat", "cool", "cool", "", "", "", "", "fan_only", "", "", "", "", "dry",
];

/// Zone fan modes by register ordinal.
pub const FAN_MODE_TABLE: [&str; 4] = ["auto", "low", "medium", "high"];

/// System fan speeds by register ordinal.
pub const SYSTEM_FAN_SPEED_TABLE: [&str; 5] = ["off", "low", "medium", "high", "very high"];

/// Modes accepted by the system `set_mode` command.
pub const SYSTEM_MODES: [&str; 5] = ["off", "cool", "heat", "dry", "fan_only"];

/// Mode of a zone that is switched off.
pub const MODE_OFF: &str = "off";
/// Preset reported when the preset register is non-zero.
pub const PRESET_ECO: &str = "eco";
/// Preset reported when the preset register is zero.
pub const PRESET_NONE: &str = "none";

/// Published in place of an implausible system temperature or setpoint.
pub const FALLBACK_TEMPERATURE: u16 = 21;

/// Lower bound (exclusive) of a trustworthy temperature, in °C.
pub const MIN_PLAUSIBLE_TEMP: f64 = 10.0;
/// Upper bound (exclusive) of a trustworthy temperature, in °C.
pub const MAX_PLAUSIBLE_TEMP: f64 = 50.0;

/// Whether a temperature or setpoint reading can be trusted.
///
/// The controller emits garbage for a short while after power-on.
pub fn is_plausible(celsius: f64) -> bool {
    celsius > MIN_PLAUSIBLE_TEMP && celsius < MAX_PLAUSIBLE_TEMP
}

/// Convert a register value in tenths of a degree to °C.
pub fn tenths_to_celsius(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

/// Convert °C to register units, truncating below a tenth.
pub fn celsius_to_tenths(celsius: f64) -> Option<u16> {
    let tenths = (celsius * 10.0).trunc();
    if tenths.is_finite() && tenths >= 0.0 && tenths <= f64::from(u16::MAX) {
        Some(tenths as u16)
    } else {
        None
    }
}

/// Format a temperature the way it is published, e.g. `22.0`.
pub fn format_celsius(celsius: f64) -> String {
    format!("{:.1}", celsius)
}

fn lookup(table: &'static [&'static str], name: &'static str, raw: u16) -> Result<&'static str, SyncError> {
    match table.get(usize::from(raw)) {
        Some(value) if !value.is_empty() => Ok(*value),
        _ => Err(SyncError::Decode { table: name, value: raw }),
    }
}

/// Resolve a mode ordinal.
pub fn mode_name(raw: u16) -> Result<&'static str, SyncError> {
    lookup(&MODE_TABLE, "mode", raw)
}

/// Resolve the mode of a zone: `off` when the zone is powered down,
/// otherwise the system mode.
pub fn zone_mode_name(power: u16, system_mode: u16) -> Result<&'static str, SyncError> {
    if power == 0 {
        Ok(MODE_OFF)
    } else {
        mode_name(system_mode)
    }
}

/// Ordinal of a mode name; the first matching entry wins.
pub fn mode_ordinal(name: &str) -> Option<u16> {
    MODE_TABLE
        .iter()
        .position(|m| !m.is_empty() && *m == name)
        .map(|i| i as u16)
}

/// Resolve a zone fan-mode ordinal.
pub fn fan_mode_name(raw: u16) -> Result<&'static str, SyncError> {
    lookup(&FAN_MODE_TABLE, "fan mode", raw)
}

/// Ordinal of a zone fan-mode name.
pub fn fan_mode_ordinal(name: &str) -> Option<u16> {
    FAN_MODE_TABLE.iter().position(|m| *m == name).map(|i| i as u16)
}

/// Resolve a preset register value.
pub fn preset_name(raw: u16) -> &'static str {
    if raw == 0 { PRESET_NONE } else { PRESET_ECO }
}

/// How a readable system register is displayed, derived from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRegisterKind {
    /// Tenths of a degree; implausible values become the fallback.
    Temperature,
    /// Whole degrees; implausible values become the fallback.
    Setpoint,
    /// Mode table ordinal.
    Mode,
    /// `on` when 1, else `off`.
    OnOff,
    /// Zone fan-mode table ordinal.
    FanMode,
    /// System fan-speed table ordinal.
    FanSpeed,
    /// Raw integer.
    Raw,
}

impl SystemRegisterKind {
    /// Classify a register by its configuration key.
    pub fn from_key(key: &str) -> Self {
        if key.contains("temp") {
            Self::Temperature
        } else if key == "setpoint" {
            Self::Setpoint
        } else if key == "mode" {
            Self::Mode
        } else if key == "power_mode" || key == "controller_mode" {
            Self::OnOff
        } else if key.contains("flexi") {
            Self::FanMode
        } else if key == "fan_speed" {
            Self::FanSpeed
        } else {
            Self::Raw
        }
    }

    /// Render a raw register value for publication.
    pub fn display(self, raw: u16) -> Result<String, SyncError> {
        let value = match self {
            Self::Temperature => {
                let celsius = tenths_to_celsius(raw);
                if is_plausible(celsius) {
                    format_celsius(celsius)
                } else {
                    FALLBACK_TEMPERATURE.to_string()
                }
            }
            Self::Setpoint => {
                if is_plausible(f64::from(raw)) {
                    raw.to_string()
                } else {
                    FALLBACK_TEMPERATURE.to_string()
                }
            }
            Self::Mode => mode_name(raw)?.to_string(),
            Self::OnOff => if raw == 1 { "on" } else { "off" }.to_string(),
            Self::FanMode => fan_mode_name(raw)?.to_string(),
            Self::FanSpeed => lookup(&SYSTEM_FAN_SPEED_TABLE, "fan speed", raw)?.to_string(),
            Self::Raw => raw.to_string(),
        };
        Ok(value)
    }
}

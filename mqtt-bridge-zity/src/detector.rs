//! Override Detector.
//!
//! Compares a freshly polled zone against the values the bridge last
//! commanded. Pure; the poller decides when a comparison may run.

use std::fmt;

use crate::registers::{self, is_plausible};
use crate::state::{Baseline, ZoneState};

/// One poll of a zone, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledZone {
    /// Current temperature, °C.
    pub temperature: f64,
    /// Setpoint, °C.
    pub setpoint: f64,
    pub damper_open: bool,
    pub power: bool,
    /// `None` when the system mode ordinal has no table entry.
    pub mode: Option<&'static str>,
    /// `None` when the fan-mode ordinal has no table entry.
    pub fan_mode: Option<&'static str>,
    pub preset_mode: &'static str,
}

impl PolledZone {
    /// Decode raw register values.
    ///
    /// `system_mode` is the system mode ordinal read at the start of the
    /// cycle. Table fields that cannot be resolved are left unknown; the
    /// rest of the zone still decodes.
    pub fn decode(raw: &RawZoneRegisters, system_mode: u16) -> Self {
        Self {
            temperature: registers::tenths_to_celsius(raw.temperature),
            setpoint: registers::tenths_to_celsius(raw.setpoint),
            damper_open: raw.damper != 0,
            power: raw.power != 0,
            mode: registers::zone_mode_name(raw.power, system_mode).ok(),
            fan_mode: registers::fan_mode_name(raw.fan_mode).ok(),
            preset_mode: registers::preset_name(raw.preset_mode),
        }
    }

    /// Whether both temperature and setpoint can be trusted.
    pub fn is_valid(&self) -> bool {
        is_plausible(self.temperature) && is_plausible(self.setpoint)
    }

    /// The commandable values of this poll, as a new baseline.
    pub fn baseline(&self) -> Baseline {
        Baseline {
            setpoint: self.setpoint,
            mode: self.mode.map(str::to_string),
            fan_mode: self.fan_mode.map(str::to_string),
            preset_mode: self.preset_mode.to_string(),
        }
    }
}

/// Raw register values of one zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawZoneRegisters {
    pub temperature: u16,
    pub setpoint: u16,
    pub damper: u16,
    pub power: u16,
    pub fan_mode: u16,
    pub preset_mode: u16,
}

/// A commandable zone field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Setpoint,
    Mode,
    FanMode,
    PresetMode,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Setpoint => "setpoint",
            Field::Mode => "mode",
            Field::FanMode => "fan mode",
            Field::PresetMode => "preset mode",
        };
        f.write_str(name)
    }
}

/// A field whose polled value differs from the commanded one.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub field: Field,
    pub commanded: String,
    pub observed: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.commanded, self.observed)
    }
}

// Setpoints live in tenths of a degree on the device.
fn same_setpoint(a: f64, b: f64) -> bool {
    (a * 10.0).round() == (b * 10.0).round()
}

/// Compare polled values against the commanded state.
///
/// A field that was never commanded or baselined, or that could not be
/// decoded this cycle, is not compared.
pub fn detect(commanded: &ZoneState, polled: &PolledZone) -> Vec<Divergence> {
    let mut found = Vec::new();

    if let Some(temp) = commanded
        .last_commanded_temp
        .filter(|temp| !same_setpoint(*temp, polled.setpoint))
    {
        found.push(Divergence {
            field: Field::Setpoint,
            commanded: registers::format_celsius(temp),
            observed: registers::format_celsius(polled.setpoint),
        });
    }

    let text_fields = [
        (Field::Mode, &commanded.last_commanded_mode, polled.mode),
        (Field::FanMode, &commanded.last_commanded_fan_mode, polled.fan_mode),
        (
            Field::PresetMode,
            &commanded.last_commanded_preset_mode,
            Some(polled.preset_mode),
        ),
    ];

    for (field, stored, observed) in text_fields {
        let Some(observed) = observed else {
            continue;
        };
        if let Some(stored) = stored.as_ref().filter(|stored| stored.as_str() != observed) {
            found.push(Divergence {
                field,
                commanded: stored.clone(),
                observed: observed.to_string(),
            });
        }
    }

    found
}

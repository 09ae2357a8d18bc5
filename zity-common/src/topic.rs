//! Topic builders and parsers for the bridge's topic tree.
//!
//! ```text
//! <base>/zone/<zone_id>/<leaf>
//! <base>/system/<leaf>
//! <base>/bridge/status
//! ```

use crate::error::{Error, Result};

/// Leaf of the zone setpoint command topic.
pub const SET_TEMP: &str = "set_temp";
/// Leaf of the zone and system mode command topics.
pub const SET_MODE: &str = "set_mode";
/// Leaf of the zone fan-mode command topic.
pub const SET_FAN_MODE: &str = "set_fan_mode";
/// Leaf of the zone preset-mode command topic.
pub const SET_PRESET_MODE: &str = "set_preset_mode";
/// Leaf of the zone manual-override command topic.
pub const SET_MANUAL_OVERRIDE: &str = "set_manual_override";
/// Leaf of the system power command topic.
pub const SET_POWER: &str = "set_power";

/// Leaves of all per-zone command topics.
pub const ZONE_COMMANDS: [&str; 5] = [
    SET_TEMP,
    SET_MODE,
    SET_FAN_MODE,
    SET_PRESET_MODE,
    SET_MANUAL_OVERRIDE,
];

/// Leaves of all system command topics.
pub const SYSTEM_COMMANDS: [&str; 2] = [SET_MODE, SET_POWER];

/// Builder for topics below a base prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    base: String,
}

impl TopicBuilder {
    /// Create a builder for the given base topic.
    ///
    /// Trailing slashes are stripped.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The base topic.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Topic of a zone value, e.g. `zity/zone/1/setpoint`.
    ///
    /// # Example
    /// ```
    /// use zity_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("zity");
    /// assert_eq!(topics.zone("1", "setpoint"), "zity/zone/1/setpoint");
    /// ```
    pub fn zone(&self, zone_id: &str, leaf: &str) -> String {
        format!("{}/zone/{}/{}", self.base, zone_id, leaf)
    }

    /// Topic of a system value, e.g. `zity/system/mode`.
    pub fn system(&self, leaf: &str) -> String {
        format!("{}/system/{}", self.base, leaf)
    }

    /// Topic of an alarm register, e.g. `zity/system/alarm_1200`.
    pub fn alarm(&self, register: u16) -> String {
        format!("{}/system/alarm_{}", self.base, register)
    }

    /// Retained availability topic of the bridge itself.
    pub fn bridge_status(&self) -> String {
        format!("{}/bridge/status", self.base)
    }

    /// Parse a topic below this builder's base.
    ///
    /// # Example
    /// ```
    /// use zity_common::topic::{ParsedTopic, TopicBuilder};
    ///
    /// let topics = TopicBuilder::new("zity");
    /// let parsed = topics.parse("zity/zone/2/set_temp").unwrap();
    /// assert_eq!(parsed, ParsedTopic::Zone { zone_id: "2".into(), leaf: "set_temp".into() });
    /// ```
    pub fn parse(&self, topic: &str) -> Result<ParsedTopic> {
        let rest = topic
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::Topic(format!("'{}' is not below '{}'", topic, self.base)))?;

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            ["zone", zone_id, leaf] if !zone_id.is_empty() && !leaf.is_empty() => {
                Ok(ParsedTopic::Zone {
                    zone_id: zone_id.to_string(),
                    leaf: leaf.to_string(),
                })
            }
            ["system", leaf] if !leaf.is_empty() => Ok(ParsedTopic::System {
                leaf: leaf.to_string(),
            }),
            _ => Err(Error::Topic(format!("unrecognised topic '{}'", topic))),
        }
    }
}

/// A topic split into its addressing parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTopic {
    /// `<base>/zone/<zone_id>/<leaf>`
    Zone { zone_id: String, leaf: String },
    /// `<base>/system/<leaf>`
    System { leaf: String },
}

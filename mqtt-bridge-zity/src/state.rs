//! Zone State Store.
//!
//! Holds, per zone, the last values the bridge commanded or accepted as
//! ground truth, together with the postponement counter and the override
//! flags. All access goes through one lock; see [`ZoneStateStore::lock`].

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, SyncError};

/// Per-zone synchronization state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneState {
    /// Last setpoint written or accepted as ground truth, in °C.
    pub last_commanded_temp: Option<f64>,
    pub last_commanded_mode: Option<String>,
    pub last_commanded_fan_mode: Option<String>,
    pub last_commanded_preset_mode: Option<String>,
    /// Poll cycles left during which the zone is neither checked nor
    /// republished.
    pub postpone_counter: u32,
    /// A local change on the device was detected or declared.
    pub manual_override: bool,
    /// The next valid poll re-baselines instead of comparing.
    pub pending_reset: bool,
}

/// A commandable zone field with its new value.
#[derive(Debug, Clone, PartialEq)]
pub enum Commanded {
    Temperature(f64),
    Mode(String),
    FanMode(String),
    PresetMode(String),
}

/// Values accepted as the new commanded baseline of a zone.
///
/// A `None` field could not be decoded and keeps its previous value.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub setpoint: f64,
    pub mode: Option<String>,
    pub fan_mode: Option<String>,
    pub preset_mode: String,
}

/// System-wide state as last commanded or observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemState {
    pub mode: Option<String>,
    pub power_mode: Option<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    zones: HashMap<String, ZoneState>,
    system: SystemState,
    first_poll_completed: bool,
}

/// The process-wide state store.
#[derive(Debug)]
pub struct ZoneStateStore {
    inner: Mutex<StoreInner>,
    latency: u32,
}

impl ZoneStateStore {
    /// Create a store with one empty entry per zone.
    ///
    /// `latency` is the postponement window set by every accepted command.
    pub fn new<I, S>(zone_ids: I, latency: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let zones = zone_ids
            .into_iter()
            .map(|id| (id.into(), ZoneState::default()))
            .collect();

        Self {
            inner: Mutex::new(StoreInner {
                zones,
                ..Default::default()
            }),
            latency,
        }
    }

    /// The configured postponement window.
    pub fn latency(&self) -> u32 {
        self.latency
    }

    /// Acquire the store lock.
    ///
    /// Hold the guard only around state access and the device I/O that must
    /// appear atomic with it; never across a publish.
    pub async fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            inner: self.inner.lock().await,
            latency: self.latency,
        }
    }

    /// Snapshot of one zone, taking the lock briefly.
    pub async fn get(&self, zone_id: &str) -> Result<ZoneState> {
        self.lock().await.get(zone_id)
    }

    /// Whether the first full poll cycle has completed.
    pub async fn first_poll_completed(&self) -> bool {
        self.lock().await.first_poll_completed()
    }
}

/// Exclusive access to the store.
pub struct StateGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
    latency: u32,
}

impl StateGuard<'_> {
    fn zone_mut(&mut self, zone_id: &str) -> Result<&mut ZoneState> {
        self.inner
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| SyncError::UnknownTarget(format!("zone '{}'", zone_id)))
    }

    /// Snapshot of one zone.
    pub fn get(&self, zone_id: &str) -> Result<ZoneState> {
        self.inner
            .zones
            .get(zone_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownTarget(format!("zone '{}'", zone_id)))
    }

    /// Record a commanded value and restart the zone's postponement window.
    pub fn set_commanded(&mut self, zone_id: &str, value: Commanded) -> Result<()> {
        let latency = self.latency;
        let zone = self.zone_mut(zone_id)?;

        match value {
            Commanded::Temperature(t) => zone.last_commanded_temp = Some(t),
            Commanded::Mode(m) => zone.last_commanded_mode = Some(m),
            Commanded::FanMode(m) => zone.last_commanded_fan_mode = Some(m),
            Commanded::PresetMode(m) => zone.last_commanded_preset_mode = Some(m),
        }
        zone.postpone_counter = latency;
        Ok(())
    }

    /// Set the override flag as a command or detection does.
    ///
    /// Turning the override off schedules a re-baseline on the next valid
    /// poll. Returns the previous flag.
    pub fn set_override(&mut self, zone_id: &str, active: bool) -> Result<bool> {
        let zone = self.zone_mut(zone_id)?;
        let previous = zone.manual_override;
        zone.manual_override = active;
        zone.pending_reset = !active;
        Ok(previous)
    }

    /// Restore an override flag recovered from the control plane.
    ///
    /// Clearing a flag that is set here counts as a reset, as with
    /// [`set_override`](Self::set_override).
    pub fn restore_override(&mut self, zone_id: &str, active: bool) -> Result<()> {
        let zone = self.zone_mut(zone_id)?;
        if zone.manual_override && !active {
            zone.pending_reset = true;
        }
        zone.manual_override = active;
        Ok(())
    }

    /// Count down one poll cycle of the postponement window.
    ///
    /// Saturates at zero; returns the remaining count.
    pub fn decrement_postpone(&mut self, zone_id: &str) -> Result<u32> {
        let zone = self.zone_mut(zone_id)?;
        zone.postpone_counter = zone.postpone_counter.saturating_sub(1);
        Ok(zone.postpone_counter)
    }

    /// Clear a pending re-baseline.
    pub fn mark_reset_consumed(&mut self, zone_id: &str) -> Result<()> {
        self.zone_mut(zone_id)?.pending_reset = false;
        Ok(())
    }

    /// Overwrite the zone's commanded values with polled ground truth and
    /// consume any pending reset. The postponement window is left alone.
    pub fn rebaseline(&mut self, zone_id: &str, baseline: Baseline) -> Result<()> {
        let zone = self.zone_mut(zone_id)?;
        zone.last_commanded_temp = Some(baseline.setpoint);
        if let Some(mode) = baseline.mode {
            zone.last_commanded_mode = Some(mode);
        }
        if let Some(fan_mode) = baseline.fan_mode {
            zone.last_commanded_fan_mode = Some(fan_mode);
        }
        zone.last_commanded_preset_mode = Some(baseline.preset_mode);
        self.mark_reset_consumed(zone_id)
    }

    /// Apply a new system mode to every zone that is not switched off.
    ///
    /// Returns the ids of the zones that were updated.
    pub fn propagate_system_mode(&mut self, mode: &str) -> Vec<String> {
        let latency = self.latency;
        let mut updated: Vec<String> = self
            .inner
            .zones
            .iter_mut()
            .filter(|(_, zone)| zone.last_commanded_mode.as_deref() != Some("off"))
            .map(|(id, zone)| {
                zone.last_commanded_mode = Some(mode.to_string());
                zone.postpone_counter = latency;
                id.clone()
            })
            .collect();
        updated.sort();
        updated
    }

    /// Whether the first full poll cycle has completed.
    pub fn first_poll_completed(&self) -> bool {
        self.inner.first_poll_completed
    }

    /// Mark the first full poll cycle as completed.
    ///
    /// Returns `true` the first time it is called.
    pub fn complete_first_poll(&mut self) -> bool {
        !std::mem::replace(&mut self.inner.first_poll_completed, true)
    }

    /// System-wide state.
    pub fn system(&self) -> &SystemState {
        &self.inner.system
    }

    pub fn set_system_mode(&mut self, mode: impl Into<String>) {
        self.inner.system.mode = Some(mode.into());
    }

    pub fn set_system_power(&mut self, power_mode: impl Into<String>) {
        self.inner.system.power_mode = Some(power_mode.into());
    }
}

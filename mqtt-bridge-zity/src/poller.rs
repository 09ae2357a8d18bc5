//! Controller polling, override detection and state publishing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zity_bridge_framework::Publisher;
use zity_common::TopicBuilder;

use crate::commands::{MANUAL_OVERRIDE, override_payload};
use crate::config::{SYSTEM_MODE_KEY, ZityConfig, ZoneConfig};
use crate::detector::{self, Divergence, PolledZone, RawZoneRegisters};
use crate::error::{GatewayError, SyncError};
use crate::gateway::RegisterGateway;
use crate::registers::{SystemRegisterKind, format_celsius, is_plausible};
use crate::state::ZoneStateStore;

/// Outcome of the override check for one zone in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideCheck {
    /// The first full cycle has not completed yet.
    WaitingForFirstPoll,
    /// A recent command is still propagating; the window shrank to `remaining`.
    Postponed { remaining: u32 },
    /// Temperature or setpoint was implausible.
    InvalidReading,
    /// The zone is already flagged.
    AlreadyOverridden,
    /// Values compared; any divergence flagged the zone.
    Compared(Vec<Divergence>),
}

/// Result of one zone poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePoll {
    pub polled: PolledZone,
    pub check: OverrideCheck,
    /// Whether the commandable fields may be published this cycle.
    pub publish_commandable: bool,
}

/// Polls the controller on a fixed cadence.
pub struct Poller {
    config: Arc<ZityConfig>,
    gateway: Arc<RegisterGateway>,
    store: Arc<ZoneStateStore>,
    publisher: Publisher,
    topics: TopicBuilder,
}

impl Poller {
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

    /// Run the polling loop until `shutdown` flips.
    ///
    /// A cycle aborted by a link failure is retried after the reconnect
    /// delay instead of the poll interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let timing = &self.config.timing;

        info!(
            zones = self.config.zones.len(),
            interval_secs = timing.poll_interval_secs,
            "Starting poller"
        );

        if !wait(timing.startup_delay(), &mut shutdown).await {
            return;
        }

        loop {
            let delay = match self.poll_once().await {
                Ok(()) => timing.poll_interval(),
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = timing.reconnect_delay_secs,
                        "Poll cycle aborted"
                    );
                    timing.reconnect_delay()
                }
            };

            if !wait(delay, &mut shutdown).await {
                break;
            }
        }

        info!("Poller stopped");
    }

    /// Perform a single poll cycle.
    ///
    /// Errors on individual zones or registers are logged and skipped; a
    /// link failure aborts the rest of the cycle.
    pub async fn poll_once(&self) -> Result<(), GatewayError> {
        if !self.gateway.is_connected().await {
            self.gateway.reconnect().await?;
        }

        let system_mode = self
            .gateway
            .read_register(self.config.system_mode_register())
            .await?;

        for zone in &self.config.zones {
            match self.poll_zone(zone, system_mode).await {
                Ok(poll) => self.publish_zone(zone, &poll).await,
                Err(e) => skip_or_abort(e, &zone.id)?,
            }
        }

        if self.store.lock().await.complete_first_poll() {
            info!("First poll completed; manual override detection now active");
        }

        self.poll_system().await?;
        self.poll_alarms().await?;

        Ok(())
    }

    /// Read one zone and run baseline and override logic on it.
    ///
    /// The registers are read under the store lock so a concurrent command
    /// cannot interleave between the read and the baseline update.
    pub async fn poll_zone(&self, zone: &ZoneConfig, system_mode: u16) -> Result<ZonePoll, SyncError> {
        let mut state = self.store.lock().await;
        let before = state.get(&zone.id)?;

        let raw = self.read_zone(zone).await?;
        let polled = PolledZone::decode(&raw, system_mode);
        if polled.mode.is_none() {
            warn!(zone = %zone.id, system_mode, "System mode has no table entry; mode unknown this cycle");
        }
        if polled.fan_mode.is_none() {
            warn!(zone = %zone.id, fan_mode = raw.fan_mode, "Fan mode has no table entry; fan mode unknown this cycle");
        }
        let valid = polled.is_valid();
        let first_poll_completed = state.first_poll_completed();

        if valid && (!first_poll_completed || before.pending_reset) {
            state.rebaseline(&zone.id, polled.baseline())?;
            debug!(zone = %zone.id, "Baseline taken from device");
        }

        let check = if !first_poll_completed {
            OverrideCheck::WaitingForFirstPoll
        } else if before.postpone_counter > 0 {
            let remaining = state.decrement_postpone(&zone.id)?;
            OverrideCheck::Postponed { remaining }
        } else if !valid {
            OverrideCheck::InvalidReading
        } else if before.manual_override {
            OverrideCheck::AlreadyOverridden
        } else {
            let divergences = detector::detect(&state.get(&zone.id)?, &polled);
            if !divergences.is_empty() {
                state.set_override(&zone.id, true)?;
            }
            OverrideCheck::Compared(divergences)
        };

        Ok(ZonePoll {
            polled,
            check,
            publish_commandable: before.postpone_counter == 0,
        })
    }

    async fn read_zone(&self, zone: &ZoneConfig) -> Result<RawZoneRegisters, GatewayError> {
        Ok(RawZoneRegisters {
            temperature: self.gateway.read_register(zone.temp_read_register).await?,
            setpoint: self.gateway.read_register(zone.setpoint_read_register).await?,
            damper: self.gateway.read_register(zone.damper_status_read_register).await?,
            power: self.gateway.read_register(zone.status_read_register).await?,
            fan_mode: self.gateway.read_register(zone.fan_mode_read_register).await?,
            preset_mode: self.gateway.read_register(zone.preset_mode_read_register).await?,
        })
    }

    async fn publish_zone(&self, zone: &ZoneConfig, poll: &ZonePoll) {
        let id = zone.id.as_str();
        let polled = &poll.polled;

        match &poll.check {
            OverrideCheck::WaitingForFirstPoll => {
                debug!(zone = %id, "Waiting for first poll to complete");
            }
            OverrideCheck::Postponed { remaining } => {
                debug!(zone = %id, remaining, "Override check postponed");
            }
            OverrideCheck::InvalidReading => {
                info!(
                    zone = %id,
                    temperature = polled.temperature,
                    setpoint = polled.setpoint,
                    "Implausible temperature or setpoint; skipping override check"
                );
            }
            OverrideCheck::AlreadyOverridden => {
                debug!(zone = %id, "Manual override already active");
            }
            OverrideCheck::Compared(divergences) if divergences.is_empty() => {
                debug!(zone = %id, "No manual changes detected");
            }
            OverrideCheck::Compared(divergences) => {
                for divergence in divergences {
                    info!(zone = %id, change = %divergence, "Manual change detected");
                }
                self.publish(&self.topics.zone(id, MANUAL_OVERRIDE), override_payload(true))
                    .await;
                info!(zone = %id, "Manual override set to ON");
            }
        }

        // Not commandable, so always current
        if is_plausible(polled.temperature) {
            self.publish(&self.topics.zone(id, "temp"), format_celsius(polled.temperature))
                .await;
        }
        let damper = if polled.damper_open { "open" } else { "closed" };
        self.publish(&self.topics.zone(id, "damper_status"), damper).await;

        if !poll.publish_commandable {
            debug!(zone = %id, ?polled, "Postponing commandable values");
            return;
        }

        if is_plausible(polled.setpoint) {
            self.publish(&self.topics.zone(id, "setpoint"), format_celsius(polled.setpoint))
                .await;
        }
        let power = if polled.power { "on" } else { "off" };
        self.publish(&self.topics.zone(id, "power"), power).await;
        if let Some(mode) = polled.mode {
            self.publish(&self.topics.zone(id, "mode"), mode).await;
        }
        if let Some(fan_mode) = polled.fan_mode {
            self.publish(&self.topics.zone(id, "fan_mode"), fan_mode).await;
        }
        self.publish(&self.topics.zone(id, "preset_mode"), polled.preset_mode)
            .await;
    }

    async fn poll_system(&self) -> Result<(), GatewayError> {
        for (key, address) in self.config.readable_system_registers() {
            let display = match self.gateway.read_register(address).await {
                Ok(raw) => SystemRegisterKind::from_key(key).display(raw),
                Err(e) => Err(e.into()),
            };

            match display {
                Ok(value) => {
                    self.record_system(key, &value).await;
                    self.publish(&self.topics.system(key), &value).await;
                    debug!(register = %key, value = %value, "System register");
                }
                Err(e) => skip_or_abort(e, key)?,
            }
        }
        Ok(())
    }

    async fn poll_alarms(&self) -> Result<(), GatewayError> {
        for alarm in &self.config.alarms {
            match self.gateway.read_register(alarm.register).await {
                Ok(raw) => {
                    self.publish(&self.topics.alarm(alarm.register), raw).await;
                }
                Err(e) => skip_or_abort(e.into(), &alarm.name)?,
            }
        }
        Ok(())
    }

    async fn record_system(&self, key: &str, value: &str) {
        match key {
            SYSTEM_MODE_KEY => self.store.lock().await.set_system_mode(value),
            "power_mode" => self.store.lock().await.set_system_power(value),
            _ => {}
        }
    }

    async fn publish(&self, topic: &str, value: impl std::fmt::Display) {
        self.publisher.publish_state_logged(topic, value).await;
    }
}

/// Log a per-item failure, or hand back a link failure so the cycle aborts.
fn skip_or_abort(err: SyncError, item: &str) -> Result<(), GatewayError> {
    match err {
        SyncError::Gateway(e) if e.is_link_failure() => Err(e),
        e => {
            warn!(item = %item, error = %e, "Skipping item this cycle");
            Ok(())
        }
    }
}

/// Sleep for `duration`; returns `false` if shutdown was signalled first.
async fn wait(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

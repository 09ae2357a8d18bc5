//! Control loop: the single consumer of inbound control-plane events.
//!
//! Commands are handled one at a time in arrival order. On every
//! (re)connection the loop first recovers retained override flags, then
//! subscribes to the command topics and republishes discovery and flags.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zity_bridge_framework::{InboundEvent, Publisher};
use zity_common::{ParsedTopic, TopicBuilder};

use crate::commands::{self, CommandHandler, MANUAL_OVERRIDE, override_payload, parse_override};
use crate::config::ZityConfig;
use crate::discovery::DiscoveryEntry;
use crate::state::ZoneStateStore;

/// Drives command handling from the inbound event channel.
pub struct ControlLoop {
    config: Arc<ZityConfig>,
    handler: CommandHandler,
    store: Arc<ZoneStateStore>,
    publisher: Publisher,
    topics: TopicBuilder,
    discovery: Vec<DiscoveryEntry>,
}

impl ControlLoop {
    pub fn new(
        config: Arc<ZityConfig>,
        handler: CommandHandler,
        store: Arc<ZoneStateStore>,
        publisher: Publisher,
        topics: TopicBuilder,
    ) -> Self {
        Self {
            config,
            handler,
            store,
            publisher,
            topics,
            discovery: Vec::new(),
        }
    }

    /// Descriptors published after each connection.
    pub fn with_discovery(mut self, entries: Vec<DiscoveryEntry>) -> Self {
        self.discovery = entries;
        self
    }

    /// Consume events until the sender side is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                InboundEvent::Connected => self.on_connected(&mut events).await,
                InboundEvent::Message { topic, payload } => {
                    self.handler.handle(&topic, &payload).await;
                }
            }
        }
        debug!("Inbound channel closed; control loop stopped");
    }

    /// Recover, subscribe and announce after a (re)connection.
    ///
    /// Commands that arrive meanwhile are handled once the subscriptions are
    /// in place.
    pub async fn on_connected(&self, events: &mut mpsc::UnboundedReceiver<InboundEvent>) {
        let deferred = loop {
            let (deferred, reconnected) = self.recover_overrides(events).await;
            if !reconnected {
                break deferred;
            }
            info!("Reconnected during override recovery; starting over");
        };

        for filter in commands::command_topics(&self.topics, &self.config) {
            if let Err(e) = self.publisher.subscribe(&filter).await {
                warn!(topic = %filter, error = %e, "Failed to subscribe");
            }
        }

        for entry in &self.discovery {
            if let Err(e) = self.publisher.publish_json(&entry.topic, &entry.payload).await {
                warn!(topic = %entry.topic, error = %e, "Failed to publish discovery");
            }
        }

        for zone in &self.config.zones {
            let active = match self.store.get(&zone.id).await {
                Ok(state) => state.manual_override,
                Err(_) => continue,
            };
            self.publisher
                .publish_state_logged(
                    &self.topics.zone(&zone.id, MANUAL_OVERRIDE),
                    override_payload(active),
                )
                .await;
        }

        info!(
            zones = self.config.zones.len(),
            discovery = self.discovery.len(),
            "Subscribed to commands"
        );

        for (topic, payload) in deferred {
            self.handler.handle(&topic, &payload).await;
        }
    }

    /// Collect retained override flags for the recovery window.
    ///
    /// Returns the other messages received meanwhile, and whether another
    /// connection event arrived.
    async fn recover_overrides(
        &self,
        events: &mut mpsc::UnboundedReceiver<InboundEvent>,
    ) -> (Vec<(String, String)>, bool) {
        let filters: Vec<String> = self
            .config
            .zones
            .iter()
            .map(|zone| self.topics.zone(&zone.id, MANUAL_OVERRIDE))
            .collect();

        for filter in &filters {
            if let Err(e) = self.publisher.subscribe(filter).await {
                warn!(topic = %filter, error = %e, "Failed to subscribe for override recovery");
            }
        }

        let mut deferred = Vec::new();
        let mut reconnected = false;
        let deadline = tokio::time::Instant::now() + self.config.timing.override_recovery();

        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(InboundEvent::Message { topic, payload })) => {
                    if !self.restore_override(&topic, &payload).await {
                        deferred.push((topic, payload));
                    }
                }
                Ok(Some(InboundEvent::Connected)) => {
                    reconnected = true;
                    break;
                }
                // Channel closed or window elapsed
                Ok(None) | Err(_) => break,
            }
        }

        for filter in &filters {
            if let Err(e) = self.publisher.unsubscribe(filter).await {
                warn!(topic = %filter, error = %e, "Failed to unsubscribe override topic");
            }
        }

        (deferred, reconnected)
    }

    /// Apply a retained override flag. Returns `false` if the message is not
    /// an override flag.
    async fn restore_override(&self, topic: &str, payload: &str) -> bool {
        let zone_id = match self.topics.parse(topic) {
            Ok(ParsedTopic::Zone { zone_id, leaf }) if leaf == MANUAL_OVERRIDE => zone_id,
            _ => return false,
        };

        match parse_override(payload) {
            Some(active) => match self.store.lock().await.restore_override(&zone_id, active) {
                Ok(()) => {
                    info!(zone = %zone_id, state = override_payload(active), "Restored manual override");
                }
                Err(e) => debug!(zone = %zone_id, error = %e, "Ignoring override of unknown zone"),
            },
            None => warn!(zone = %zone_id, payload = %payload, "Ignoring malformed override flag"),
        }
        true
    }
}

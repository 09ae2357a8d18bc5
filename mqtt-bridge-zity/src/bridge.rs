//! Wiring of the bridge components.

use std::sync::Arc;

use zity_bridge_framework::{BridgeConfig, Publisher};
use zity_common::TopicBuilder;

use crate::commands::CommandHandler;
use crate::config::{ZityBridgeConfig, ZityConfig};
use crate::control::ControlLoop;
use crate::discovery::Discovery;
use crate::gateway::{RegisterBus, RegisterGateway};
use crate::poller::Poller;
use crate::state::ZoneStateStore;

/// The shared components of one running bridge.
///
/// The command path and the poller share one gateway and one state store.
#[derive(Clone)]
pub struct ZityBridge {
    config: Arc<ZityConfig>,
    gateway: Arc<RegisterGateway>,
    store: Arc<ZoneStateStore>,
    publisher: Publisher,
    topics: TopicBuilder,
    discovery: Option<Discovery>,
}

impl ZityBridge {
    /// Assemble the bridge over a register bus and a publisher.
    pub fn new(config: &ZityBridgeConfig, bus: Box<dyn RegisterBus>, publisher: Publisher) -> Self {
        let zity = Arc::new(config.zity.clone());
        let topics = TopicBuilder::new(config.base_topic());
        let gateway = Arc::new(RegisterGateway::new(bus, &zity));
        let store = Arc::new(ZoneStateStore::new(
            zity.zones.iter().map(|z| z.id.clone()),
            zity.latency,
        ));
        let discovery = config
            .discovery
            .enabled
            .then(|| Discovery::new(config.discovery.prefix.clone(), topics.clone()));

        Self {
            config: zity,
            gateway,
            store,
            publisher,
            topics,
            discovery,
        }
    }

    pub fn config(&self) -> &Arc<ZityConfig> {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<RegisterGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<ZoneStateStore> {
        &self.store
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    pub fn command_handler(&self) -> CommandHandler {
        CommandHandler::new(
            self.config.clone(),
            self.gateway.clone(),
            self.store.clone(),
            self.publisher.clone(),
            self.topics.clone(),
        )
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.config.clone(),
            self.gateway.clone(),
            self.store.clone(),
            self.publisher.clone(),
            self.topics.clone(),
        )
    }

    pub fn control_loop(&self) -> ControlLoop {
        let control = ControlLoop::new(
            self.config.clone(),
            self.command_handler(),
            self.store.clone(),
            self.publisher.clone(),
            self.topics.clone(),
        );

        match &self.discovery {
            Some(discovery) => control.with_discovery(discovery.entries(&self.config)),
            None => control,
        }
    }
}

//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use zity_common::{LoggingConfig, TopicBuilder, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::status::{OFFLINE, StatusPublisher};

/// How long shutdown waits for the offline status to be flushed.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// An event delivered from the control plane to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The broker accepted a (re)connection; subscriptions must be re-issued.
    Connected,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: String },
}

/// Bridge runner that manages the lifecycle of the bridge.
///
/// Handles:
/// - Logging initialization
/// - MQTT client creation (with an `offline` last will)
/// - Driving the MQTT event loop, with fixed-delay reconnects
/// - Forwarding inbound messages to a single consumer channel
/// - Task spawning and graceful shutdown on Ctrl+C
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// MQTT client handle.
    client: AsyncClient,
    /// MQTT event loop, driven by [`run`](Self::run).
    eventloop: EventLoop,
    /// Publisher over the MQTT client.
    publisher: Publisher,
    /// Availability publisher.
    status_publisher: StatusPublisher,
    /// Shutdown broadcast to workers.
    shutdown: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Create the MQTT client; the connection is made once `run` starts
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let mut log_config: LoggingConfig = config.logging().clone();
        if let Some(level) = args.and_then(|a| a.log_level.clone()) {
            log_config.level = level;
        }

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let status_topic = TopicBuilder::new(config.base_topic()).bridge_status();
        let (client, eventloop) = zity_common::connect(config.mqtt(), Some((&status_topic, OFFLINE)))
            .map_err(|e| BridgeError::MqttConnection(e.to_string()))?;

        let publisher = Publisher::new(Arc::new(client.clone()));
        let status_publisher =
            StatusPublisher::new(publisher.clone(), status_topic, &name, &version);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            name,
            version,
            config,
            client,
            eventloop,
            publisher,
            status_publisher,
            shutdown,
            tasks: Vec::new(),
        })
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Receiver that flips to `true` when the bridge shuts down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received.
    ///
    /// Inbound messages and connection events are sent to `events` in
    /// arrival order. Event-loop errors are logged and retried after the
    /// configured reconnect delay, without limit.
    pub async fn run(mut self, events: mpsc::UnboundedSender<InboundEvent>) -> Result<()> {
        let reconnect_delay = Duration::from_secs(self.config.mqtt().reconnect_delay_secs);

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let message = InboundEvent::Message {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                            };
                            if events.send(message).is_err() {
                                tracing::warn!(topic = %publish.topic, "Inbound consumer gone; dropping message");
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!(broker = %self.config.mqtt().broker, "Connected to MQTT broker");

                            // Publishing from inside the event loop would wait on itself
                            let status = self.status_publisher.clone();
                            tokio::spawn(async move {
                                if let Err(e) = status.publish_online(None).await {
                                    tracing::warn!(error = %e, "Failed to publish online status");
                                }
                            });

                            if events.send(InboundEvent::Connected).is_err() {
                                tracing::warn!("Inbound consumer gone; connection event dropped");
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            tracing::warn!("MQTT broker closed the connection");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                retry_in_secs = reconnect_delay.as_secs(),
                                "MQTT connection lost"
                            );
                            if !wait_or_interrupt(reconnect_delay, signal::ctrl_c()).await {
                                break;
                            }
                        }
                    }
                }
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    }
                    break;
                }
            }
        }

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        let _ = self.shutdown.send(true);
        for task in &self.tasks {
            task.abort();
        }

        self.flush_offline().await;

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }

    /// Queue the offline status and a clean disconnect, then drive the
    /// event loop until the disconnect went out.
    async fn flush_offline(&mut self) {
        if let Err(e) = self.status_publisher.publish_offline().await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "Failed to request MQTT disconnect");
            return;
        }

        let drain = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, drain).await.is_err() {
            tracing::warn!("Timed out flushing offline status");
        }
    }
}

/// Sleep for `delay`; returns `false` if `interrupt` completes first.
async fn wait_or_interrupt<F: Future>(delay: Duration, interrupt: F) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = interrupt => false,
    }
}

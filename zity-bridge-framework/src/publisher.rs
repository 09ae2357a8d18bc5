//! Retained-state publisher for MQTT.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

use crate::error::{BridgeError, Result};

/// Outbound side of the control plane.
///
/// Implemented for [`rumqttc::AsyncClient`]; tests substitute a recorder.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Publish a payload, optionally retained.
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Remove a subscription.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

#[async_trait]
impl ControlPlane for AsyncClient {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retain, payload.into_bytes())
            .await
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BridgeError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        AsyncClient::unsubscribe(self, topic)
            .await
            .map_err(|e| BridgeError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Publisher for sending retained state to the control plane.
///
/// Every state topic of the bridge is retained so late subscribers see
/// the last known value.
#[derive(Clone)]
pub struct Publisher {
    plane: Arc<dyn ControlPlane>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }

    /// Get a reference to the underlying control plane.
    pub fn plane(&self) -> &Arc<dyn ControlPlane> {
        &self.plane
    }

    /// Publish a retained state value.
    pub async fn publish_state(&self, topic: &str, value: impl Display) -> Result<()> {
        let payload = value.to_string();
        self.plane.publish(topic, payload.clone(), true).await?;
        tracing::debug!(topic = %topic, payload = %payload, "Published");
        Ok(())
    }

    /// Publish a retained state value, logging instead of returning failures.
    ///
    /// Returns whether the publish was accepted by the client.
    pub async fn publish_state_logged(&self, topic: &str, value: impl Display) -> bool {
        match self.publish_state(topic, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to publish state");
                false
            }
        }
    }

    /// Publish a JSON value, retained.
    pub async fn publish_json<T: serde::Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.plane.publish(topic, payload, true).await
    }

    /// Subscribe to a topic filter.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.plane.subscribe(topic).await
    }

    /// Remove a subscription.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.plane.unsubscribe(topic).await
    }
}

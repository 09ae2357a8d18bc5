//! Bridge availability reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Payload published while the bridge is connected.
pub const ONLINE: &str = "online";
/// Payload published on shutdown and used as the MQTT last will.
pub const OFFLINE: &str = "offline";

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("online" or "offline").
    pub status: String,
    /// Time of the status change (RFC 3339).
    pub since: String,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "online" state.
    pub fn online(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, ONLINE)
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, OFFLINE)
    }

    fn with_status(
        bridge: impl Into<String>,
        version: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            since: chrono::Utc::now().to_rfc3339(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Publishes the bridge's availability.
///
/// The plain `online`/`offline` string goes to the availability topic
/// (matching the last will); the detailed [`BridgeStatus`] goes to
/// `<topic>/info`.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    publisher: Publisher,
    topic: String,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Publisher,
        topic: impl Into<String>,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// The availability topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish "online" status with optional metadata.
    pub async fn publish_online(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::online(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        self.publish(&status).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        self.publish(&BridgeStatus::offline(&self.bridge_name, &self.version))
            .await
    }

    async fn publish(&self, status: &BridgeStatus) -> Result<()> {
        self.publisher.publish_state(&self.topic, &status.status).await?;
        self.publisher
            .publish_json(&format!("{}/info", self.topic), status)
            .await
    }
}

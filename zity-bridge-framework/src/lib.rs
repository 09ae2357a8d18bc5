//! Zity Bridge Framework
//!
//! Lifecycle plumbing for the Zity MQTT bridge.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (MQTT event loop, reconnects, shutdown)
//! - [`ControlPlane`] and [`Publisher`] for retained-state publishing
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for availability reporting
//!
//! # Example
//!
//! ```ignore
//! use zity_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     runner.spawn(my_consumer(runner.publisher(), rx));
//!     runner.run(tx).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::{ControlPlane, Publisher};
pub use runner::{BridgeRunner, InboundEvent};
pub use status::{BridgeStatus, OFFLINE, ONLINE, StatusPublisher};

// Re-export commonly used types from zity-common
pub use zity_common::{LoggingConfig, MqttConfig, TopicBuilder};

//! MQTT bridge for Zity zoned HVAC controllers.
//!
//! Polls the controller over Modbus and mirrors its state to MQTT, applying
//! commands received over MQTT.

use anyhow::Result;
use tokio::sync::mpsc;
use zity_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

use mqtt_bridge_zity::{ModbusBus, ZityBridge, ZityBridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("zity.json5");

    // Load configuration using the framework's BridgeConfig trait
    let config = ZityBridgeConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    // Create the bridge runner (logging + MQTT client)
    let mut runner = BridgeRunner::new_with_args("zity", config, Some(&args))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let bus = ModbusBus::new(runner.config().modbus.clone());
    let bridge = ZityBridge::new(runner.config(), Box::new(bus), runner.publisher());

    tracing::info!(
        base_topic = %bridge.topics().base(),
        zones = bridge.config().zones.len(),
        master_zone = %bridge.config().master_zone,
        latency = bridge.config().latency,
        connection = ?runner.config().modbus.connection,
        "Zity bridge configured"
    );

    // The Modbus link is opened by the poller's first cycle
    let poller = bridge.poller();
    let shutdown = runner.shutdown_signal();
    runner.spawn(async move {
        poller.run(shutdown).await;
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let control = bridge.control_loop();
    runner.spawn(async move {
        control.run(events_rx).await;
    });

    // Run until Ctrl+C (handles shutdown gracefully)
    runner.run(events_tx).await.map_err(|e| anyhow::anyhow!("{}", e))
}

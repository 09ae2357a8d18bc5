use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Build the MQTT client options for the given configuration.
///
/// `last_will` is a `(topic, payload)` pair the broker publishes retained
/// when the connection drops without a clean disconnect.
pub fn mqtt_options(config: &MqttConfig, last_will: Option<(&str, &str)>) -> Result<MqttOptions> {
    if config.broker.is_empty() {
        return Err(Error::Config("MQTT broker cannot be empty".to_string()));
    }

    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    if let Some((topic, payload)) = last_will {
        options.set_last_will(LastWill::new(
            topic,
            payload.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
    }

    Ok(options)
}

/// Create an MQTT client and its event loop.
///
/// The connection is established lazily by the first `EventLoop::poll`.
pub fn connect(config: &MqttConfig, last_will: Option<(&str, &str)>) -> Result<(AsyncClient, EventLoop)> {
    let options = mqtt_options(config, last_will)?;

    tracing::info!(
        broker = %config.broker,
        port = config.port,
        client_id = %config.client_id,
        "Creating MQTT client"
    );

    Ok(AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY))
}

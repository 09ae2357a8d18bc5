//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mqtt_bridge_zity::{GatewayError, RegisterBus, ZityBridge, ZityBridgeConfig};
use zity_bridge_framework::{BridgeConfig, ControlPlane, Publisher, Result as BridgeResult};

/// Trigger register of the test configuration.
pub const TRIGGER: u16 = 2000;
pub const SYSTEM_MODE: u16 = 10;
pub const SYSTEM_MODE_WRITE: u16 = 1010;
pub const SYSTEM_POWER_WRITE: u16 = 1011;
pub const RETURN_TEMP: u16 = 13;
pub const SYSTEM_SETPOINT: u16 = 14;
pub const FAN_SPEED: u16 = 16;
pub const ALARM_FILTER: u16 = 300;

/// Three zones `A`, `B` and `C`; zone `A` is the fan master. All delays are
/// zero.
pub const CONFIG: &str = r#"{
  mqtt: { broker: "localhost", base_topic: "zity" },
  modbus: { connection: { type: "tcp", host: "127.0.0.1" } },
  zity: {
    trigger_register: 2000,
    master_zone: "A",
    latency: 2,
    zones: [
      { id: "A", name: "Living", setpoint_read_register: 100, setpoint_write_register: 1100,
        status_read_register: 101, status_write_register: 1101, fan_mode_read_register: 102,
        fan_mode_write_register: 1102, preset_mode_read_register: 103, preset_mode_write_register: 1103,
        damper_status_read_register: 104, temp_read_register: 105, master_slave_register: 1106,
        fan_control_register: 1107 },
      { id: "B", name: "Bedroom", setpoint_read_register: 110, setpoint_write_register: 1110,
        status_read_register: 111, status_write_register: 1111, fan_mode_read_register: 112,
        fan_mode_write_register: 1112, preset_mode_read_register: 113, preset_mode_write_register: 1113,
        damper_status_read_register: 114, temp_read_register: 115, master_slave_register: 1116,
        fan_control_register: 1117 },
      { id: "C", name: "Office", setpoint_read_register: 120, setpoint_write_register: 1120,
        status_read_register: 121, status_write_register: 1121, fan_mode_read_register: 122,
        fan_mode_write_register: 1122, preset_mode_read_register: 123, preset_mode_write_register: 1123,
        damper_status_read_register: 124, temp_read_register: 125, master_slave_register: 1126,
        fan_control_register: 1127 },
    ],
    system_registers: {
      mode: 10, mode_write: 1010, power_mode: 11, power_mode_write: 1011,
      return_temp: 13, setpoint: 14, fan_speed: 16,
    },
    alarms: [ { register: 300, name: "filter_dirty" } ],
    timing: {
      startup_delay_secs: 0, poll_interval_secs: 0, reconnect_delay_secs: 0,
      trigger_settle_ms: 0, claim_settle_ms: 0, override_recovery_ms: 0,
    },
  },
  discovery: { enabled: true, prefix: "homeassistant" },
}"#;

#[derive(Debug, Default)]
struct Device {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, Vec<u16>)>,
    failing: HashSet<u16>,
    failing_writes: HashSet<u16>,
    connected: bool,
    refuse_connect: bool,
    connects: usize,
}

/// In-memory [`RegisterBus`]: reads come from a register map, writes are
/// recorded in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    device: Arc<Mutex<Device>>,
}

impl MemoryBus {
    pub fn set(&self, address: u16, value: u16) {
        self.device.lock().unwrap().registers.insert(address, value);
    }

    /// Reads of `address` fail with a device exception.
    pub fn fail(&self, address: u16) {
        self.device.lock().unwrap().failing.insert(address);
    }

    /// Writes starting at `address` fail with a device exception.
    pub fn fail_write(&self, address: u16) {
        self.device.lock().unwrap().failing_writes.insert(address);
    }

    /// Drop the link; with `refuse` set, reconnecting fails too.
    pub fn disconnect(&self, refuse: bool) {
        let mut device = self.device.lock().unwrap();
        device.connected = false;
        device.refuse_connect = refuse;
    }

    pub fn connects(&self) -> usize {
        self.device.lock().unwrap().connects
    }

    /// Every write as `(address, value)`, in order.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.device
            .lock()
            .unwrap()
            .writes
            .iter()
            .flat_map(|(address, values)| {
                values
                    .iter()
                    .enumerate()
                    .map(move |(i, value)| (*address + i as u16, *value))
            })
            .collect()
    }

    pub fn clear_writes(&self) {
        self.device.lock().unwrap().writes.clear();
    }
}

#[async_trait]
impl RegisterBus for MemoryBus {
    fn is_connected(&self) -> bool {
        self.device.lock().unwrap().connected
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        let mut device = self.device.lock().unwrap();
        if device.refuse_connect {
            return Err(GatewayError::Connect("refused".to_string()));
        }
        device.connected = true;
        device.connects += 1;
        Ok(())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        let device = self.device.lock().unwrap();
        if !device.connected {
            return Err(GatewayError::NotConnected);
        }
        if device.failing.contains(&address) {
            return Err(GatewayError::Exception {
                address,
                code: "IllegalDataAddress".to_string(),
            });
        }
        Ok((address..address + count)
            .map(|a| device.registers.get(&a).copied().unwrap_or_default())
            .collect())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), GatewayError> {
        let mut device = self.device.lock().unwrap();
        if !device.connected {
            return Err(GatewayError::NotConnected);
        }
        if device.failing_writes.contains(&address) {
            return Err(GatewayError::Exception {
                address,
                code: "SlaveDeviceFailure".to_string(),
            });
        }
        device.writes.push((address, values.to_vec()));
        Ok(())
    }
}

/// [`ControlPlane`] that records everything.
#[derive(Debug, Default)]
pub struct RecordingPlane {
    published: Mutex<Vec<(String, String, bool)>>,
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
}

impl RecordingPlane {
    /// Payloads published on `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
            .collect()
    }

    pub fn last(&self, topic: &str) -> Option<String> {
        self.payloads(topic).pop()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _, _)| topic.clone())
            .collect()
    }

    pub fn all_retained(&self) -> bool {
        self.published.lock().unwrap().iter().all(|(_, _, retain)| *retain)
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl ControlPlane for RecordingPlane {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> BridgeResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BridgeResult<()> {
        self.subscribed.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> BridgeResult<()> {
        self.unsubscribed.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

/// Raw register values of one zone.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub temp: u16,
    pub setpoint: u16,
    pub power: u16,
    pub fan_mode: u16,
    pub preset: u16,
    pub damper: u16,
}

impl Default for Reading {
    /// 22.0 °C, setpoint 23.0 °C, on, fan auto, no preset, damper open.
    fn default() -> Self {
        Self {
            temp: 220,
            setpoint: 230,
            power: 1,
            fan_mode: 0,
            preset: 0,
            damper: 1,
        }
    }
}

/// A bridge over a [`MemoryBus`] and a [`RecordingPlane`].
pub struct Harness {
    pub bridge: ZityBridge,
    pub bus: MemoryBus,
    pub plane: Arc<RecordingPlane>,
}

impl Harness {
    /// Bridge with every zone reading [`Reading::default`] and the system in
    /// cool mode.
    pub fn new() -> Self {
        let config = ZityBridgeConfig::parse(CONFIG).unwrap();
        let bus = MemoryBus::default();
        let plane = Arc::new(RecordingPlane::default());
        let bridge = ZityBridge::new(&config, Box::new(bus.clone()), Publisher::new(plane.clone()));

        let harness = Self { bridge, bus, plane };
        for zone in ["A", "B", "C"] {
            harness.set_zone(zone, Reading::default());
        }
        harness.bus.set(SYSTEM_MODE, 3);
        harness
    }

    pub fn set_zone(&self, zone_id: &str, reading: Reading) {
        let zone = self.bridge.config().zone(zone_id).unwrap();
        self.bus.set(zone.temp_read_register, reading.temp);
        self.bus.set(zone.setpoint_read_register, reading.setpoint);
        self.bus.set(zone.status_read_register, reading.power);
        self.bus.set(zone.fan_mode_read_register, reading.fan_mode);
        self.bus.set(zone.preset_mode_read_register, reading.preset);
        self.bus.set(zone.damper_status_read_register, reading.damper);
    }

    /// Run one poll cycle, which must not abort.
    pub async fn poll(&self) {
        self.bridge.poller().poll_once().await.unwrap();
    }

    /// Deliver one inbound message to the command handler.
    pub async fn command(&self, topic: &str, payload: &str) {
        self.bridge.command_handler().handle(topic, payload).await;
    }

    pub fn zone_topic(&self, zone_id: &str, leaf: &str) -> String {
        self.bridge.topics().zone(zone_id, leaf)
    }
}

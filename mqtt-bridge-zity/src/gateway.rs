//! Register access to the controller over Modbus.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ModbusConfig, ZityConfig, ZoneConfig};
use crate::error::GatewayError;

/// Value written to the trigger register to prime the next write.
const TRIGGER_VALUE: u16 = 1;

/// Raw register I/O against one slave.
///
/// Implemented by [`ModbusBus`]; tests use an in-memory register map.
#[async_trait]
pub trait RegisterBus: Send {
    /// Whether a link to the device is currently established.
    fn is_connected(&self) -> bool;

    /// (Re)establish the link.
    async fn connect(&mut self) -> Result<(), GatewayError>;

    /// Read `count` input registers starting at `address`.
    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError>;

    /// Write holding registers starting at `address`.
    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), GatewayError>;
}

/// [`RegisterBus`] over tokio-modbus (TCP or RTU).
pub struct ModbusBus {
    config: ModbusConfig,
    ctx: Option<Context>,
}

impl ModbusBus {
    /// Create an unconnected bus.
    pub fn new(config: ModbusConfig) -> Self {
        Self { config, ctx: None }
    }

    async fn open(config: &ModbusConfig) -> Result<Context, GatewayError> {
        let timeout = config.timeout();
        let slave = Slave(config.slave_id);

        match &config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr: SocketAddr = format!("{}:{}", host, port)
                    .parse()
                    .map_err(|e| GatewayError::Connect(format!("Invalid address: {}", e)))?;

                let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| GatewayError::Connect("Connection timeout".to_string()))?
                    .map_err(|e| GatewayError::Connect(e.to_string()))?;

                Ok(ctx)
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits)
                    .timeout(timeout);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| GatewayError::Connect(format!("Serial open failed: {}", e)))?;

                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }

    fn context(&mut self) -> Result<&mut Context, GatewayError> {
        self.ctx.as_mut().ok_or(GatewayError::NotConnected)
    }

    /// Drop the link after a transport failure so the next call reconnects.
    fn mark_down(&mut self, err: &GatewayError) {
        if err.is_link_failure() && self.ctx.take().is_some() {
            warn!(error = %err, "Modbus link marked down");
        }
    }
}

#[async_trait]
impl RegisterBus for ModbusBus {
    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        self.ctx = None;
        let ctx = Self::open(&self.config).await?;
        self.ctx = Some(ctx);
        info!(connection = ?self.config.connection, slave = self.config.slave_id, "Modbus link connected");
        Ok(())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        let timeout = self.config.timeout();
        let ctx = self.context()?;

        let result = match tokio::time::timeout(timeout, ctx.read_input_registers(address, count)).await {
            Err(_) => Err(GatewayError::Timeout { address, timeout }),
            Ok(Err(e)) => Err(GatewayError::Transport {
                address,
                message: e.to_string(),
            }),
            Ok(Ok(Err(code))) => Err(GatewayError::Exception {
                address,
                code: format!("{:?}", code),
            }),
            Ok(Ok(Ok(values))) => Ok(values),
        };

        if let Err(e) = &result {
            self.mark_down(e);
        }
        result
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), GatewayError> {
        let timeout = self.config.timeout();
        let ctx = self.context()?;

        let result = match tokio::time::timeout(timeout, ctx.write_multiple_registers(address, values)).await {
            Err(_) => Err(GatewayError::Timeout { address, timeout }),
            Ok(Err(e)) => Err(GatewayError::Transport {
                address,
                message: e.to_string(),
            }),
            Ok(Ok(Err(code))) => Err(GatewayError::Exception {
                address,
                code: format!("{:?}", code),
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        };

        if let Err(e) = &result {
            self.mark_down(e);
        }
        result
    }
}

/// Controller-level register access.
///
/// Serializes all bus traffic, reconnects a dropped link on demand, and
/// implements the controller's write protocol: every write is preceded by
/// a trigger write and a settle delay.
pub struct RegisterGateway {
    bus: Mutex<Box<dyn RegisterBus>>,
    trigger_register: u16,
    trigger_settle: Duration,
    claim_settle: Duration,
}

impl RegisterGateway {
    /// Create a gateway over a bus.
    pub fn new(bus: Box<dyn RegisterBus>, config: &ZityConfig) -> Self {
        Self {
            bus: Mutex::new(bus),
            trigger_register: config.trigger_register,
            trigger_settle: config.timing.trigger_settle(),
            claim_settle: config.timing.claim_settle(),
        }
    }

    /// Whether the link is currently up.
    pub async fn is_connected(&self) -> bool {
        self.bus.lock().await.is_connected()
    }

    /// Reconnect the link if it is down.
    pub async fn reconnect(&self) -> Result<(), GatewayError> {
        let mut bus = self.bus.lock().await;
        if bus.is_connected() {
            return Ok(());
        }
        info!("Modbus disconnected; trying to reconnect");
        bus.connect().await
    }

    /// Read a single input register.
    pub async fn read_register(&self, address: u16) -> Result<u16, GatewayError> {
        let values = self.read_input(address, 1).await?;
        Ok(values[0])
    }

    /// Read `count` input registers, checking the returned length.
    pub async fn read_input(&self, address: u16, count: u16) -> Result<Vec<u16>, GatewayError> {
        let mut bus = self.bus.lock().await;
        if !bus.is_connected() {
            bus.connect().await?;
        }

        let values = bus.read_input_registers(address, count).await?;
        if values.len() < usize::from(count) {
            return Err(GatewayError::ShortRead {
                address,
                expected: count,
                got: values.len(),
            });
        }
        Ok(values)
    }

    /// Write holding registers without priming.
    pub async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), GatewayError> {
        let mut bus = self.bus.lock().await;
        if !bus.is_connected() {
            bus.connect().await?;
        }

        bus.write_registers(address, values).await?;
        debug!(address, ?values, "Wrote registers");
        Ok(())
    }

    /// Write a single holding register without priming.
    pub async fn write_register(&self, address: u16, value: u16) -> Result<(), GatewayError> {
        self.write_registers(address, &[value]).await
    }

    /// Write the trigger register.
    pub async fn trigger(&self) -> Result<(), GatewayError> {
        self.write_register(self.trigger_register, TRIGGER_VALUE).await
    }

    /// Write the trigger register and wait for the device to settle, so the
    /// next write is accepted.
    pub async fn prime(&self) -> Result<(), GatewayError> {
        self.trigger().await?;
        tokio::time::sleep(self.trigger_settle).await;
        Ok(())
    }

    /// Claim the shared fan-mode register for `master_zone`.
    ///
    /// For every zone in order: select master/slave, trigger, enable fan
    /// control, trigger, each write separated by the claim settle delay. A
    /// failure part-way leaves the zones written so far as they are.
    pub async fn claim_fan_control(
        &self,
        zones: &[ZoneConfig],
        master_zone: &str,
    ) -> Result<(), GatewayError> {
        for zone in zones {
            let selector = u16::from(zone.id == master_zone);

            self.write_register(zone.master_slave_register, selector).await?;
            tokio::time::sleep(self.claim_settle).await;
            self.trigger().await?;
            tokio::time::sleep(self.claim_settle).await;
            self.write_register(zone.fan_control_register, 1).await?;
            tokio::time::sleep(self.claim_settle).await;
            self.trigger().await?;

            debug!(zone = %zone.id, master = selector == 1, "Fan control claimed");
        }
        Ok(())
    }
}

use super::power::DevicePower;
use super::protocol::{LidarCommand, LidarProtocol};
use crate::error::{Result, RoverError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};
use tokio_util::codec::Encoder;
use tracing::*;

pub const DEFAULT_BAUD_RATE: u32 = 230_400;
const FALLBACK_PORTS: [&str; 2] = ["/dev/ttyUSB1", "/dev/ttyUSB2"];
const CP210X_VID: u16 = 0x10c4;
const CP210X_PID: u16 = 0xea60;
const REOPEN_SETTLE: Duration = Duration::from_millis(500);

/// Byte level access to the LIDAR device, owned by exactly one task.
#[async_trait]
pub trait LidarTransport: Send {
    fn port_name(&self) -> &str;

    /// Reads whatever is available. `Ok(0)` means nothing arrived.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn send_command(&mut self, command: LidarCommand) -> Result<()>;

    fn clear_buffers(&mut self) -> Result<()>;

    /// Data terminal ready on, request to send off. The T-mini Plus only streams with DTR set.
    fn set_control_lines(&mut self) -> Result<()>;

    /// Closes and opens the handle again on the current port
    async fn reopen(&mut self) -> Result<()>;

    /// Whether `power_cycle` has a way to cut power at all
    fn can_power_cycle(&self) -> bool;

    /// Electrically disconnects and reconnects the device
    async fn power_cycle(&mut self) -> Result<()>;

    /// Waits for the port to come back, adopting a newly enumerated one if it does not
    async fn wait_for_device(&mut self, attempts: u32, interval: Duration) -> Result<()>;

    fn close(&mut self);
}

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
    protocol: LidarProtocol,
    write_buffer: BytesMut,
    power: Box<dyn DevicePower>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32, power: Box<dyn DevicePower>) -> Result<Self> {
        let mut transport = Self {
            port_name: port_name.to_owned(),
            baud_rate,
            stream: None,
            power,
            protocol: LidarProtocol,
            write_buffer: BytesMut::with_capacity(8),
        };
        transport.open_stream()?;
        Ok(transport)
    }

    fn open_stream(&mut self) -> Result<()> {
        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .open_native_async()
            .map_err(|source| RoverError::FailedOpeningSerialPort {
                port: self.port_name.clone(),
                source,
            })?;
        self.stream = Some(stream);
        self.set_control_lines()?;
        info!("Opened lidar port {} at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(RoverError::PortClosed)
    }
}

#[async_trait]
impl LidarTransport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream()?.read(buf).await?)
    }

    async fn send_command(&mut self, command: LidarCommand) -> Result<()> {
        self.write_buffer.clear();
        self.protocol.encode(command, &mut self.write_buffer)?;
        let stream = self.stream.as_mut().ok_or(RoverError::PortClosed)?;
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        trace!("Sent {:?}", command);
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.stream()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_control_lines(&mut self) -> Result<()> {
        let stream = self.stream()?;
        stream.write_data_terminal_ready(true)?;
        stream.write_request_to_send(false)?;
        Ok(())
    }

    async fn reopen(&mut self) -> Result<()> {
        self.close();
        sleep(REOPEN_SETTLE).await;
        self.open_stream()
    }

    fn can_power_cycle(&self) -> bool {
        self.power.is_available()
    }

    async fn power_cycle(&mut self) -> Result<()> {
        self.close();
        if let Err(err) = self.power.power_cycle(&self.port_name).await {
            // device was never cut off, keep using it
            if let Err(reopen_err) = self.open_stream() {
                warn!("Reopening lidar port after failed power cycle: {}", reopen_err);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn wait_for_device(&mut self, attempts: u32, interval: Duration) -> Result<()> {
        for attempt in 1..=attempts {
            if tokio::fs::try_exists(&self.port_name).await.unwrap_or(false) {
                debug!("Lidar port back after {} checks", attempt);
                return Ok(());
            }
            sleep(interval).await;
        }
        let port = find_lidar_port().ok_or(RoverError::DeviceNotFound)?;
        warn!(
            "Lidar port {} did not come back, adopting {}",
            self.port_name, port
        );
        self.port_name = port;
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed lidar port {}", self.port_name);
        }
    }
}

fn is_lidar_bridge(info: &tokio_serial::UsbPortInfo) -> bool {
    let description = format!(
        "{} {}",
        info.product.as_deref().unwrap_or_default(),
        info.manufacturer.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    description.contains("cp210") || (info.vid == CP210X_VID && info.pid == CP210X_PID)
}

/// Looks for the CP210x bridge the T-mini Plus ships with, then the usual fallback paths.
pub fn find_lidar_port() -> Option<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => {
            let found = ports.into_iter().find(|port| match &port.port_type {
                SerialPortType::UsbPort(info) => is_lidar_bridge(info),
                _ => false,
            });
            if let Some(port) = found {
                info!("Found CP210x bridge on {}", port.port_name);
                return Some(port.port_name);
            }
        }
        Err(err) => warn!("Failed to list serial ports: {}", err),
    }
    FALLBACK_PORTS
        .iter()
        .find(|path| Path::new(path).exists())
        .map(|path| path.to_string())
}

use super::{DriveCommand, RoverDriver, WireCommand};
use crate::error::{Result, RoverError};
use crate::geo::GeoPoint;
use crate::navigation::avoidance::UltrasonicReadings;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::*;

const MAX_LINE_LEN: usize = 4096;
const HUB_IDENTIFIERS: [&str; 3] = ["arduino", "ttyacm", "ch340"];
const FALLBACK_PORTS: [&str; 3] = ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0"];

#[derive(Deserialize, Debug, Clone)]
pub struct HubConfig {
    /// Auto detected when missing
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
        }
    }
}

impl HubConfig {
    pub fn resolve_port(&self) -> Result<String> {
        match &self.port {
            Some(port) => Ok(port.clone()),
            None => find_hub_port().ok_or(RoverError::DeviceNotFound),
        }
    }
}

fn find_hub_port() -> Option<String> {
    if let Ok(ports) = tokio_serial::available_ports() {
        for port in ports {
            let description = match &port.port_type {
                SerialPortType::UsbPort(info) => format!(
                    "{} {} {}",
                    port.port_name,
                    info.product.as_deref().unwrap_or_default(),
                    info.manufacturer.as_deref().unwrap_or_default()
                ),
                _ => port.port_name.clone(),
            }
            .to_lowercase();
            if HUB_IDENTIFIERS.iter().any(|id| description.contains(id)) {
                return Some(port.port_name);
            }
        }
    }
    FALLBACK_PORTS
        .iter()
        .find(|path| Path::new(path).exists())
        .map(|path| path.to_string())
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GpsFix {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    #[serde(default)]
    pub spd: f64,
    #[serde(default)]
    pub acc: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ImuReading {
    /// Compass heading in degrees
    #[serde(default)]
    pub hdg: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
}

/// Latest known state reported by the sensor hub
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct HubTelemetry {
    #[serde(default)]
    pub gps: Option<GpsFix>,
    #[serde(default)]
    pub imu: Option<ImuReading>,
    /// Ultrasonic ranges in cm, front, front left, front right, rear left, rear right
    #[serde(default)]
    pub ultra: Vec<i32>,
}

impl HubTelemetry {
    /// `None` until the hub reported a GPS block
    pub fn position(&self) -> Option<GeoPoint> {
        self.gps
            .as_ref()
            .map(|gps| GeoPoint::unnamed(gps.lat, gps.lng))
    }

    pub fn heading(&self) -> Option<f64> {
        self.imu.as_ref().map(|imu| imu.hdg)
    }

    pub fn ultrasonic(&self) -> UltrasonicReadings {
        UltrasonicReadings::from_slice(&self.ultra)
    }

    /// Messages may carry a subset of the sensors, the rest keeps its last value
    pub fn merge(&mut self, update: HubTelemetry) {
        if update.gps.is_some() {
            self.gps = update.gps;
        }
        if update.imu.is_some() {
            self.imu = update.imu;
        }
        if !update.ultra.is_empty() {
            self.ultra = update.ultra;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Telemetry(HubTelemetry),
    /// Free text the firmware prints
    Log(String),
    Invalid(String),
}

/// Newline framed text. JSON objects are telemetry, anything else is log output.
pub struct HubProtocol;

impl Decoder for HubProtocol {
    type Item = HubMessage;
    type Error = RoverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(newline) = src.iter().position(|byte| *byte == b'\n') else {
                if src.len() > MAX_LINE_LEN {
                    warn!("Dropping {} bytes of unterminated hub output", src.len());
                    src.clear();
                }
                return Ok(None);
            };
            let raw_line = src.split_to(newline + 1);
            let line = String::from_utf8_lossy(&raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message = if line.starts_with('{') {
                match serde_json::from_str(line) {
                    Ok(telemetry) => HubMessage::Telemetry(telemetry),
                    Err(err) => {
                        trace!("Bad telemetry line {:?}: {}", line, err);
                        HubMessage::Invalid(line.to_owned())
                    }
                }
            } else {
                HubMessage::Log(line.to_owned())
            };
            return Ok(Some(message));
        }
    }
}

impl Encoder<WireCommand> for HubProtocol {
    type Error = RoverError;

    fn encode(&mut self, command: WireCommand, buf: &mut BytesMut) -> Result<()> {
        let encoded = command.encode();
        buf.reserve(encoded.len());
        buf.put_slice(encoded.as_bytes());
        Ok(())
    }
}

/// Drives the motors through the sensor hub and publishes its telemetry.
pub struct HubDriver<S> {
    sink: SplitSink<Framed<S, HubProtocol>, WireCommand>,
    telemetry: watch::Receiver<HubTelemetry>,
    reader: JoinHandle<()>,
}

impl HubDriver<SerialStream> {
    pub fn open(config: &HubConfig) -> Result<Self> {
        let port = config.resolve_port()?;
        let serial_port = tokio_serial::new(&port, config.baud_rate)
            .open_native_async()
            .map_err(|source| RoverError::FailedOpeningSerialPort {
                port: port.clone(),
                source,
            })?;
        info!("Connected to sensor hub on {}", port);
        Ok(Self::from_stream(serial_port))
    }
}

impl<S> HubDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn from_stream(stream: S) -> Self {
        let (sink, mut messages) = HubProtocol.framed(stream).split();
        let (sender, telemetry) = watch::channel(HubTelemetry::default());
        let reader = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(HubMessage::Telemetry(update)) => {
                        sender.send_modify(|telemetry| telemetry.merge(update))
                    }
                    Ok(HubMessage::Log(line)) => debug!("Hub: {}", line),
                    Ok(HubMessage::Invalid(line)) => warn!("Ignoring malformed telemetry {:?}", line),
                    Err(err) => {
                        error!("Sensor hub link failed: {}", err);
                        break;
                    }
                }
            }
            info!("Sensor hub telemetry ended");
        });
        Self {
            sink,
            telemetry,
            reader,
        }
    }

    pub fn telemetry(&self) -> watch::Receiver<HubTelemetry> {
        self.telemetry.clone()
    }
}

impl<S> Drop for HubDriver<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl<S> RoverDriver for HubDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, command: DriveCommand) -> Result<()> {
        self.sink
            .send(WireCommand::Move(command))
            .await
            .map_err(|_| RoverError::HubCommError)
    }

    async fn stop(&mut self) -> Result<()> {
        self.sink
            .send(WireCommand::Stop)
            .await
            .map_err(|_| RoverError::HubCommError)
    }
}

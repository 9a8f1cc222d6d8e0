//! YDLIDAR T-mini Plus driver.
//!
//! One task owns the serial port and runs the read, decode, assemble and
//! recovery loop. Everything else reads through [`LidarService`].

pub mod assembler;
pub mod driver;
pub mod health;
pub mod power;
pub mod protocol;
pub mod recovery;
pub mod scan;
pub mod service;
pub mod transport;

pub use assembler::{AssemblerConfig, ChannelObserver, ScanObserver};
pub use health::{ConnectionHealth, ConnectionState};
pub use recovery::RecoveryConfig;
pub use scan::{LidarPoint, LidarScan, ScanMessage, Sector};
pub use service::LidarService;

use crate::error::{Result, RoverError};
use crate::util::latest_value_channel;
use driver::LidarDriver;
use health::SharedHealth;
use power::{DevicePower, NoPowerControl, SysfsUsbPower};
use protocol::LidarCommand;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::*;
use transport::{find_lidar_port, LidarTransport, SerialTransport, DEFAULT_BAUD_RATE};

#[derive(Deserialize, Debug, Clone)]
pub struct LidarConfig {
    /// Auto detected when missing
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Allow the last recovery tier to toggle the USB device through sysfs
    #[serde(default)]
    pub power_cycle: bool,
    /// How long the USB device stays deauthorized during a power cycle
    #[serde(default = "default_power_off_ms")]
    pub power_off_ms: u64,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_power_off_ms() -> u64 {
    2000
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            power_cycle: false,
            power_off_ms: default_power_off_ms(),
            recovery: RecoveryConfig::default(),
            assembler: AssemblerConfig::default(),
        }
    }
}

impl LidarConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn power_off_time(&self) -> Duration {
        Duration::from_millis(self.power_off_ms)
    }

    pub fn resolve_port(&self) -> Result<String> {
        match &self.port {
            Some(port) => Ok(port.clone()),
            None => find_lidar_port().ok_or(RoverError::DeviceNotFound),
        }
    }

    fn open_transport(&self) -> Result<SerialTransport> {
        let port = self.resolve_port()?;
        let power: Box<dyn DevicePower> = if self.power_cycle {
            Box::new(SysfsUsbPower::new(self.power_off_time()))
        } else {
            Box::new(NoPowerControl)
        };
        SerialTransport::open(&port, self.baud_rate, power)
    }
}

/// Running LIDAR driver. Dropping it without [`Lidar::shutdown`] leaves the motor spinning.
pub struct Lidar {
    service: LidarService,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Lidar {
    /// Opens the serial port and spawns the driver task
    pub fn start(config: &LidarConfig, observer: Option<Box<dyn ScanObserver>>) -> Result<Self> {
        let transport = config.open_transport()?;
        Ok(Self::start_with_transport(transport, config, observer))
    }

    pub fn start_with_transport<T>(
        transport: T,
        config: &LidarConfig,
        observer: Option<Box<dyn ScanObserver>>,
    ) -> Self
    where
        T: LidarTransport + 'static,
    {
        let (publisher, scans) = latest_value_channel();
        let health = SharedHealth::default();
        let cancel = CancellationToken::new();
        let driver = LidarDriver::new(
            transport,
            config,
            publisher,
            observer,
            health.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(driver.run());
        Self {
            service: LidarService::new(scans, health),
            cancel,
            task,
        }
    }

    pub fn service(&self) -> LidarService {
        self.service.clone()
    }

    /// Stops the motor, closes the port and waits for the driver task
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("Lidar driver task failed: {}", err);
        }
    }

    /// Opens the port only to stop the motor
    pub async fn stop_motor(config: &LidarConfig) -> Result<()> {
        let mut transport = config.open_transport()?;
        transport.send_command(LidarCommand::StopScan).await?;
        transport.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_device() {
        let config: LidarConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.baud_rate, 230_400);
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
        assert!(!config.power_cycle);
        assert_eq!(config.power_off_time(), Duration::from_secs(2));
        assert_eq!(config.recovery.staleness_timeout(), Duration::from_secs(5));
        assert_eq!(config.assembler.min_scan_points, 11);
    }

    #[test]
    fn explicit_port_is_used_as_is() {
        let config = LidarConfig {
            port: Some("/dev/lidar".to_owned()),
            ..Default::default()
        };
        assert_eq!(config.resolve_port().unwrap(), "/dev/lidar");
    }

    #[test]
    fn nested_recovery_settings_override_defaults() {
        let config: LidarConfig =
            serde_json::from_str(r#"{"recovery": {"cooldown_ms": 1000}}"#).unwrap();
        assert_eq!(config.recovery.cooldown(), Duration::from_secs(1));
        assert_eq!(config.recovery.empty_read_threshold, 50);
    }
}

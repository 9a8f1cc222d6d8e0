use crate::error::{Result, RoverError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::*;

/// Platform level power control for the device behind a serial port.
#[async_trait]
pub trait DevicePower: Send + Sync {
    async fn power_cycle(&self, port_name: &str) -> Result<()>;

    /// False when `power_cycle` can only fail
    fn is_available(&self) -> bool {
        true
    }
}

/// Simulated unplug and replug through the kernel's USB `authorized` switch.
///
/// Needs write access to sysfs, usually root or a udev rule.
pub struct SysfsUsbPower {
    off_time: Duration,
}

impl SysfsUsbPower {
    pub fn new(off_time: Duration) -> Self {
        Self { off_time }
    }
}

#[async_trait]
impl DevicePower for SysfsUsbPower {
    async fn power_cycle(&self, port_name: &str) -> Result<()> {
        let authorized = usb_authorized_path(port_name)
            .await
            .ok_or_else(|| RoverError::PowerControlUnavailable(PathBuf::from(port_name)))?;
        info!("Power cycling {} through {:?}", port_name, authorized);
        tokio::fs::write(&authorized, "0").await?;
        sleep(self.off_time).await;
        tokio::fs::write(&authorized, "1").await?;
        Ok(())
    }
}

/// Used when power cycling is disabled in the settings
pub struct NoPowerControl;

#[async_trait]
impl DevicePower for NoPowerControl {
    async fn power_cycle(&self, port_name: &str) -> Result<()> {
        Err(RoverError::PowerControlUnavailable(PathBuf::from(
            port_name,
        )))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Finds the `authorized` switch of the USB device behind a tty
async fn usb_authorized_path(port_name: &str) -> Option<PathBuf> {
    // resolves /dev/serial/by-id links
    let port = tokio::fs::canonicalize(port_name)
        .await
        .unwrap_or_else(|_| PathBuf::from(port_name));
    let tty_name = port.file_name()?.to_str()?.to_owned();
    let device = tokio::fs::canonicalize(format!("/sys/class/tty/{}/device", tty_name))
        .await
        .ok()?;
    for ancestor in device.ancestors() {
        if is_usb_device_dir(ancestor).await {
            return Some(ancestor.join("authorized"));
        }
    }
    None
}

async fn is_usb_device_dir(path: &Path) -> bool {
    let has_vendor = tokio::fs::try_exists(path.join("idVendor"))
        .await
        .unwrap_or(false);
    let has_switch = tokio::fs::try_exists(path.join("authorized"))
        .await
        .unwrap_or(false);
    has_vendor && has_switch
}

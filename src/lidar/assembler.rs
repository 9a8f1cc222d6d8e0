use super::protocol::LidarPacket;
use super::scan::{LidarPoint, LidarScan};
use crate::util::LatestSender;
use chrono::Utc;
use serde::Deserialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::*;

/// Receives every accepted scan on the driver task.
///
/// Implementations must return quickly, errors and panics are logged and dropped.
pub trait ScanObserver: Send {
    fn on_scan(&self, scan: &Arc<LidarScan>) -> anyhow::Result<()>;
}

impl<F> ScanObserver for F
where
    F: Fn(&Arc<LidarScan>) -> anyhow::Result<()> + Send,
{
    fn on_scan(&self, scan: &Arc<LidarScan>) -> anyhow::Result<()> {
        self(scan)
    }
}

/// Forwards scans into a bounded channel, dropping them while the consumer lags.
pub struct ChannelObserver {
    sender: mpsc::Sender<Arc<LidarScan>>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<Arc<LidarScan>>) -> Self {
        Self { sender }
    }
}

impl ScanObserver for ChannelObserver {
    fn on_scan(&self, scan: &Arc<LidarScan>) -> anyhow::Result<()> {
        match self.sender.try_send(Arc::clone(scan)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Scan consumer lagging, dropping scan");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(anyhow::anyhow!("scan consumer channel closed"))
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AssemblerConfig {
    /// Scans with fewer points are treated as noise
    #[serde(default = "default_min_scan_points")]
    pub min_scan_points: usize,
    #[serde(default = "default_fallback_min_points")]
    pub fallback_min_points: usize,
    #[serde(default = "default_fallback_elapsed_ms")]
    pub fallback_elapsed_ms: u64,
}

fn default_min_scan_points() -> usize {
    11
}

fn default_fallback_min_points() -> usize {
    50
}

fn default_fallback_elapsed_ms() -> u64 {
    200
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_scan_points: default_min_scan_points(),
            fallback_min_points: default_fallback_min_points(),
            fallback_elapsed_ms: default_fallback_elapsed_ms(),
        }
    }
}

impl AssemblerConfig {
    pub fn fallback_elapsed(&self) -> Duration {
        Duration::from_millis(self.fallback_elapsed_ms)
    }
}

/// True when the sweep crossed 0° between two consecutive packets
fn crossed_zero(previous_end: f32, current_end: f32) -> bool {
    current_end < previous_end && current_end < 90.0 && previous_end > 270.0
}

/// Builds full revolutions out of consecutive packets.
///
/// Points accumulate in a private working buffer; only finished scans are
/// published, so readers never see a partial revolution.
pub struct ScanAssembler {
    config: AssemblerConfig,
    working: Vec<LidarPoint>,
    scan_start: Instant,
    last_end_angle: Option<f32>,
    publisher: LatestSender<Arc<LidarScan>>,
    observer: Option<Box<dyn ScanObserver>>,
    rate_window_start: Instant,
    scans_in_window: u32,
    scans_per_second: u32,
}

impl ScanAssembler {
    pub fn new(
        config: AssemblerConfig,
        publisher: LatestSender<Arc<LidarScan>>,
        observer: Option<Box<dyn ScanObserver>>,
        now: Instant,
    ) -> Self {
        Self {
            config,
            working: Vec::with_capacity(1024),
            scan_start: now,
            last_end_angle: None,
            publisher,
            observer,
            rate_window_start: now,
            scans_in_window: 0,
            scans_per_second: 0,
        }
    }

    /// Adds a packet and returns the scan it completed, if any.
    pub fn push(&mut self, packet: LidarPacket, now: Instant) -> Option<Arc<LidarScan>> {
        self.working.extend_from_slice(&packet.points);

        let wrapped = self
            .last_end_angle
            .map(|previous| crossed_zero(previous, packet.end_angle))
            .unwrap_or(false);
        let timed_out = self.working.len() >= self.config.fallback_min_points
            && now.duration_since(self.scan_start) > self.config.fallback_elapsed();
        self.last_end_angle = Some(packet.end_angle);

        if wrapped || timed_out {
            self.complete(now)
        } else {
            None
        }
    }

    /// Drops the partial revolution, e.g. after the link was reset
    pub fn reset(&mut self, now: Instant) {
        self.working.clear();
        self.scan_start = now;
        self.last_end_angle = None;
    }

    pub fn scans_per_second(&self) -> u32 {
        self.scans_per_second
    }

    pub fn pending_points(&self) -> usize {
        self.working.len()
    }

    fn complete(&mut self, now: Instant) -> Option<Arc<LidarScan>> {
        let elapsed = now.duration_since(self.scan_start).as_secs_f32();
        let scan = if self.working.len() >= self.config.min_scan_points {
            let frequency_hz = if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 };
            let points = std::mem::replace(&mut self.working, Vec::with_capacity(1024));
            let scan = Arc::new(LidarScan::new(Utc::now(), points, frequency_hz));
            trace!(
                "Completed scan: {} points, {:.1} Hz",
                scan.points().len(),
                frequency_hz
            );
            self.publisher.send(Arc::clone(&scan));
            self.notify_observer(&scan);
            self.count_scan(now);
            Some(scan)
        } else {
            trace!("Discarding scan with {} points", self.working.len());
            None
        };
        self.working.clear();
        self.scan_start = now;
        scan
    }

    fn notify_observer(&self, scan: &Arc<LidarScan>) {
        let Some(observer) = &self.observer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer.on_scan(scan))) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => error!("Scan observer failed: {:?}", err),
            Err(_) => error!("Scan observer panicked"),
        }
    }

    fn count_scan(&mut self, now: Instant) {
        self.scans_in_window += 1;
        if now.duration_since(self.rate_window_start) >= Duration::from_secs(1) {
            self.scans_per_second = self.scans_in_window;
            self.scans_in_window = 0;
            self.rate_window_start = now;
            debug!("Lidar running at {} scans/s", self.scans_per_second);
        }
    }
}

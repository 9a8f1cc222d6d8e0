use super::health::{ConnectionHealth, SharedHealth};
use super::scan::{empty_sectors, LidarPoint, LidarScan, Sector};
use crate::util::LatestReceiver;
use nalgebra as na;
use std::sync::Arc;

pub const DEFAULT_SECTOR_COUNT: usize = 8;

/// Read side of the LIDAR. Cheap to clone, never touches the serial port.
#[derive(Clone)]
pub struct LidarService {
    scans: LatestReceiver<Arc<LidarScan>>,
    health: SharedHealth,
}

impl LidarService {
    pub fn new(scans: LatestReceiver<Arc<LidarScan>>, health: SharedHealth) -> Self {
        Self { scans, health }
    }

    pub fn latest_scan(&self) -> Option<Arc<LidarScan>> {
        self.scans.latest()
    }

    /// Waits for the next completed scan, `None` once the driver is gone
    pub async fn next_scan(&self) -> Option<Arc<LidarScan>> {
        self.scans.changed().await
    }

    pub fn closest_obstacle(&self) -> Option<LidarPoint> {
        self.latest_scan()?.closest_point()
    }

    pub fn obstacles_in_range(
        &self,
        min_angle: f32,
        max_angle: f32,
        max_distance_mm: f32,
    ) -> Vec<LidarPoint> {
        self.latest_scan()
            .map(|scan| scan.points_in_range(min_angle, max_angle, max_distance_mm))
            .unwrap_or_default()
    }

    /// Always returns `sector_count` sectors, sentinel filled without a scan.
    pub fn sector_distances(&self, sector_count: usize) -> Vec<Sector> {
        match self.latest_scan() {
            Some(scan) => scan.sectors(sector_count),
            None => empty_sectors(sector_count),
        }
    }

    /// Latest scan in the sensor frame, meters
    pub fn point_cloud(&self) -> Vec<na::Point2<f32>> {
        self.latest_scan()
            .map(|scan| scan.point_cloud())
            .unwrap_or_default()
    }

    pub fn scans_per_second(&self) -> u32 {
        self.health.snapshot().scans_per_second
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }
}

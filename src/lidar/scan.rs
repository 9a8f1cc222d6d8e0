use chrono::{DateTime, Utc};
use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Exclusive upper bound of the sensor range. Also the "nothing seen" value of an empty sector.
pub const MAX_DISTANCE_MM: u16 = 12000;
pub const NO_OBSTACLE_MM: f32 = MAX_DISTANCE_MM as f32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarPoint {
    /// Degrees in [0, 360), clockwise as reported by the sensor
    pub angle: f32,
    pub distance_mm: u16,
    pub intensity: u8,
}

impl LidarPoint {
    pub fn new(angle: f32, distance_mm: u16, intensity: u8) -> Self {
        Self {
            angle,
            distance_mm,
            intensity,
        }
    }

    /// Sensor frame position in meters, x forward and y to the left
    pub fn position(&self) -> na::Point2<f32> {
        let distance_m = self.distance_mm as f32 / 1000.0;
        let angle = -self.angle.to_radians();
        na::Point2::new(distance_m * angle.cos(), distance_m * angle.sin())
    }
}

/// One completed revolution. Never mutated after the assembler publishes it.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarScan {
    timestamp: DateTime<Utc>,
    points: Vec<LidarPoint>,
    frequency_hz: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sector {
    pub index: usize,
    pub angle_start: f32,
    pub angle_end: f32,
    pub min_distance: f32,
    pub avg_distance: f32,
    pub point_count: usize,
}

impl Sector {
    fn empty(index: usize, angle_start: f32, angle_end: f32) -> Self {
        Self {
            index,
            angle_start,
            angle_end,
            min_distance: NO_OBSTACLE_MM,
            avg_distance: NO_OBSTACLE_MM,
            point_count: 0,
        }
    }

    pub fn center_angle(&self) -> f32 {
        (self.angle_start + self.angle_end) / 2.0
    }
}

/// Sectors for a missing scan, every one reporting the sentinel distance
pub fn empty_sectors(sector_count: usize) -> Vec<Sector> {
    sector_bounds(sector_count)
        .map(|(index, start, end)| Sector::empty(index, start, end))
        .collect()
}

fn sector_bounds(sector_count: usize) -> impl Iterator<Item = (usize, f32, f32)> {
    let sector_size = 360.0 / sector_count.max(1) as f32;
    (0..sector_count).map(move |index| {
        (
            index,
            index as f32 * sector_size,
            (index + 1) as f32 * sector_size,
        )
    })
}

impl LidarScan {
    pub fn new(timestamp: DateTime<Utc>, points: Vec<LidarPoint>, frequency_hz: f32) -> Self {
        Self {
            timestamp,
            points,
            frequency_hz,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn points(&self) -> &[LidarPoint] {
        &self.points
    }

    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    pub fn closest_point(&self) -> Option<LidarPoint> {
        self.points
            .iter()
            .min_by_key(|point| point.distance_mm)
            .copied()
    }

    /// Points inside the inclusive angle range and no further than `max_distance_mm`.
    ///
    /// The range does not wrap, `min_angle` must not exceed `max_angle`.
    pub fn points_in_range(
        &self,
        min_angle: f32,
        max_angle: f32,
        max_distance_mm: f32,
    ) -> Vec<LidarPoint> {
        self.points
            .iter()
            .filter(|point| point.angle >= min_angle && point.angle <= max_angle)
            .filter(|point| point.distance_mm as f32 <= max_distance_mm)
            .copied()
            .collect()
    }

    /// Splits the revolution into `sector_count` equal bins starting at 0°.
    pub fn sectors(&self, sector_count: usize) -> Vec<Sector> {
        sector_bounds(sector_count)
            .map(|(index, start, end)| {
                let mut count = 0;
                let mut sum = 0.0;
                let mut min = u16::MAX;
                for point in self
                    .points
                    .iter()
                    .filter(|point| point.angle >= start && point.angle < end)
                {
                    count += 1;
                    sum += point.distance_mm as f32;
                    min = min.min(point.distance_mm);
                }
                if count == 0 {
                    Sector::empty(index, start, end)
                } else {
                    Sector {
                        index,
                        angle_start: start,
                        angle_end: end,
                        min_distance: min as f32,
                        avg_distance: sum / count as f32,
                        point_count: count,
                    }
                }
            })
            .collect()
    }

    pub fn point_cloud(&self) -> Vec<na::Point2<f32>> {
        self.points.iter().map(LidarPoint::position).collect()
    }

    pub fn to_message(&self) -> ScanMessage {
        ScanMessage::from(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanPointMessage {
    pub angle: f32,
    pub distance: u16,
    pub intensity: u8,
}

/// JSON shape handed to dashboards and loggers
#[derive(Debug, Clone, Serialize)]
pub struct ScanMessage {
    pub points: Vec<ScanPointMessage>,
    pub count: usize,
    pub frequency: f32,
    pub timestamp: i64,
}

fn round_to_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

impl From<&LidarScan> for ScanMessage {
    fn from(scan: &LidarScan) -> Self {
        let points: Vec<_> = scan
            .points
            .iter()
            .map(|point| ScanPointMessage {
                angle: round_to_tenth(point.angle),
                distance: point.distance_mm,
                intensity: point.intensity,
            })
            .collect();
        Self {
            count: points.len(),
            points,
            frequency: round_to_tenth(scan.frequency_hz),
            timestamp: scan.timestamp.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scan_from(points: &[(f32, u16)]) -> LidarScan {
        LidarScan::new(
            Utc::now(),
            points
                .iter()
                .map(|(angle, distance)| LidarPoint::new(*angle, *distance, 50))
                .collect(),
            7.0,
        )
    }

    #[test]
    fn closest_point_picks_minimum() {
        let scan = scan_from(&[(10.0, 900), (20.0, 300), (30.0, 4000)]);
        let closest = scan.closest_point().unwrap();
        assert_eq!(closest.distance_mm, 300);
        assert_relative_eq!(closest.angle, 20.0);
        assert!(scan_from(&[]).closest_point().is_none());
    }

    #[test]
    fn range_filter_is_inclusive() {
        let scan = scan_from(&[(10.0, 900), (20.0, 2000), (30.0, 2001), (40.0, 100)]);
        let obstacles = scan.points_in_range(10.0, 30.0, 2000.0);
        let angles: Vec<f32> = obstacles.iter().map(|p| p.angle).collect();
        assert_eq!(angles, vec![10.0, 20.0]);
    }

    #[test]
    fn empty_sector_reports_sentinel() {
        // nothing between 135° and 180°
        let scan = scan_from(&[
            (10.0, 1000),
            (50.0, 1500),
            (100.0, 800),
            (200.0, 2000),
            (250.0, 2500),
            (300.0, 3000),
            (350.0, 3500),
        ]);
        let sectors = scan.sectors(8);
        assert_eq!(sectors.len(), 8);
        let sector = &sectors[3];
        assert_eq!(sector.index, 3);
        assert_relative_eq!(sector.angle_start, 135.0);
        assert_relative_eq!(sector.angle_end, 180.0);
        assert_relative_eq!(sector.min_distance, 12000.0);
        assert_relative_eq!(sector.avg_distance, 12000.0);
        assert_eq!(sector.point_count, 0);
    }

    #[test]
    fn sector_min_and_average() {
        let scan = scan_from(&[(0.0, 1000), (20.0, 3000), (44.9, 2000), (45.0, 10)]);
        let sectors = scan.sectors(8);
        assert_relative_eq!(sectors[0].min_distance, 1000.0);
        assert_relative_eq!(sectors[0].avg_distance, 2000.0);
        assert_eq!(sectors[0].point_count, 3);
        assert_eq!(sectors[1].point_count, 1);
        assert_relative_eq!(sectors[1].center_angle(), 67.5);
    }

    #[test]
    fn zero_sectors_is_empty() {
        assert!(scan_from(&[(0.0, 1000)]).sectors(0).is_empty());
        assert!(empty_sectors(0).is_empty());
    }

    #[test]
    fn missing_scan_sectors_are_defined() {
        let sectors = empty_sectors(4);
        assert_eq!(sectors.len(), 4);
        assert!(sectors.iter().all(|s| s.point_count == 0));
        assert_relative_eq!(sectors[3].angle_end, 360.0);
    }

    #[test]
    fn forward_point_projects_on_x_axis() {
        let point = LidarPoint::new(0.0, 2000, 0).position();
        assert_relative_eq!(point.x, 2.0);
        assert_relative_eq!(point.y, 0.0);
        let right = LidarPoint::new(90.0, 1000, 0).position();
        assert_relative_eq!(right.y, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn point_cloud_keeps_scan_order() {
        let scan = scan_from(&[(0.0, 1000), (270.0, 2000)]);
        let cloud = scan.point_cloud();
        assert_eq!(cloud.len(), 2);
        assert_relative_eq!(cloud[0].x, 1.0);
        // 270° clockwise is to the left
        assert_relative_eq!(cloud[1].y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(cloud[1].x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn message_rounds_angles() {
        let scan = scan_from(&[(12.345, 1000)]);
        let message = scan.to_message();
        assert_eq!(message.count, 1);
        assert_relative_eq!(message.points[0].angle, 12.3);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["points"][0]["distance"], 1000);
    }
}

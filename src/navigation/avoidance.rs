//! Stateless reactive obstacle avoidance.
//!
//! Every call takes a full sensor snapshot and the command the navigator
//! proposed, and returns the command to actually drive with.

use crate::driver::DriveCommand;
use crate::lidar::scan::{Sector, NO_OBSTACLE_MM};
use serde::Serialize;
use std::fmt;

pub const EMERGENCY_THRESHOLD_CM: i32 = 15;
pub const CLOSE_THRESHOLD_CM: i32 = 30;
pub const CAUTION_THRESHOLD_CM: i32 = 60;
/// Stand in for a missing ultrasonic reading
pub const NO_READING_CM: i32 = 999;

const EMERGENCY_THRESHOLD_MM: f32 = (EMERGENCY_THRESHOLD_CM * 10) as f32;
const CLOSE_THRESHOLD_MM: f32 = (CLOSE_THRESHOLD_CM * 10) as f32;
const CAUTION_THRESHOLD_MM: f32 = (CAUTION_THRESHOLD_CM * 10) as f32;
/// Sectors closer than this are the robot's own body
const MIN_SECTOR_DISTANCE_MM: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvoidanceAction {
    EmergencyStop,
    AvoidLeftSharp,
    AvoidRightSharp,
    BackupAndTurn,
    AdjustLeft,
    AdjustRight,
    SlowCaution,
    Clear,
    LidarEmergencyStop,
    LidarAvoidLeft,
    LidarAvoidRight,
    LidarBackup,
    LidarAdjustLeft,
    LidarAdjustRight,
    LidarSlow,
    LidarClear,
}

impl AvoidanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvoidanceAction::EmergencyStop => "EMERGENCY_STOP",
            AvoidanceAction::AvoidLeftSharp => "AVOID_LEFT_SHARP",
            AvoidanceAction::AvoidRightSharp => "AVOID_RIGHT_SHARP",
            AvoidanceAction::BackupAndTurn => "BACKUP_AND_TURN",
            AvoidanceAction::AdjustLeft => "ADJUST_LEFT",
            AvoidanceAction::AdjustRight => "ADJUST_RIGHT",
            AvoidanceAction::SlowCaution => "SLOW_CAUTION",
            AvoidanceAction::Clear => "CLEAR",
            AvoidanceAction::LidarEmergencyStop => "LIDAR_EMERGENCY_STOP",
            AvoidanceAction::LidarAvoidLeft => "LIDAR_AVOID_LEFT",
            AvoidanceAction::LidarAvoidRight => "LIDAR_AVOID_RIGHT",
            AvoidanceAction::LidarBackup => "LIDAR_BACKUP",
            AvoidanceAction::LidarAdjustLeft => "LIDAR_ADJUST_LEFT",
            AvoidanceAction::LidarAdjustRight => "LIDAR_ADJUST_RIGHT",
            AvoidanceAction::LidarSlow => "LIDAR_SLOW",
            AvoidanceAction::LidarClear => "LIDAR_CLEAR",
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, AvoidanceAction::Clear | AvoidanceAction::LidarClear)
    }
}

impl fmt::Display for AvoidanceAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvoidanceDecision {
    pub command: DriveCommand,
    pub action: AvoidanceAction,
}

impl AvoidanceDecision {
    fn new(throttle: i32, steering: i32, action: AvoidanceAction) -> Self {
        Self {
            command: DriveCommand::new(throttle, steering),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityStatus {
    Emergency,
    Close,
    Caution,
    Clear,
}

impl ProximityStatus {
    pub fn from_cm(distance_cm: i32) -> Self {
        if distance_cm < EMERGENCY_THRESHOLD_CM {
            ProximityStatus::Emergency
        } else if distance_cm < CLOSE_THRESHOLD_CM {
            ProximityStatus::Close
        } else if distance_cm < CAUTION_THRESHOLD_CM {
            ProximityStatus::Caution
        } else {
            ProximityStatus::Clear
        }
    }

    pub fn from_mm(distance_mm: f32) -> Self {
        if distance_mm < EMERGENCY_THRESHOLD_MM {
            ProximityStatus::Emergency
        } else if distance_mm < CLOSE_THRESHOLD_MM {
            ProximityStatus::Close
        } else if distance_mm < CAUTION_THRESHOLD_MM {
            ProximityStatus::Caution
        } else {
            ProximityStatus::Clear
        }
    }
}

/// Ultrasonic ranges in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UltrasonicReadings {
    pub front: i32,
    pub front_left: i32,
    pub front_right: i32,
    pub rear_left: i32,
    pub rear_right: i32,
}

impl Default for UltrasonicReadings {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

impl UltrasonicReadings {
    /// Reads `[front, front_left, front_right, rear_left, rear_right]`, missing entries count as clear
    pub fn from_slice(readings: &[i32]) -> Self {
        let reading = |index: usize| readings.get(index).copied().unwrap_or(NO_READING_CM);
        Self {
            front: reading(0),
            front_left: reading(1),
            front_right: reading(2),
            rear_left: reading(3),
            rear_right: reading(4),
        }
    }

    pub fn left_clearance(&self) -> i32 {
        self.front_left.min(self.rear_left)
    }

    pub fn right_clearance(&self) -> i32 {
        self.front_right.min(self.rear_right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObstacleAlert {
    EmergencyFront,
    ObstacleFront,
    ObstacleSide,
    Clear,
}

/// Quick yes/no check on the forward facing sensors
pub fn check_obstacles(readings: &UltrasonicReadings, threshold_cm: i32) -> (bool, ObstacleAlert) {
    if readings.front < EMERGENCY_THRESHOLD_CM {
        (true, ObstacleAlert::EmergencyFront)
    } else if readings.front < threshold_cm {
        (true, ObstacleAlert::ObstacleFront)
    } else if readings.front_left < threshold_cm || readings.front_right < threshold_cm {
        (true, ObstacleAlert::ObstacleSide)
    } else {
        (false, ObstacleAlert::Clear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectionStatus<T> {
    pub distance: T,
    pub status: ProximityStatus,
}

impl DirectionStatus<i32> {
    fn from_cm(distance: i32) -> Self {
        Self {
            distance,
            status: ProximityStatus::from_cm(distance),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UltrasonicObstacleMap {
    pub front: DirectionStatus<i32>,
    pub front_left: DirectionStatus<i32>,
    pub front_right: DirectionStatus<i32>,
    pub rear_left: DirectionStatus<i32>,
    pub rear_right: DirectionStatus<i32>,
}

pub fn obstacle_map(readings: &UltrasonicReadings) -> UltrasonicObstacleMap {
    UltrasonicObstacleMap {
        front: DirectionStatus::from_cm(readings.front),
        front_left: DirectionStatus::from_cm(readings.front_left),
        front_right: DirectionStatus::from_cm(readings.front_right),
        rear_left: DirectionStatus::from_cm(readings.rear_left),
        rear_right: DirectionStatus::from_cm(readings.rear_right),
    }
}

/// Speed limit from the closest forward reading
pub fn safe_speed(map: &UltrasonicObstacleMap, max_speed: i32) -> i32 {
    let closest = map
        .front
        .distance
        .min(map.front_left.distance)
        .min(map.front_right.distance);
    match ProximityStatus::from_cm(closest) {
        ProximityStatus::Emergency => 0,
        ProximityStatus::Close => max_speed.div_euclid(4),
        ProximityStatus::Caution => max_speed.div_euclid(2),
        ProximityStatus::Clear => max_speed,
    }
}

/// Steering toward the side with more room, half the clearance difference, capped at 80
pub fn avoidance_steering(readings: &UltrasonicReadings) -> i32 {
    let left = readings.left_clearance();
    let right = readings.right_clearance();
    if left > right {
        (-((left - right) / 2)).max(-80)
    } else {
        ((right - left) / 2).min(80)
    }
}

/// Ultrasonic avoidance, using the LIDAR's forward distance (cm) when it sees closer.
pub fn avoidance_command(
    readings: &UltrasonicReadings,
    lidar_front_cm: i32,
    current: DriveCommand,
) -> AvoidanceDecision {
    let front = readings.front.min(lidar_front_cm);
    let left = readings.left_clearance();
    let right = readings.right_clearance();

    match ProximityStatus::from_cm(front) {
        ProximityStatus::Emergency => AvoidanceDecision::new(0, 0, AvoidanceAction::EmergencyStop),
        ProximityStatus::Close => {
            let throttle = current.throttle.div_euclid(3).max(20);
            if left > right + 20 {
                AvoidanceDecision::new(throttle, -80, AvoidanceAction::AvoidLeftSharp)
            } else if right > left + 20 {
                AvoidanceDecision::new(throttle, 80, AvoidanceAction::AvoidRightSharp)
            } else {
                let steering = if right > left { 50 } else { -50 };
                AvoidanceDecision::new(-30, steering, AvoidanceAction::BackupAndTurn)
            }
        }
        ProximityStatus::Caution => {
            let throttle = ((current.throttle as f64 * 0.6) as i32).max(40);
            if left > right + 10 {
                let steering = (current.steering - 30).max(-50);
                AvoidanceDecision::new(throttle, steering, AvoidanceAction::AdjustLeft)
            } else if right > left + 10 {
                let steering = (current.steering + 30).min(50);
                AvoidanceDecision::new(throttle, steering, AvoidanceAction::AdjustRight)
            } else {
                AvoidanceDecision::new(throttle, current.steering, AvoidanceAction::SlowCaution)
            }
        }
        ProximityStatus::Clear => AvoidanceDecision {
            command: current,
            action: AvoidanceAction::Clear,
        },
    }
}

/// Compass zones around the robot, clockwise from the front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LidarZone {
    Front,
    FrontRight,
    Right,
    RearRight,
    Rear,
    RearLeft,
    Left,
    FrontLeft,
}

impl LidarZone {
    pub const ALL: [LidarZone; 8] = [
        LidarZone::Front,
        LidarZone::FrontRight,
        LidarZone::Right,
        LidarZone::RearRight,
        LidarZone::Rear,
        LidarZone::RearLeft,
        LidarZone::Left,
        LidarZone::FrontLeft,
    ];

    /// Zones are 45° wide and centered on the compass directions, front spans 337.5° to 22.5°
    pub fn from_angle(angle: f32) -> Self {
        let shifted = (angle + 22.5).rem_euclid(360.0);
        Self::ALL[(shifted / 45.0) as usize % Self::ALL.len()]
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LidarObstacleMap {
    zones: [DirectionStatus<f32>; 8],
}

impl LidarObstacleMap {
    pub fn zone(&self, zone: LidarZone) -> DirectionStatus<f32> {
        self.zones[zone.index()]
    }

    pub fn distance(&self, zone: LidarZone) -> f32 {
        self.zones[zone.index()].distance
    }

    pub fn iter(&self) -> impl Iterator<Item = (LidarZone, DirectionStatus<f32>)> + '_ {
        LidarZone::ALL.iter().copied().zip(self.zones.iter().copied())
    }
}

/// Minimum distance per compass zone from sector summaries
pub fn lidar_obstacle_map(sectors: &[Sector]) -> LidarObstacleMap {
    let mut zones = [DirectionStatus {
        distance: NO_OBSTACLE_MM,
        status: ProximityStatus::Clear,
    }; 8];
    for sector in sectors {
        if sector.min_distance < MIN_SECTOR_DISTANCE_MM {
            continue;
        }
        let zone = &mut zones[LidarZone::from_angle(sector.center_angle()).index()];
        if sector.min_distance < zone.distance {
            zone.distance = sector.min_distance;
            zone.status = ProximityStatus::from_mm(sector.min_distance);
        }
    }
    LidarObstacleMap { zones }
}

/// Avoidance over the full LIDAR revolution.
///
/// Front is the closest of the three forward zones, each side's room is the
/// mean of its forward diagonal and side zone.
pub fn lidar_avoidance_command(sectors: &[Sector], current: DriveCommand) -> AvoidanceDecision {
    let map = lidar_obstacle_map(sectors);
    let front = map.distance(LidarZone::Front);
    let front_left = map.distance(LidarZone::FrontLeft);
    let front_right = map.distance(LidarZone::FrontRight);
    let left_space = (front_left + map.distance(LidarZone::Left)) / 2.0;
    let right_space = (front_right + map.distance(LidarZone::Right)) / 2.0;
    let front_min = front.min(front_left).min(front_right);

    match ProximityStatus::from_mm(front_min) {
        ProximityStatus::Emergency => {
            AvoidanceDecision::new(0, 0, AvoidanceAction::LidarEmergencyStop)
        }
        ProximityStatus::Close => {
            let throttle = current.throttle.div_euclid(3).max(20);
            if left_space > right_space + 200.0 {
                AvoidanceDecision::new(throttle, -80, AvoidanceAction::LidarAvoidLeft)
            } else if right_space > left_space + 200.0 {
                AvoidanceDecision::new(throttle, 80, AvoidanceAction::LidarAvoidRight)
            } else {
                let steering = if right_space > left_space { 50 } else { -50 };
                AvoidanceDecision::new(-30, steering, AvoidanceAction::LidarBackup)
            }
        }
        ProximityStatus::Caution => {
            let throttle = ((current.throttle as f64 * 0.6) as i32).max(40);
            if left_space > right_space + 100.0 {
                let steering = (current.steering - 25).max(-50);
                AvoidanceDecision::new(throttle, steering, AvoidanceAction::LidarAdjustLeft)
            } else if right_space > left_space + 100.0 {
                let steering = (current.steering + 25).min(50);
                AvoidanceDecision::new(throttle, steering, AvoidanceAction::LidarAdjustRight)
            } else {
                AvoidanceDecision::new(throttle, current.steering, AvoidanceAction::LidarSlow)
            }
        }
        ProximityStatus::Clear => AvoidanceDecision {
            command: current,
            action: AvoidanceAction::LidarClear,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EscapeDirection {
    /// Sector center, degrees clockwise from the front
    pub angle: f32,
    pub avg_distance: f32,
}

/// The most open sector by average distance, the first one on ties
pub fn find_best_escape_direction(sectors: &[Sector]) -> Option<EscapeDirection> {
    sectors
        .iter()
        .filter(|sector| sector.avg_distance > 0.0)
        .fold(None, |best: Option<&Sector>, sector| match best {
            Some(best) if best.avg_distance >= sector.avg_distance => Some(best),
            _ => Some(sector),
        })
        .map(|sector| EscapeDirection {
            angle: sector.center_angle(),
            avg_distance: sector.avg_distance,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lidar::scan::empty_sectors;
    use approx::assert_relative_eq;

    fn readings(values: [i32; 5]) -> UltrasonicReadings {
        UltrasonicReadings::from_slice(&values)
    }

    fn cruising() -> DriveCommand {
        DriveCommand::new(70, 10)
    }

    /// Eight sectors with the given minimum (and average) distances
    fn sectors(distances: [f32; 8]) -> Vec<Sector> {
        let mut sectors = empty_sectors(8);
        for (sector, distance) in sectors.iter_mut().zip(distances) {
            sector.min_distance = distance;
            sector.avg_distance = distance;
            sector.point_count = 1;
        }
        sectors
    }

    #[test]
    fn front_emergency_stops() {
        let readings = readings([10, 200, 200, 200, 200]);
        assert_eq!(
            check_obstacles(&readings, CLOSE_THRESHOLD_CM),
            (true, ObstacleAlert::EmergencyFront)
        );
        let decision = avoidance_command(&readings, NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::EmergencyStop);
        assert_eq!(decision.command, DriveCommand::neutral());
    }

    #[test]
    fn balanced_fifty_cm_slows_eighty_cm_is_clear() {
        let readings = readings([50, 100, 100, 100, 100]);
        assert_eq!(
            check_obstacles(&readings, CLOSE_THRESHOLD_CM),
            (false, ObstacleAlert::Clear)
        );
        // no alert at 50 cm but still inside the caution band
        let decision = avoidance_command(&readings, NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::SlowCaution);
        assert_eq!(decision.command, DriveCommand::new(42, 10));

        let decision = avoidance_command(&readings_with_front(80), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::Clear);
        assert_eq!(decision.command, cruising());
    }

    fn readings_with_front(front: i32) -> UltrasonicReadings {
        readings([front, 100, 100, 100, 100])
    }

    #[test]
    fn side_obstacle_detected() {
        let readings = readings([100, 20, 100, 100, 100]);
        assert_eq!(
            check_obstacles(&readings, CLOSE_THRESHOLD_CM),
            (true, ObstacleAlert::ObstacleSide)
        );
        assert_eq!(
            check_obstacles(&readings_with_front(25), CLOSE_THRESHOLD_CM),
            (true, ObstacleAlert::ObstacleFront)
        );
    }

    #[test]
    fn close_obstacle_turns_sharply_to_open_side() {
        let decision = avoidance_command(&readings([25, 100, 40, 120, 40]), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::AvoidLeftSharp);
        assert_eq!(decision.command, DriveCommand::new(23, -80));

        let decision = avoidance_command(&readings([25, 40, 100, 40, 100]), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::AvoidRightSharp);
        assert_eq!(decision.command.steering, 80);
    }

    #[test]
    fn boxed_in_backs_up() {
        let decision = avoidance_command(&readings([25, 50, 60, 50, 60]), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::BackupAndTurn);
        assert_eq!(decision.command, DriveCommand::new(-30, 50));

        let decision = avoidance_command(&readings([25, 50, 50, 50, 50]), NO_READING_CM, cruising());
        assert_eq!(decision.command, DriveCommand::new(-30, -50));
    }

    #[test]
    fn slow_throttle_has_floor_when_close() {
        let decision = avoidance_command(
            &readings([25, 100, 40, 100, 40]),
            NO_READING_CM,
            DriveCommand::new(30, 0),
        );
        assert_eq!(decision.command.throttle, 20);
    }

    #[test]
    fn caution_nudges_steering() {
        let decision = avoidance_command(&readings([45, 80, 60, 80, 60]), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::AdjustLeft);
        assert_eq!(decision.command, DriveCommand::new(42, -20));

        let decision = avoidance_command(
            &readings([45, 60, 80, 60, 80]),
            NO_READING_CM,
            DriveCommand::new(70, 40),
        );
        assert_eq!(decision.action, AvoidanceAction::AdjustRight);
        assert_eq!(decision.command.steering, 50);

        let decision = avoidance_command(&readings([45, 60, 65, 60, 65]), NO_READING_CM, cruising());
        assert_eq!(decision.action, AvoidanceAction::SlowCaution);
        assert_eq!(decision.command, DriveCommand::new(42, 10));
    }

    #[test]
    fn lidar_front_overrides_ultrasonic() {
        let decision = avoidance_command(&readings_with_front(200), 12, cruising());
        assert_eq!(decision.action, AvoidanceAction::EmergencyStop);
    }

    #[test]
    fn obstacle_map_and_safe_speed() {
        let map = obstacle_map(&UltrasonicReadings::from_slice(&[50, 25]));
        assert_eq!(map.front.status, ProximityStatus::Caution);
        assert_eq!(map.front_left.status, ProximityStatus::Close);
        assert_eq!(map.rear_right.distance, NO_READING_CM);
        assert_eq!(map.rear_right.status, ProximityStatus::Clear);
        assert_eq!(safe_speed(&map, 100), 25);
        assert_eq!(safe_speed(&obstacle_map(&readings_with_front(45)), 100), 50);
        assert_eq!(safe_speed(&obstacle_map(&readings_with_front(5)), 100), 0);
        assert_eq!(safe_speed(&obstacle_map(&readings_with_front(300)), 90), 90);
    }

    #[test]
    fn steering_toward_free_space() {
        assert_eq!(avoidance_steering(&readings([0, 100, 40, 100, 40])), -30);
        assert_eq!(avoidance_steering(&readings([0, 40, 400, 40, 400])), 80);
        assert_eq!(avoidance_steering(&readings([0, 41, 40, 41, 40])), 0);
    }

    #[test]
    fn zones_follow_sector_centers() {
        assert_eq!(LidarZone::from_angle(0.0), LidarZone::Front);
        assert_eq!(LidarZone::from_angle(350.0), LidarZone::Front);
        assert_eq!(LidarZone::from_angle(22.5), LidarZone::FrontRight);
        assert_eq!(LidarZone::from_angle(90.0), LidarZone::Right);
        assert_eq!(LidarZone::from_angle(180.0), LidarZone::Rear);
        assert_eq!(LidarZone::from_angle(270.0), LidarZone::Left);
        assert_eq!(LidarZone::from_angle(337.4), LidarZone::FrontLeft);
    }

    #[test]
    fn lidar_map_keeps_zone_minimum() {
        // 16 sectors, two per zone; the front zone gets 0°-22.5° and 337.5°-360°
        let mut sectors = empty_sectors(16);
        sectors[0].min_distance = 800.0;
        sectors[15].min_distance = 450.0;
        sectors[4].min_distance = 5.0;
        let map = lidar_obstacle_map(&sectors);
        assert_relative_eq!(map.distance(LidarZone::Front), 450.0);
        assert_eq!(map.zone(LidarZone::Front).status, ProximityStatus::Caution);
        // under 10 mm is ignored
        assert_relative_eq!(map.distance(LidarZone::Right), NO_OBSTACLE_MM);
        assert_eq!(map.iter().count(), 8);
    }

    #[test]
    fn lidar_emergency_and_clear() {
        let clear = sectors([3000.0; 8]);
        let decision = lidar_avoidance_command(&clear, cruising());
        assert_eq!(decision.action, AvoidanceAction::LidarClear);
        assert_eq!(decision.command, cruising());

        let mut blocked = [3000.0; 8];
        blocked[7] = 120.0;
        let decision = lidar_avoidance_command(&sectors(blocked), cruising());
        assert_eq!(decision.action, AvoidanceAction::LidarEmergencyStop);
        assert_eq!(decision.command, DriveCommand::neutral());
    }

    #[test]
    fn lidar_close_picks_open_side() {
        // sector centers 22.5, 67.5, ... land in front right, right, ... and 337.5 in front
        let mut distances = [3000.0; 8];
        distances[0] = 250.0;
        distances[1] = 400.0;
        let decision = lidar_avoidance_command(&sectors(distances), cruising());
        // right space is (250 + 400) / 2, left space 3000
        assert_eq!(decision.action, AvoidanceAction::LidarAvoidLeft);
        assert_eq!(decision.command, DriveCommand::new(23, -80));

        let boxed = [250.0, 3000.0, 3000.0, 3000.0, 3000.0, 3000.0, 250.0, 3000.0];
        let decision = lidar_avoidance_command(&sectors(boxed), cruising());
        assert_eq!(decision.action, AvoidanceAction::LidarBackup);
        assert_eq!(decision.command, DriveCommand::new(-30, -50));
    }

    #[test]
    fn lidar_caution_nudges() {
        let mut distances = [3000.0; 8];
        distances[6] = 500.0;
        let decision = lidar_avoidance_command(&sectors(distances), cruising());
        assert_eq!(decision.action, AvoidanceAction::LidarAdjustRight);
        assert_eq!(decision.command, DriveCommand::new(42, 35));

        let both = [500.0, 3000.0, 3000.0, 3000.0, 3000.0, 3000.0, 500.0, 3000.0];
        let decision = lidar_avoidance_command(&sectors(both), cruising());
        assert_eq!(decision.action, AvoidanceAction::LidarSlow);
        assert_eq!(decision.command, DriveCommand::new(42, 10));
    }

    #[test]
    fn escape_toward_most_open_sector() {
        let sectors = sectors([500.0, 900.0, 4000.0, 700.0, 4000.0, 300.0, 200.0, 100.0]);
        let escape = find_best_escape_direction(&sectors).unwrap();
        assert_relative_eq!(escape.angle, 112.5);
        assert_relative_eq!(escape.avg_distance, 4000.0);
        assert!(find_best_escape_direction(&[]).is_none());
    }

    #[test]
    fn actions_render_as_tags() {
        assert_eq!(AvoidanceAction::EmergencyStop.to_string(), "EMERGENCY_STOP");
        assert_eq!(
            serde_json::to_value(AvoidanceAction::LidarAdjustLeft).unwrap(),
            "LIDAR_ADJUST_LEFT"
        );
        assert!(AvoidanceAction::LidarClear.is_clear());
    }
}

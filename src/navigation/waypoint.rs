use super::route::{route_distance, route_legs, RouteLeg, RouteOptimizer};
use super::NavigationConfig;
use crate::driver::DriveCommand;
use crate::geo::{normalize_heading_error, GeoPoint};
use serde::Serialize;
use tracing::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionProgress {
    pub total_distance: f64,
    pub completed_distance: f64,
    pub remaining_distance: f64,
    pub progress_percent: f64,
    /// One based
    pub current_waypoint: usize,
    pub total_waypoints: usize,
}

/// Mission waypoints, the planned route over them and progress along it.
#[derive(Debug, Clone)]
pub struct WaypointNavigator {
    config: NavigationConfig,
    optimizer: RouteOptimizer,
    waypoints: Vec<GeoPoint>,
    route: Vec<GeoPoint>,
    cursor: usize,
}

impl WaypointNavigator {
    pub fn new(config: NavigationConfig) -> Self {
        Self {
            optimizer: RouteOptimizer::new(config.two_opt_iterations),
            config,
            waypoints: vec![],
            route: vec![],
            cursor: 0,
        }
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn add_waypoint(&mut self, lat: f64, lng: f64, name: impl Into<String>) {
        self.push_waypoint(GeoPoint::new(lat, lng, name));
    }

    pub fn push_waypoint(&mut self, waypoint: GeoPoint) {
        debug!("Added waypoint {}", waypoint);
        self.waypoints.push(waypoint);
    }

    pub fn waypoints(&self) -> &[GeoPoint] {
        &self.waypoints
    }

    pub fn clear_waypoints(&mut self) {
        self.waypoints.clear();
        self.route.clear();
        self.cursor = 0;
    }

    /// Orders the waypoints into a route, restarting progress.
    ///
    /// Input order is kept when `optimize` is off or there are at most two waypoints.
    pub fn plan_route(&mut self, optimize: bool) -> &[GeoPoint] {
        self.route = if !optimize || self.waypoints.len() <= 2 {
            self.waypoints.clone()
        } else {
            self.optimizer.nearest_neighbor(&self.waypoints)
        };
        self.cursor = 0;
        info!(
            "Planned route over {} waypoints, {:.1} m",
            self.route.len(),
            self.total_distance()
        );
        &self.route
    }

    /// Refines the current route with 2-opt. Returns the number of improving swaps.
    pub fn optimize_route(&mut self) -> usize {
        let swaps = self.optimizer.two_opt(&mut self.route);
        self.cursor = 0;
        swaps
    }

    pub fn route(&self) -> &[GeoPoint] {
        &self.route
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total_distance(&self) -> f64 {
        route_distance(&self.route)
    }

    pub fn route_legs(&self) -> Vec<RouteLeg> {
        route_legs(&self.route)
    }

    pub fn next_target(&self) -> Option<&GeoPoint> {
        self.route.get(self.cursor)
    }

    /// True once every waypoint of a non empty route was reached
    pub fn is_complete(&self) -> bool {
        !self.route.is_empty() && self.cursor >= self.route.len()
    }

    /// Advances past the target when within the configured threshold.
    pub fn update_position(&mut self, position: &GeoPoint) -> bool {
        self.update_position_within(position, self.config.waypoint_threshold_m)
    }

    pub fn update_position_within(&mut self, position: &GeoPoint, threshold_m: f64) -> bool {
        let Some(target) = self.next_target() else {
            return false;
        };
        let distance = position.distance_to(target);
        if distance < threshold_m {
            info!(
                "Reached waypoint {} ({}/{})",
                target,
                self.cursor + 1,
                self.route.len()
            );
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Proportional steering toward the target with distance and heading based throttle.
    ///
    /// Neutral once the route is done or empty.
    pub fn navigation_command(&self, position: &GeoPoint, heading_deg: f64) -> DriveCommand {
        let Some(target) = self.next_target() else {
            return DriveCommand::neutral();
        };
        let heading_error = normalize_heading_error(position.bearing_to(target) - heading_deg);
        let max_steering = self.config.max_steering;
        let steering =
            ((heading_error / 180.0 * max_steering as f64) as i32).clamp(-max_steering, max_steering);
        let throttle = dynamic_throttle(
            position.distance_to(target),
            heading_error.abs(),
            self.config.min_throttle,
            self.config.max_throttle,
        );
        DriveCommand::new(throttle, steering)
    }

    pub fn mission_progress(&self) -> MissionProgress {
        let total_distance = self.total_distance();
        let completed_distance = route_distance(&self.route[..self.cursor.min(self.route.len())]);
        let progress_percent = if total_distance > 0.0 {
            completed_distance / total_distance * 100.0
        } else {
            0.0
        };
        MissionProgress {
            total_distance,
            completed_distance,
            remaining_distance: total_distance - completed_distance,
            progress_percent,
            current_waypoint: self.cursor + 1,
            total_waypoints: self.route.len(),
        }
    }
}

fn distance_factor(distance_m: f64) -> f64 {
    if distance_m < 2.0 {
        0.3
    } else if distance_m < 5.0 {
        0.5
    } else if distance_m < 10.0 {
        0.7
    } else {
        1.0
    }
}

fn heading_factor(heading_error_abs: f64) -> f64 {
    if heading_error_abs > 90.0 {
        0.3
    } else if heading_error_abs > 45.0 {
        0.5
    } else if heading_error_abs > 20.0 {
        0.7
    } else {
        1.0
    }
}

/// Slows down near the target or when a large turn is needed, whichever is stricter
pub fn dynamic_throttle(
    distance_m: f64,
    heading_error_abs: f64,
    min_throttle: i32,
    max_throttle: i32,
) -> i32 {
    let factor = distance_factor(distance_m).min(heading_factor(heading_error_abs));
    ((max_throttle as f64 * factor) as i32).clamp(min_throttle, max_throttle)
}

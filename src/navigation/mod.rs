pub mod avoidance;
pub mod route;
pub mod waypoint;

pub use route::{RouteLeg, RouteOptimizer};
pub use waypoint::{MissionProgress, WaypointNavigator};

use crate::error::Result;
use crate::geo::GeoPoint;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct NavigationConfig {
    #[serde(default = "default_waypoint_threshold_m")]
    pub waypoint_threshold_m: f64,
    #[serde(default = "default_max_steering")]
    pub max_steering: i32,
    #[serde(default = "default_min_throttle")]
    pub min_throttle: i32,
    #[serde(default = "default_max_throttle")]
    pub max_throttle: i32,
    #[serde(default = "default_two_opt_iterations")]
    pub two_opt_iterations: usize,
    /// Nearest neighbor ordering plus 2-opt when starting a mission
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_waypoint_threshold_m() -> f64 {
    5.0
}

fn default_max_steering() -> i32 {
    100
}

fn default_min_throttle() -> i32 {
    30
}

fn default_max_throttle() -> i32 {
    100
}

fn default_two_opt_iterations() -> usize {
    route::DEFAULT_TWO_OPT_ITERATIONS
}

fn default_optimize() -> bool {
    true
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            waypoint_threshold_m: default_waypoint_threshold_m(),
            max_steering: default_max_steering(),
            min_throttle: default_min_throttle(),
            max_throttle: default_max_throttle(),
            two_opt_iterations: default_two_opt_iterations(),
            optimize: default_optimize(),
        }
    }
}

/// Parses a mission, a JSON list of `{"lat", "lng", "name"}` objects
pub fn parse_mission(json: &str) -> Result<Vec<GeoPoint>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_mission(path: &Path) -> Result<Vec<GeoPoint>> {
    let json = std::fs::read_to_string(path)?;
    parse_mission(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_mission_parses() {
        let mission = parse_mission(include_str!("../../config/mission.json")).unwrap();
        assert_eq!(mission.len(), 4);
        assert_eq!(mission[0].name(), "Start");
    }

    #[test]
    fn malformed_mission_is_an_error() {
        assert!(parse_mission(r#"[{"lat": 1.0}]"#).is_err());
        assert!(parse_mission("[]").unwrap().is_empty());
    }

    #[test]
    fn missing_mission_file_is_an_error() {
        assert!(load_mission(Path::new("/definitely/not/here.json")).is_err());
    }
}

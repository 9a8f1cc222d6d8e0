use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A named position on a spherical earth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
    #[serde(default)]
    name: String,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64, name: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            name: name.into(),
        }
    }

    pub fn unnamed(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, "")
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Haversine distance in meters
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let sin_dlat_half = (dlat / 2.0).sin();
        let sin_dlng_half = (dlng / 2.0).sin();
        let a = sin_dlat_half * sin_dlat_half
            + lat1.cos() * lat2.cos() * sin_dlng_half * sin_dlng_half;
        // rounding can push `a` a hair above 1.0 for antipodal points
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }

    /// Initial bearing in degrees, clockwise from north, in [0, 360)
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let y = dlng.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
        let bearing = y.atan2(x).to_degrees();
        (bearing + 360.0) % 360.0
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:.6}, {:.6})", self.name, self.lat, self.lng)
    }
}

/// Wraps an angle difference into (-180, 180]
pub fn normalize_heading_error(angle: f64) -> f64 {
    let mut wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped -= 360.0;
    } else if wrapped <= -180.0 {
        wrapped += 360.0;
    }
    wrapped
}

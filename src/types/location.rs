//! Geographic locations and postal addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale used for the fixed-point coordinate representation (micro-degrees).
const COORDINATE_SCALE: f64 = 1_000_000.0;

/// A geographic point with fixed-precision coordinates.
///
/// Latitude and longitude are stored as micro-degree integers so that
/// equality and hashing are exact. Locations are used as matrix keys by the
/// location cache; a float-keyed map would make cache hits depend on
/// formatting noise in the input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    lat: i64,
    lng: i64,
}

impl Location {
    pub fn new(lat: i64, lng: i64) -> Self {
        Self { lat, lng }
    }

    /// Build a location from decimal degrees.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            lat: (latitude * COORDINATE_SCALE).round() as i64,
            lng: (longitude * COORDINATE_SCALE).round() as i64,
        }
    }

    /// Parse a location from textual coordinates as they appear in problem files.
    pub fn parse(latitude: &str, longitude: &str) -> Option<Self> {
        let lat: f64 = latitude.trim().parse().ok()?;
        let lng: f64 = longitude.trim().parse().ok()?;
        Some(Self::from_degrees(lat, lng))
    }

    pub fn latitude(&self) -> f64 {
        self.lat as f64 / COORDINATE_SCALE
    }

    pub fn longitude(&self) -> f64 {
        self.lng as f64 / COORDINATE_SCALE
    }

    /// Raw fixed-point coordinates, used for hashing and graph export.
    pub fn fixed_point(&self) -> (i64, i64) {
        (self.lat, self.lng)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude(), self.longitude())
    }
}

/// A postal address of a service user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub road: String,
    #[serde(default)]
    pub house_number: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub post_code: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {} {}",
            self.house_number, self.road, self.city, self.post_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_degrees_round_trips() {
        let location = Location::from_degrees(53.430252, -1.354444);
        assert!((location.latitude() - 53.430252).abs() < 1e-6);
        assert!((location.longitude() + 1.354444).abs() < 1e-6);
    }

    #[test]
    fn test_equality_is_exact_on_fixed_point() {
        let a = Location::from_degrees(53.430252, -1.354444);
        let b = Location::parse("53.430252", "-1.354444").unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Location::parse("not-a-number", "0").is_none());
        assert!(Location::parse("53.4", "east").is_none());
    }

    #[test]
    fn test_nearby_points_stay_distinct() {
        let a = Location::from_degrees(53.430252, -1.354444);
        let b = Location::from_degrees(53.430253, -1.354444);
        assert_ne!(a, b);
    }
}

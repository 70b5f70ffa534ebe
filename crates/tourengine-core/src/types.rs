//! Core types for the tour engine

use serde::{Deserialize, Serialize};

pub mod progress;
pub mod tour;

pub use progress::{NotificationPreferences, ProximityAlert, TourProgress};
pub use tour::{
    Cached, CachedAsset, Media, MediaType, Site, SiteMediaLink, SiteWithMedia, Tour, TourWithSites,
};

/// A point on the Earth's surface in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = String;

    /// Parse `"lat,lon"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lon', got '{}'", s))?;
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
        let longitude: f64 = lon
            .trim()
            .parse()
            .map_err(|e| format!("invalid longitude '{}': {}", lon.trim(), e))?;

        let coord = Coordinate::new(latitude, longitude);
        if !coord.is_valid() {
            return Err(format!("coordinate out of range: {}", s));
        }
        Ok(coord)
    }
}

/// A single fix reported by a location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    /// Direction of travel in degrees from true north, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Position {
    pub fn new(coordinate: Coordinate, accuracy_m: f64, timestamp: i64) -> Self {
        Self {
            coordinate,
            accuracy_m,
            heading: None,
            timestamp,
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_parse() {
        let c: Coordinate = "51.5007, -0.1246".parse().unwrap();
        assert_eq!(c, Coordinate::new(51.5007, -0.1246));
    }

    #[test]
    fn test_coordinate_parse_rejects_out_of_range() {
        assert!("91.0,0.0".parse::<Coordinate>().is_err());
        assert!("0.0,181.0".parse::<Coordinate>().is_err());
        assert!("not a coordinate".parse::<Coordinate>().is_err());
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(0.0, 0.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }
}

//! Great-circle distance and human-readable distance/time formatting.

use crate::types::Coordinate;

/// Mean Earth radius used by the Haversine formula, meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Average walking speed, meters per minute (5 km/h)
pub const WALKING_SPEED_M_PER_MIN: f64 = 83.33;

/// Haversine great-circle distance between two coordinates, in meters.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Consumer-facing alias for [`distance`].
pub fn calculate_distance(a: Coordinate, b: Coordinate) -> f64 {
    distance(a, b)
}

/// Format a distance: whole meters below one kilometer, otherwise km with one decimal.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round() as i64)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// Estimate walking time for a distance at 5 km/h.
///
/// Yields `"N min"` below an hour and `"H hr M min"` otherwise.
pub fn estimate_walking_time(meters: f64) -> String {
    let minutes = (meters.max(0.0) / WALKING_SPEED_M_PER_MIN).ceil() as u64;
    if minutes < 60 {
        format!("{} min", minutes)
    } else {
        format!("{} hr {} min", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON: Coordinate = Coordinate::new(51.5074, -0.1278);
    const PARIS: Coordinate = Coordinate::new(48.8566, 2.3522);

    #[test]
    fn test_known_distance() {
        let d = distance(LONDON, PARIS);
        // ~343.5 km
        assert!((d - 343_560.0).abs() < 1_000.0, "got {}", d);
    }

    #[test]
    fn test_identity_and_symmetry() {
        assert_eq!(distance(LONDON, LONDON), 0.0);
        assert_eq!(distance(LONDON, PARIS), distance(PARIS, LONDON));
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn test_antipodal_points_do_not_nan() {
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - EARTH_RADIUS_METERS * std::f64::consts::PI).abs() < 1.0);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.0), "0 m");
        assert_eq!(format_distance(123.4), "123 m");
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(1000.0), "1.0 km");
        assert_eq!(format_distance(2345.0), "2.3 km");
    }

    #[test]
    fn test_estimate_walking_time() {
        assert_eq!(estimate_walking_time(0.0), "0 min");
        assert_eq!(estimate_walking_time(83.33), "1 min");
        assert_eq!(estimate_walking_time(500.0), "7 min");
        assert_eq!(estimate_walking_time(4_900.0), "59 min");
        assert_eq!(estimate_walking_time(4_990.0), "1 hr 0 min");
        assert_eq!(estimate_walking_time(10_000.0), "2 hr 1 min");
    }
}

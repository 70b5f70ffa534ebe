//! Nearest-neighbour route ordering for self-serve tours.
//!
//! The heuristic is greedy and O(n²): it does not find the optimal tour, but
//! for a fixed input order it always produces the same ordering. Exact ties
//! go to the site that appears first in the input.

use crate::geo::{distance, estimate_walking_time};
use crate::types::{Coordinate, Site, SiteWithMedia};

/// Anything with a position on the map
pub trait Located {
    fn coordinate(&self) -> Coordinate;
}

impl Located for Coordinate {
    fn coordinate(&self) -> Coordinate {
        *self
    }
}

impl Located for Site {
    fn coordinate(&self) -> Coordinate {
        Site::coordinate(self)
    }
}

impl Located for SiteWithMedia {
    fn coordinate(&self) -> Coordinate {
        self.site.coordinate()
    }
}

impl<T: Located> Located for &T {
    fn coordinate(&self) -> Coordinate {
        (*self).coordinate()
    }
}

/// Order `sites` with the nearest-neighbour heuristic.
///
/// With a `start` location the first stop is the site nearest to it,
/// otherwise it is the first input site. Every following stop is the
/// nearest site not yet visited. The result is always a permutation of
/// the input.
pub fn optimize_route<T: Located + Clone>(sites: &[T], start: Option<Coordinate>) -> Vec<T> {
    if sites.len() <= 1 {
        return sites.to_vec();
    }

    let mut remaining: Vec<usize> = (0..sites.len()).collect();
    let mut ordered = Vec::with_capacity(sites.len());

    let first = match start {
        Some(origin) => nearest(sites, &remaining, origin),
        None => 0,
    };
    let first = remaining.remove(first);
    let mut current = sites[first].coordinate();
    ordered.push(sites[first].clone());

    while !remaining.is_empty() {
        let pos = nearest(sites, &remaining, current);
        let idx = remaining.remove(pos);
        current = sites[idx].coordinate();
        ordered.push(sites[idx].clone());
    }

    ordered
}

/// Sum of consecutive-pair distances in the given order, meters.
pub fn total_route_distance<T: Located>(sites: &[T]) -> f64 {
    sites
        .windows(2)
        .map(|pair| distance(pair[0].coordinate(), pair[1].coordinate()))
        .sum()
}

/// An ordered route with its length and walking time
#[derive(Debug, Clone)]
pub struct RouteSummary<T> {
    pub stops: Vec<T>,
    pub total_distance_m: f64,
    pub walking_time: String,
}

/// Optimize `sites` and measure the resulting route.
pub fn summarize_route<T: Located + Clone>(
    sites: &[T],
    start: Option<Coordinate>,
) -> RouteSummary<T> {
    let stops = optimize_route(sites, start);
    let total_distance_m = total_route_distance(&stops);
    RouteSummary {
        walking_time: estimate_walking_time(total_distance_m),
        total_distance_m,
        stops,
    }
}

/// Position in `remaining` of the site nearest to `from`; first wins on ties.
fn nearest<T: Located>(sites: &[T], remaining: &[usize], from: Coordinate) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (pos, &idx) in remaining.iter().enumerate() {
        let d = distance(from, sites[idx].coordinate());
        if d < best_distance {
            best = pos;
            best_distance = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon)
    }

    #[test]
    fn test_empty_and_single_unchanged() {
        let empty: Vec<Coordinate> = Vec::new();
        assert!(optimize_route(&empty, None).is_empty());

        let one = vec![c(1.0, 1.0)];
        assert_eq!(optimize_route(&one, Some(c(50.0, 50.0))), one);
    }

    #[test]
    fn test_starts_at_first_input_without_start() {
        let sites = vec![c(0.0, 0.03), c(0.0, 0.0), c(0.0, 0.01)];
        let route = optimize_route(&sites, None);
        assert_eq!(route, vec![c(0.0, 0.03), c(0.0, 0.01), c(0.0, 0.0)]);
    }

    #[test]
    fn test_starts_at_site_nearest_to_start() {
        let sites = vec![c(0.0, 0.0), c(0.0, 0.01), c(0.0, 0.02)];
        let route = optimize_route(&sites, Some(c(0.0, 0.021)));
        assert_eq!(route, vec![c(0.0, 0.02), c(0.0, 0.01), c(0.0, 0.0)]);
    }

    #[test]
    fn test_exact_tie_goes_to_first_encountered() {
        // Both candidates are exactly 0.01° of longitude from the start
        let sites = vec![c(0.0, 0.0), c(0.0, 0.01), c(0.0, -0.01)];
        let route = optimize_route(&sites, None);
        assert_eq!(route[1], c(0.0, 0.01));
    }

    #[test]
    fn test_total_route_distance_sums_hops() {
        let sites = vec![c(0.0, 0.0), c(0.0, 0.01), c(0.0, 0.03)];
        let expected = distance(sites[0], sites[1]) + distance(sites[1], sites[2]);
        assert!((total_route_distance(&sites) - expected).abs() < 1e-9);
        assert_eq!(total_route_distance(&sites[..1]), 0.0);
    }

    #[test]
    fn test_summary_matches_route() {
        let sites = vec![c(0.0, 0.0), c(0.0, 0.02), c(0.0, 0.01)];
        let summary = summarize_route(&sites, None);
        assert_eq!(summary.stops, vec![c(0.0, 0.0), c(0.0, 0.01), c(0.0, 0.02)]);
        assert!((summary.total_distance_m - total_route_distance(&summary.stops)).abs() < 1e-9);
        assert_eq!(summary.walking_time, estimate_walking_time(summary.total_distance_m));
    }
}

//! Property-based tests for distance, route ordering and progress tracking
//!
//! Uses proptest to verify the invariants that hold for any input.

use proptest::prelude::*;
use tourengine_core::clock::ManualClock;
use tourengine_core::{distance, optimize_route, total_route_distance, Coordinate, TourState};

// ============================================================================
// Strategy Generators
// ============================================================================

/// Any valid coordinate on the globe
fn coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
}

/// Coordinates within a few kilometers of a city center
fn city_coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (50.0f64..50.05, 8.0f64..8.05).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
}

fn route_strategy(max_sites: usize) -> impl Strategy<Value = Vec<Coordinate>> {
    prop::collection::vec(city_coordinate_strategy(), 0..max_sites)
}

/// Indexes into a pool of site ids, with repeats
fn visit_sequence_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..8usize, 0..30)
}

fn sorted_bits(coords: &[Coordinate]) -> Vec<(u64, u64)> {
    let mut bits: Vec<_> = coords
        .iter()
        .map(|c| (c.latitude.to_bits(), c.longitude.to_bits()))
        .collect();
    bits.sort_unstable();
    bits
}

// ============================================================================
// Distance Properties
// ============================================================================

proptest! {
    /// Distance is the same in both directions
    #[test]
    fn distance_is_symmetric(a in coordinate_strategy(), b in coordinate_strategy()) {
        let ab = distance(a, b);
        let ba = distance(b, a);
        prop_assert!((ab - ba).abs() < 1e-6, "{} != {}", ab, ba);
    }

    /// A point is at distance zero from itself
    #[test]
    fn distance_to_self_is_zero(a in coordinate_strategy()) {
        prop_assert!(distance(a, a).abs() < 1e-9);
    }

    /// Distances are finite, non-negative and bounded by half the circumference
    #[test]
    fn distance_is_bounded(a in coordinate_strategy(), b in coordinate_strategy()) {
        let d = distance(a, b);
        prop_assert!(d.is_finite());
        prop_assert!(d >= 0.0);
        prop_assert!(d <= std::f64::consts::PI * 6_371_000.0 + 1e-3);
    }

    /// Going through a third point is never shorter
    #[test]
    fn distance_triangle_inequality(
        a in city_coordinate_strategy(),
        b in city_coordinate_strategy(),
        c in city_coordinate_strategy(),
    ) {
        prop_assert!(distance(a, c) <= distance(a, b) + distance(b, c) + 1e-6);
    }
}

// ============================================================================
// Route Properties
// ============================================================================

proptest! {
    /// The optimized route visits every input site exactly once
    #[test]
    fn route_is_permutation(sites in route_strategy(25), start in prop::option::of(city_coordinate_strategy())) {
        let route = optimize_route(&sites, start);
        prop_assert_eq!(route.len(), sites.len());
        prop_assert_eq!(sorted_bits(&route), sorted_bits(&sites));
    }

    /// The same input always yields the same order
    #[test]
    fn route_is_deterministic(sites in route_strategy(25), start in prop::option::of(city_coordinate_strategy())) {
        prop_assert_eq!(optimize_route(&sites, start), optimize_route(&sites, start));
    }

    /// With a start, the first stop is a site nearest to it
    #[test]
    fn route_starts_nearest_to_start(sites in route_strategy(25), start in city_coordinate_strategy()) {
        prop_assume!(!sites.is_empty());
        let route = optimize_route(&sites, Some(start));
        let first = distance(start, route[0]);
        for site in &sites {
            prop_assert!(first <= distance(start, *site));
        }
    }

    /// Without a start, the route begins at the first input site
    #[test]
    fn route_starts_at_first_input(sites in route_strategy(25)) {
        prop_assume!(!sites.is_empty());
        prop_assert_eq!(optimize_route(&sites, None)[0], sites[0]);
    }

    /// Each hop goes to the nearest site not yet visited
    #[test]
    fn route_hops_are_greedy(sites in route_strategy(15)) {
        let route = optimize_route(&sites, None);
        for i in 1..route.len() {
            let hop = distance(route[i - 1], route[i]);
            for later in &route[i..] {
                prop_assert!(hop <= distance(route[i - 1], *later));
            }
        }
    }

    /// Total distance is the sum of consecutive hops
    #[test]
    fn total_distance_is_sum_of_hops(sites in route_strategy(25)) {
        let route = optimize_route(&sites, None);
        let hops: f64 = route.windows(2).map(|w| distance(w[0], w[1])).sum();
        prop_assert!((total_route_distance(&route) - hops).abs() < 1e-6);
    }
}

// ============================================================================
// Progress Properties
// ============================================================================

proptest! {
    /// The visited count never decreases and never exceeds the distinct sites marked
    #[test]
    fn visited_count_is_monotonic(visits in visit_sequence_strategy()) {
        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 8);

        let mut distinct = std::collections::HashSet::new();
        let mut previous = 0;
        for idx in visits {
            let site_id = format!("s{}", idx);
            let newly = state.mark_site_visited("t1", &site_id);
            prop_assert_eq!(newly, distinct.insert(site_id));

            let count = state.visited_count("t1");
            prop_assert!(count >= previous);
            prop_assert_eq!(count, distinct.len());
            previous = count;
        }
    }

    /// A tour is complete exactly when every site has been visited
    #[test]
    fn completion_follows_visits(visits in visit_sequence_strategy()) {
        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 8);
        for idx in &visits {
            state.mark_site_visited("t1", &format!("s{}", idx));
        }

        let progress = state.progress("t1").unwrap();
        let distinct: std::collections::HashSet<_> = visits.iter().collect();
        prop_assert_eq!(progress.is_complete(), distinct.len() == 8);
    }
}

//! Device-side tour progress, proximity alerts and notification preferences.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Smallest radius a user can choose
pub const MIN_RADIUS_METERS: f64 = 10.0;
/// Largest radius a user can choose
pub const MAX_RADIUS_METERS: f64 = 500.0;
/// Radius used when the user never changed it
pub const DEFAULT_RADIUS_METERS: f64 = 50.0;

/// Per-tour, per-device progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourProgress {
    pub tour_id: String,
    /// Visited site ids in the order they were first visited
    pub visited_site_ids: Vec<String>,
    /// Number of sites in the tour; 0 means unknown
    pub total_sites: usize,
    pub selected_site_id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl TourProgress {
    pub fn new(tour_id: impl Into<String>, total_sites: usize, started_at: i64) -> Self {
        Self {
            tour_id: tour_id.into(),
            visited_site_ids: Vec::new(),
            total_sites,
            selected_site_id: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn has_visited(&self, site_id: &str) -> bool {
        self.visited_site_ids.iter().any(|id| id == site_id)
    }

    pub fn visited_count(&self) -> usize {
        self.visited_site_ids.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Whether every site has been visited (regardless of the completion stamp).
    pub fn all_visited(&self) -> bool {
        self.total_sites > 0 && self.visited_count() >= self.total_sites
    }

    /// Add a site to the visited set. Returns `false` if it was already there.
    pub(crate) fn insert_visited(&mut self, site_id: &str) -> bool {
        if self.has_visited(site_id) {
            return false;
        }
        self.visited_site_ids.push(site_id.to_string());
        true
    }
}

/// An arrival notification for a single site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityAlert {
    pub id: Ulid,
    pub tour_id: Option<String>,
    pub site_id: String,
    pub site_name: String,
    /// Distance from the user at trigger time, meters
    pub distance_m: f64,
    /// Milliseconds since the Unix epoch
    pub triggered_at: i64,
    pub audio_url: Option<String>,
    pub description: Option<String>,
}

/// Device-scoped notification settings and cooldown bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub radius_meters: f64,
    /// Last alert time per site id (ms since epoch)
    #[serde(default)]
    pub last_alert_at: HashMap<String, i64>,
    #[serde(default)]
    pub dismissed_site_ids: BTreeSet<String>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            radius_meters: DEFAULT_RADIUS_METERS,
            last_alert_at: HashMap::new(),
            dismissed_site_ids: BTreeSet::new(),
        }
    }
}

impl NotificationPreferences {
    /// Clamp a requested radius into the supported range.
    pub fn clamp_radius(meters: f64) -> f64 {
        if meters.is_nan() {
            return DEFAULT_RADIUS_METERS;
        }
        meters.clamp(MIN_RADIUS_METERS, MAX_RADIUS_METERS)
    }

    pub fn is_dismissed(&self, site_id: &str) -> bool {
        self.dismissed_site_ids.contains(site_id)
    }
}

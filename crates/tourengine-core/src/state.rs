//! Progress and notification state
//!
//! [`TourState`] is an explicit, cloneable container shared between the
//! proximity detector and consumers. It owns:
//!
//! - per-tour [`TourProgress`]
//! - device [`NotificationPreferences`] with per-site alert timestamps
//! - a rolling window of the most recent [`ProximityAlert`]s
//!
//! Changes are broadcast as [`ProgressEvent`]s.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::TourResult;
use crate::storage::OfflineStore;
use crate::types::{NotificationPreferences, ProximityAlert, TourProgress};

/// Number of alerts kept in memory
pub const ALERT_WINDOW: usize = 20;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted when progress or alerts change
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SiteVisited {
        tour_id: String,
        site_id: String,
        visited_count: usize,
        total_sites: usize,
    },
    TourCompleted {
        tour_id: String,
        completed_at: i64,
    },
    AlertAdded(ProximityAlert),
}

#[derive(Default)]
struct StateInner {
    progress: HashMap<String, TourProgress>,
    preferences: NotificationPreferences,
    /// Most recent first
    alerts: VecDeque<ProximityAlert>,
}

/// Shared progress, preference and alert state
#[derive(Clone)]
pub struct TourState {
    inner: Arc<RwLock<StateInner>>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ProgressEvent>,
}

impl TourState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StateInner::default())),
            clock,
            event_tx,
        }
    }

    /// Restore preferences and progress saved on this device.
    pub fn load(store: &OfflineStore, clock: Arc<dyn Clock>) -> TourResult<Self> {
        let state = Self::new(clock);
        {
            let mut inner = state.inner.write();
            if let Some(prefs) = store.load_preferences()? {
                inner.preferences = prefs;
            }
            for progress in store.list_progress()? {
                inner.progress.insert(progress.tour_id.clone(), progress);
            }
            debug!(tours = inner.progress.len(), "Loaded device state");
        }
        Ok(state)
    }

    /// Persist preferences and every tour's progress.
    pub fn save(&self, store: &OfflineStore) -> TourResult<()> {
        let (prefs, progress) = {
            let inner = self.inner.read();
            (
                inner.preferences.clone(),
                inner.progress.values().cloned().collect::<Vec<_>>(),
            )
        };
        store.save_preferences(&prefs)?;
        for p in &progress {
            store.save_progress(p)?;
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.event_tx.subscribe()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Progress
    // ═══════════════════════════════════════════════════════════════════════

    /// Begin (or resume) a tour with `total_sites` sites.
    ///
    /// Existing progress is kept; a non-zero `total_sites` refreshes the
    /// stored total.
    pub fn start_tour(&self, tour_id: &str, total_sites: usize) -> TourProgress {
        let now = self.now_millis();
        let mut inner = self.inner.write();
        let progress = inner
            .progress
            .entry(tour_id.to_string())
            .or_insert_with(|| {
                info!(tour_id, total_sites, "Started tour");
                TourProgress::new(tour_id, total_sites, now)
            });
        if total_sites > 0 {
            progress.total_sites = total_sites;
        }
        progress.clone()
    }

    /// Record a visit. Returns `true` if the site was not visited before.
    ///
    /// Completes the tour when the visited count first reaches the total.
    pub fn mark_site_visited(&self, tour_id: &str, site_id: &str) -> bool {
        let now = self.now_millis();
        let mut events = Vec::new();
        let newly_visited = {
            let mut inner = self.inner.write();
            let progress = inner
                .progress
                .entry(tour_id.to_string())
                .or_insert_with(|| TourProgress::new(tour_id, 0, now));

            if !progress.insert_visited(site_id) {
                false
            } else {
                events.push(ProgressEvent::SiteVisited {
                    tour_id: tour_id.to_string(),
                    site_id: site_id.to_string(),
                    visited_count: progress.visited_count(),
                    total_sites: progress.total_sites,
                });
                if progress.all_visited() && !progress.is_complete() {
                    progress.completed_at = Some(now);
                    events.push(ProgressEvent::TourCompleted {
                        tour_id: tour_id.to_string(),
                        completed_at: now,
                    });
                }
                true
            }
        };

        for event in events {
            if let ProgressEvent::TourCompleted { .. } = event {
                info!(tour_id, "Tour completed");
            }
            let _ = self.event_tx.send(event);
        }
        newly_visited
    }

    /// Mark a tour complete. Returns `false` if it already was.
    pub fn complete_tour(&self, tour_id: &str) -> bool {
        let now = self.now_millis();
        let completed = {
            let mut inner = self.inner.write();
            let progress = inner
                .progress
                .entry(tour_id.to_string())
                .or_insert_with(|| TourProgress::new(tour_id, 0, now));
            if progress.is_complete() {
                false
            } else {
                progress.completed_at = Some(now);
                true
            }
        };

        if completed {
            info!(tour_id, "Tour completed");
            let _ = self.event_tx.send(ProgressEvent::TourCompleted {
                tour_id: tour_id.to_string(),
                completed_at: now,
            });
        }
        completed
    }

    pub fn select_site(&self, tour_id: &str, site_id: Option<&str>) {
        let now = self.now_millis();
        let mut inner = self.inner.write();
        let progress = inner
            .progress
            .entry(tour_id.to_string())
            .or_insert_with(|| TourProgress::new(tour_id, 0, now));
        progress.selected_site_id = site_id.map(String::from);
    }

    /// Start a tour over: visits, completion and the alert timestamps of the
    /// visited sites are cleared.
    pub fn reset_tour(&self, tour_id: &str) {
        let now = self.now_millis();
        let mut inner = self.inner.write();
        let StateInner {
            progress,
            preferences,
            ..
        } = &mut *inner;

        if let Some(progress) = progress.get_mut(tour_id) {
            for site_id in progress.visited_site_ids.drain(..) {
                preferences.last_alert_at.remove(&site_id);
            }
            progress.completed_at = None;
            progress.selected_site_id = None;
            progress.started_at = now;
            info!(tour_id, "Reset tour progress");
        }
    }

    pub fn progress(&self, tour_id: &str) -> Option<TourProgress> {
        self.inner.read().progress.get(tour_id).cloned()
    }

    pub fn visited_count(&self, tour_id: &str) -> usize {
        self.inner
            .read()
            .progress
            .get(tour_id)
            .map(TourProgress::visited_count)
            .unwrap_or(0)
    }

    pub fn total_sites(&self, tour_id: &str) -> usize {
        self.inner
            .read()
            .progress
            .get(tour_id)
            .map(|p| p.total_sites)
            .unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Notification preferences
    // ═══════════════════════════════════════════════════════════════════════

    pub fn preferences(&self) -> NotificationPreferences {
        self.inner.read().preferences.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().preferences.enabled = enabled;
    }

    /// Set the alert radius, clamped to the supported range. Returns the stored value.
    pub fn set_radius_meters(&self, meters: f64) -> f64 {
        let radius = NotificationPreferences::clamp_radius(meters);
        self.inner.write().preferences.radius_meters = radius;
        radius
    }

    pub fn record_alert_time(&self, site_id: &str, at: i64) {
        self.inner
            .write()
            .preferences
            .last_alert_at
            .insert(site_id.to_string(), at);
    }

    pub fn last_alert_at(&self, site_id: &str) -> Option<i64> {
        self.inner
            .read()
            .preferences
            .last_alert_at
            .get(site_id)
            .copied()
    }

    /// Never alert for this site again.
    pub fn dismiss_site(&self, site_id: &str) {
        self.inner
            .write()
            .preferences
            .dismissed_site_ids
            .insert(site_id.to_string());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Alerts
    // ═══════════════════════════════════════════════════════════════════════

    /// Push an alert into the rolling window.
    pub fn add_alert(&self, alert: ProximityAlert) {
        {
            let mut inner = self.inner.write();
            inner.alerts.push_front(alert.clone());
            inner.alerts.truncate(ALERT_WINDOW);
        }
        let _ = self.event_tx.send(ProgressEvent::AlertAdded(alert));
    }

    /// Remove one alert. Returns whether it was present.
    pub fn dismiss_alert(&self, alert_id: Ulid) -> bool {
        let mut inner = self.inner.write();
        let before = inner.alerts.len();
        inner.alerts.retain(|a| a.id != alert_id);
        inner.alerts.len() != before
    }

    pub fn clear_alerts(&self) {
        self.inner.write().alerts.clear();
    }

    /// Alerts in the window, most recent first.
    pub fn recent_alerts(&self) -> Vec<ProximityAlert> {
        self.inner.read().alerts.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn alert(site_id: &str, at: i64) -> ProximityAlert {
        ProximityAlert {
            id: Ulid::new(),
            tour_id: Some("t1".into()),
            site_id: site_id.into(),
            site_name: site_id.to_uppercase(),
            distance_m: 12.0,
            triggered_at: at,
            audio_url: None,
            description: None,
        }
    }

    #[test]
    fn test_mark_visited_is_idempotent() {
        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 3);
        assert!(state.mark_site_visited("t1", "s1"));
        assert!(!state.mark_site_visited("t1", "s1"));
        assert_eq!(state.visited_count("t1"), 1);
    }

    #[test]
    fn test_completion_fires_once_at_total() {
        let clock = ManualClock::new(100);
        let state = TourState::new(clock.clone());
        let mut events = state.subscribe();
        state.start_tour("t1", 2);

        state.mark_site_visited("t1", "s1");
        assert!(!state.progress("t1").unwrap().is_complete());

        clock.set(200);
        state.mark_site_visited("t1", "s2");
        assert_eq!(state.progress("t1").unwrap().completed_at, Some(200));

        let mut completions = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ProgressEvent::TourCompleted { .. }) {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert!(!state.complete_tour("t1"));
    }

    #[test]
    fn test_unknown_total_never_autocompletes() {
        let state = TourState::new(ManualClock::new(0));
        state.mark_site_visited("t9", "s1");
        assert!(!state.progress("t9").unwrap().is_complete());
        assert!(state.complete_tour("t9"));
    }

    #[test]
    fn test_start_tour_keeps_existing_progress() {
        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 3);
        state.mark_site_visited("t1", "s1");
        let resumed = state.start_tour("t1", 4);
        assert_eq!(resumed.visited_count(), 1);
        assert_eq!(resumed.total_sites, 4);
    }

    #[test]
    fn test_reset_clears_visits_and_alert_times() {
        let clock = ManualClock::new(0);
        let state = TourState::new(clock.clone());
        state.start_tour("t1", 1);
        state.record_alert_time("s1", 5);
        state.record_alert_time("other", 5);
        state.mark_site_visited("t1", "s1");
        assert!(state.progress("t1").unwrap().is_complete());

        clock.set(50);
        state.reset_tour("t1");
        let progress = state.progress("t1").unwrap();
        assert_eq!(progress.visited_count(), 0);
        assert!(!progress.is_complete());
        assert_eq!(progress.started_at, 50);
        assert_eq!(state.last_alert_at("s1"), None);
        assert_eq!(state.last_alert_at("other"), Some(5));
    }

    #[test]
    fn test_radius_is_clamped() {
        let state = TourState::new(ManualClock::new(0));
        assert_eq!(state.set_radius_meters(2.0), 10.0);
        assert_eq!(state.set_radius_meters(9_000.0), 500.0);
        assert_eq!(state.preferences().radius_meters, 500.0);
    }

    #[test]
    fn test_alert_window_keeps_most_recent() {
        let state = TourState::new(ManualClock::new(0));
        for i in 0..(ALERT_WINDOW as i64 + 5) {
            state.add_alert(alert(&format!("s{}", i), i));
        }
        let alerts = state.recent_alerts();
        assert_eq!(alerts.len(), ALERT_WINDOW);
        assert_eq!(alerts[0].triggered_at, ALERT_WINDOW as i64 + 4);
    }

    #[test]
    fn test_dismiss_and_clear_alerts() {
        let state = TourState::new(ManualClock::new(0));
        let a = alert("s1", 1);
        let id = a.id;
        state.add_alert(a);
        state.add_alert(alert("s2", 2));

        assert!(state.dismiss_alert(id));
        assert!(!state.dismiss_alert(id));
        assert_eq!(state.recent_alerts().len(), 1);

        state.clear_alerts();
        assert!(state.recent_alerts().is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = tempfile::TempDir::new().unwrap();
        let store =
            OfflineStore::with_clock(temp.path().join("state.redb"), ManualClock::new(0)).unwrap();

        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 2);
        state.mark_site_visited("t1", "s1");
        state.set_enabled(false);
        state.dismiss_site("s2");
        state.save(&store).unwrap();

        let restored = TourState::load(&store, ManualClock::new(0)).unwrap();
        assert_eq!(restored.visited_count("t1"), 1);
        assert!(!restored.preferences().enabled);
        assert!(restored.preferences().is_dismissed("s2"));
    }
}

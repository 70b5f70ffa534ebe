//! Proximity detection
//!
//! [`ProximityMonitor`] is the synchronous decision core: given a location and
//! the current time it decides which sites trigger an arrival alert.
//! [`ProximityDetector`] drives a monitor from a [`LocationTracker`] on a
//! background task.
//!
//! ## Alert rules
//!
//! - Nothing happens while notifications are disabled or no fix is known.
//! - Evaluations closer together than `check_interval` are skipped.
//! - A site alerts when it is within the preference radius and has not
//!   alerted since the tour was last reset (or, with `rearm_after`, not
//!   within that window). Dismissed sites never alert.
//! - Alerting marks the site visited in the tour's progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::TourResult;
use crate::geo::distance;
use crate::location::LocationTracker;
use crate::state::TourState;
use crate::types::{Coordinate, Position, ProximityAlert, Site};

/// Default minimum spacing between proximity evaluations
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5000);
/// Default delay before the final-destination callback fires
pub const DEFAULT_FINAL_DESTINATION_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityConfig {
    pub check_interval: Duration,
    pub final_destination_delay: Duration,
    /// Allow a site to alert again this long after its last alert
    pub rearm_after: Option<Duration>,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            final_destination_delay: DEFAULT_FINAL_DESTINATION_DELAY,
            rearm_after: None,
        }
    }
}

/// Something the monitor decided during one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ProximityOutcome {
    Alert(ProximityAlert),
    /// The designated final site alerted in this progress lifetime
    FinalDestination { site_id: String },
}

/// Synchronous proximity state machine over a fixed set of sites
pub struct ProximityMonitor {
    sites: Vec<Site>,
    tour_id: Option<String>,
    final_site_id: Option<String>,
    state: TourState,
    config: ProximityConfig,
    last_check_at: Option<i64>,
}

impl ProximityMonitor {
    pub fn new(sites: Vec<Site>, state: TourState, config: ProximityConfig) -> Self {
        Self {
            sites,
            tour_id: None,
            final_site_id: None,
            state,
            config,
            last_check_at: None,
        }
    }

    pub fn with_tour(mut self, tour_id: Option<String>) -> Self {
        self.tour_id = tour_id;
        self
    }

    pub fn with_final_site(mut self, final_site_id: Option<String>) -> Self {
        self.final_site_id = final_site_id;
        self
    }

    pub fn last_check_at(&self) -> Option<i64> {
        self.last_check_at
    }

    /// Evaluate `location` at time `now` (ms since epoch).
    pub fn evaluate(&mut self, location: Option<Coordinate>, now: i64) -> Vec<ProximityOutcome> {
        let prefs = self.state.preferences();
        if !prefs.enabled {
            return Vec::new();
        }
        let Some(location) = location else {
            return Vec::new();
        };

        if let Some(last) = self.last_check_at {
            if now - last < self.config.check_interval.as_millis() as i64 {
                return Vec::new();
            }
        }
        self.last_check_at = Some(now);

        let mut outcomes = Vec::new();
        for site in &self.sites {
            let d = distance(location, site.coordinate());
            if d > prefs.radius_meters {
                continue;
            }
            if prefs.is_dismissed(&site.id) || !self.rearmed(&site.id, now) {
                continue;
            }

            let alert = ProximityAlert {
                id: Ulid::new(),
                tour_id: self.tour_id.clone(),
                site_id: site.id.clone(),
                site_name: site.name.clone(),
                distance_m: d,
                triggered_at: now,
                audio_url: site.audio_url.clone(),
                description: site.description.clone(),
            };
            info!(site_id = %site.id, distance_m = d, "Arrived at site");

            self.state.record_alert_time(&site.id, now);
            self.state.add_alert(alert.clone());
            if let Some(tour_id) = &self.tour_id {
                self.state.mark_site_visited(tour_id, &site.id);
            }
            outcomes.push(ProximityOutcome::Alert(alert));

            // Shares the final site's alert cooldown; re-armed by reset_tour
            if self.final_site_id.as_deref() == Some(site.id.as_str()) {
                outcomes.push(ProximityOutcome::FinalDestination {
                    site_id: site.id.clone(),
                });
            }
        }
        outcomes
    }

    fn rearmed(&self, site_id: &str, now: i64) -> bool {
        match (self.state.last_alert_at(site_id), self.config.rearm_after) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(last), Some(window)) => now - last >= window.as_millis() as i64,
        }
    }
}

/// Delivers arrival notifications to the user
///
/// Delivery is best effort; errors are logged by the detector and ignored.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &ProximityAlert) -> TourResult<()>;
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, alert: &ProximityAlert) -> TourResult<()> {
        info!(
            site = %alert.site_name,
            distance_m = alert.distance_m.round(),
            "You've arrived"
        );
        Ok(())
    }
}

pub type AlertCallback = Arc<dyn Fn(&ProximityAlert) + Send + Sync>;
pub type FinalDestinationCallback = Arc<dyn Fn() + Send + Sync>;

/// What a detector watches and whom it tells
#[derive(Clone, Default)]
pub struct DetectorOptions {
    pub sites: Vec<Site>,
    pub tour_id: Option<String>,
    pub final_site_id: Option<String>,
    pub on_alert: Option<AlertCallback>,
    pub on_final_destination_reached: Option<FinalDestinationCallback>,
}

impl DetectorOptions {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites,
            ..Default::default()
        }
    }

    pub fn tour(mut self, tour_id: impl Into<String>) -> Self {
        self.tour_id = Some(tour_id.into());
        self
    }

    pub fn final_site(mut self, site_id: impl Into<String>) -> Self {
        self.final_site_id = Some(site_id.into());
        self
    }

    pub fn on_alert(mut self, f: impl Fn(&ProximityAlert) + Send + Sync + 'static) -> Self {
        self.on_alert = Some(Arc::new(f));
        self
    }

    pub fn on_final_destination(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_final_destination_reached = Some(Arc::new(f));
        self
    }
}

/// Spawns proximity detection tasks
pub struct ProximityDetector;

impl ProximityDetector {
    /// Start tracking and evaluating proximity in the background.
    ///
    /// If location tracking cannot start (for example permission was denied)
    /// the returned handle is inert: it never fires and reports
    /// `is_tracking() == false`.
    pub fn spawn(
        options: DetectorOptions,
        tracker: Arc<LocationTracker>,
        state: TourState,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: ProximityConfig,
    ) -> ProximityHandle {
        if let Err(e) = tracker.start_tracking() {
            warn!(error = %e, "Proximity detection unavailable");
            return ProximityHandle {
                tracker,
                task: None,
            };
        }

        let DetectorOptions {
            sites,
            tour_id,
            final_site_id,
            on_alert,
            on_final_destination_reached,
        } = options;

        let mut positions = tracker.subscribe();
        let check_interval = config.check_interval;
        let final_delay = config.final_destination_delay;
        let mut monitor = ProximityMonitor::new(sites, state, config)
            .with_tour(tour_id)
            .with_final_site(final_site_id);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Dropping the set on abort cancels a pending final-destination timer
            let mut timers = JoinSet::new();

            loop {
                tokio::select! {
                    changed = positions.changed() => {
                        if changed.is_err() {
                            debug!("Position channel closed");
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }

                let latest: Option<Position> = *positions.borrow_and_update();
                let location = latest.map(|p| p.coordinate);
                for outcome in monitor.evaluate(location, clock.now_millis()) {
                    match outcome {
                        ProximityOutcome::Alert(alert) => {
                            if let Some(cb) = &on_alert {
                                cb(&alert);
                            }
                            if let Err(e) = sink.notify(&alert).await {
                                debug!(error = %e, "Notification delivery failed");
                            }
                        }
                        ProximityOutcome::FinalDestination { site_id } => {
                            info!(%site_id, "Final destination reached");
                            if let Some(cb) = on_final_destination_reached.clone() {
                                timers.spawn(async move {
                                    tokio::time::sleep(final_delay).await;
                                    cb();
                                });
                            }
                        }
                    }
                }
            }
        });

        ProximityHandle {
            tracker,
            task: Some(task),
        }
    }
}

/// Control handle for a running detector; dropping it stops tracking
pub struct ProximityHandle {
    tracker: Arc<LocationTracker>,
    task: Option<JoinHandle<()>>,
}

impl ProximityHandle {
    pub fn is_tracking(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished()) && self.tracker.is_tracking()
    }

    /// The last known user position.
    pub fn user_location(&self) -> Option<Position> {
        self.tracker.latest()
    }

    /// Stop detection and location tracking.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.tracker.stop_tracking();
            debug!("Proximity detection stopped");
        }
    }
}

impl Drop for ProximityHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::location::SimulatedLocation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn site(id: &str, lat: f64, lon: f64) -> Site {
        Site {
            id: id.into(),
            tour_id: "t1".into(),
            name: format!("Site {}", id),
            latitude: lat,
            longitude: lon,
            description: Some("About this place".into()),
            audio_url: None,
            image_url: None,
            display_order: 0,
            is_published: true,
            slug: None,
        }
    }

    fn sites() -> Vec<Site> {
        vec![site("s1", 50.0, 8.0), site("s2", 50.01, 8.0)]
    }

    fn monitor(config: ProximityConfig) -> (ProximityMonitor, TourState) {
        let state = TourState::new(ManualClock::new(0));
        state.start_tour("t1", 2);
        let monitor = ProximityMonitor::new(sites(), state.clone(), config)
            .with_tour(Some("t1".into()))
            .with_final_site(Some("s2".into()));
        (monitor, state)
    }

    fn alerts(outcomes: &[ProximityOutcome]) -> Vec<&str> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                ProximityOutcome::Alert(a) => Some(a.site_id.as_str()),
                _ => None,
            })
            .collect()
    }

    const AT_S1: Coordinate = Coordinate::new(50.0001, 8.0);
    const AT_S2: Coordinate = Coordinate::new(50.01, 8.0001);

    #[test]
    fn test_alert_once_within_radius() {
        let (mut m, state) = monitor(ProximityConfig::default());

        let first = m.evaluate(Some(AT_S1), 0);
        assert_eq!(alerts(&first), vec!["s1"]);
        assert_eq!(state.visited_count("t1"), 1);

        // Still in range much later: no second alert without rearm
        let again = m.evaluate(Some(AT_S1), 60_000);
        assert!(again.is_empty());
        assert_eq!(state.recent_alerts().len(), 1);
    }

    #[test]
    fn test_rate_limited_between_checks() {
        let (mut m, _state) = monitor(ProximityConfig::default());
        assert!(m.evaluate(Some(Coordinate::new(0.0, 0.0)), 0).is_empty());
        assert_eq!(m.last_check_at(), Some(0));

        // Inside the interval the location is not even looked at
        assert!(m.evaluate(Some(AT_S1), 4_999).is_empty());
        assert_eq!(m.last_check_at(), Some(0));

        assert_eq!(alerts(&m.evaluate(Some(AT_S1), 5_000)), vec!["s1"]);
    }

    #[test]
    fn test_disabled_or_no_location_skips() {
        let (mut m, state) = monitor(ProximityConfig::default());
        assert!(m.evaluate(None, 0).is_empty());
        assert_eq!(m.last_check_at(), None);

        state.set_enabled(false);
        assert!(m.evaluate(Some(AT_S1), 0).is_empty());
        assert!(state.recent_alerts().is_empty());
    }

    #[test]
    fn test_outside_radius_does_not_alert() {
        let (mut m, state) = monitor(ProximityConfig::default());
        state.set_radius_meters(10.0);
        // ~11 m north of s1
        assert!(m.evaluate(Some(Coordinate::new(50.0001, 8.0)), 0).is_empty());
    }

    #[test]
    fn test_dismissed_site_never_alerts() {
        let (mut m, state) = monitor(ProximityConfig::default());
        state.dismiss_site("s1");
        assert!(m.evaluate(Some(AT_S1), 0).is_empty());
    }

    #[test]
    fn test_rearm_after_window() {
        let config = ProximityConfig {
            rearm_after: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let (mut m, _state) = monitor(config);

        assert_eq!(alerts(&m.evaluate(Some(AT_S1), 0)), vec!["s1"]);
        assert!(m.evaluate(Some(AT_S1), 59_999).is_empty());
        assert_eq!(alerts(&m.evaluate(Some(AT_S1), 65_000)), vec!["s1"]);
    }

    #[test]
    fn test_reset_rearms_sites() {
        let (mut m, state) = monitor(ProximityConfig::default());
        m.evaluate(Some(AT_S1), 0);
        state.reset_tour("t1");
        assert_eq!(alerts(&m.evaluate(Some(AT_S1), 10_000)), vec!["s1"]);
    }

    #[test]
    fn test_final_destination_once_per_progress() {
        let (mut m, state) = monitor(ProximityConfig::default());
        let final_s2 = ProximityOutcome::FinalDestination {
            site_id: "s2".into(),
        };
        m.evaluate(Some(AT_S1), 0);
        let outcomes = m.evaluate(Some(AT_S2), 10_000);

        assert!(outcomes.contains(&final_s2));
        assert!(state.progress("t1").unwrap().is_complete());

        // Lingering at the final site does not repeat it
        assert!(m.evaluate(Some(AT_S2), 20_000).is_empty());

        // A reset starts a new walk that can finish again
        state.reset_tour("t1");
        let revisit = m.evaluate(Some(AT_S2), 30_000);
        assert_eq!(alerts(&revisit), vec!["s2"]);
        assert_eq!(revisit.len(), 2);
        assert!(revisit.contains(&final_s2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_fires_alerts_and_final_destination() {
        let sim = SimulatedLocation::new();
        let tracker = Arc::new(LocationTracker::new(sim.clone()));
        let clock = ManualClock::new(0);
        let state = TourState::new(clock.clone());
        state.start_tour("t1", 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let finals = Arc::new(AtomicUsize::new(0));
        let finals_cb = finals.clone();
        let options = DetectorOptions::new(sites())
            .tour("t1")
            .final_site("s2")
            .on_alert(move |a| {
                let _ = tx.send(a.site_id.clone());
            })
            .on_final_destination(move || {
                finals_cb.fetch_add(1, Ordering::SeqCst);
            });

        let handle = ProximityDetector::spawn(
            options,
            tracker,
            state.clone(),
            Arc::new(LogNotificationSink),
            clock.clone(),
            ProximityConfig::default(),
        );
        assert!(handle.is_tracking());

        sim.push_coordinate(AT_S1, 0);
        assert_eq!(rx.recv().await.unwrap(), "s1");
        assert_eq!(handle.user_location().unwrap().coordinate, AT_S1);

        clock.advance(6_000);
        sim.push_coordinate(AT_S2, 6_000);
        assert_eq!(rx.recv().await.unwrap(), "s2");
        assert_eq!(finals.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert!(state.progress("t1").unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_permission_denied_is_inert() {
        let sim = SimulatedLocation::new();
        sim.deny_permission();
        let tracker = Arc::new(LocationTracker::new(sim.clone()));
        let clock = ManualClock::new(0);

        let handle = ProximityDetector::spawn(
            DetectorOptions::new(sites()).on_alert(|_| panic!("must not fire")),
            tracker,
            TourState::new(clock.clone()),
            Arc::new(LogNotificationSink),
            clock,
            ProximityConfig::default(),
        );
        assert!(!handle.is_tracking());
        assert!(handle.user_location().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_revoked_mid_walk_goes_quiet() {
        let sim = SimulatedLocation::new();
        let tracker = Arc::new(LocationTracker::new(sim.clone()));
        let clock = ManualClock::new(0);
        let state = TourState::new(clock.clone());
        state.start_tour("t1", 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = DetectorOptions::new(sites())
            .tour("t1")
            .on_alert(move |a| {
                let _ = tx.send(a.site_id.clone());
            });
        let handle = ProximityDetector::spawn(
            options,
            tracker.clone(),
            state.clone(),
            Arc::new(LogNotificationSink),
            clock.clone(),
            ProximityConfig::default(),
        );

        // Far from every site, then permission goes away
        let mut positions = tracker.subscribe();
        sim.push_coordinate(Coordinate::new(10.0, 10.0), 0);
        positions.changed().await.unwrap();
        sim.deny_permission();
        positions.changed().await.unwrap();

        assert!(!handle.is_tracking());
        assert!(handle.user_location().is_none());
        assert_eq!(sim.active_watches(), 0);

        // Interval checks keep running but have nothing to evaluate
        clock.advance(30_000);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(state.recent_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_tracking() {
        let sim = SimulatedLocation::new();
        let tracker = Arc::new(LocationTracker::new(sim.clone()));
        let clock = ManualClock::new(0);

        let handle = ProximityDetector::spawn(
            DetectorOptions::new(sites()),
            tracker.clone(),
            TourState::new(clock.clone()),
            Arc::new(LogNotificationSink),
            clock,
            ProximityConfig::default(),
        );
        assert_eq!(sim.active_watches(), 1);

        drop(handle);
        assert_eq!(sim.active_watches(), 0);
        assert!(!tracker.is_tracking());
    }
}

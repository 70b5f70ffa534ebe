//! TourEngine - the entry point tying cache, sync, state and proximity together
//!
//! # Example
//!
//! ```ignore
//! use tourengine_core::{EngineConfig, TourEngine};
//!
//! let engine = TourEngine::open("~/.tourengine/data", config, backend)?;
//!
//! // Download for offline use
//! engine.sync_tour(&tour_id).await?;
//!
//! // Walk it
//! let tour = engine.load_tour("old-town").await.expect("tour exists");
//! let handle = engine.start_walk(&tour, tracker, sink, WalkOptions::default());
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::{self, Clock};
use crate::config::EngineConfig;
use crate::error::TourResult;
use crate::location::LocationTracker;
use crate::proximity::{
    AlertCallback, DetectorOptions, FinalDestinationCallback, NotificationSink,
    ProximityDetector, ProximityHandle,
};
use crate::route::{summarize_route, RouteSummary};
use crate::state::TourState;
use crate::storage::{EvictionReport, OfflineStore};
use crate::sync::{OfflineStatus, SyncBackend, SyncReport, TourSync};
use crate::types::{Coordinate, SiteWithMedia, TourWithSites};

/// File name of the cache database inside the data directory
pub const DATABASE_FILE: &str = "tourengine.redb";

/// Optional hooks for a walk
#[derive(Clone, Default)]
pub struct WalkOptions {
    pub final_site_id: Option<String>,
    pub on_alert: Option<AlertCallback>,
    pub on_final_destination_reached: Option<FinalDestinationCallback>,
}

/// Main entry point of the tour engine
pub struct TourEngine {
    data_dir: PathBuf,
    config: EngineConfig,
    store: OfflineStore,
    sync: TourSync,
    state: TourState,
    clock: Arc<dyn Clock>,
}

impl TourEngine {
    /// Open the engine with its database under `data_dir`.
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: EngineConfig,
        backend: SyncBackend,
    ) -> TourResult<Self> {
        Self::with_clock(data_dir, config, backend, clock::system())
    }

    pub fn with_clock(
        data_dir: impl AsRef<Path>,
        config: EngineConfig,
        backend: SyncBackend,
        clock: Arc<dyn Clock>,
    ) -> TourResult<Self> {
        config.validate()?;
        let data_dir = data_dir.as_ref().to_path_buf();
        info!(?data_dir, "Opening tour engine");
        std::fs::create_dir_all(&data_dir)?;

        let store = OfflineStore::with_clock(data_dir.join(DATABASE_FILE), clock.clone())?;
        let fresh_device = store.load_preferences()?.is_none();
        let state = TourState::load(&store, clock.clone())?;
        if fresh_device {
            state.set_radius_meters(config.proximity.default_radius_m);
        }

        let sync = TourSync::with_settings(store.clone(), backend, config.sync_settings());

        Ok(Self {
            data_dir,
            config,
            store,
            sync,
            state,
            clock,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    pub fn sync(&self) -> &TourSync {
        &self.sync
    }

    pub fn state(&self) -> &TourState {
        &self.state
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tour data
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn sync_tour(&self, tour_id: &str) -> TourResult<SyncReport> {
        self.sync.sync_tour_for_offline(tour_id).await
    }

    pub async fn load_tour(&self, id_or_slug: &str) -> Option<TourWithSites> {
        self.sync.get_tour_from_cache_or_network(id_or_slug).await
    }

    pub fn offline_status(&self) -> TourResult<OfflineStatus> {
        self.sync.offline_status()
    }

    /// Evict entries older than `max_age`, or the configured age.
    pub fn evict(&self, max_age: Option<Duration>) -> TourResult<EvictionReport> {
        match max_age {
            Some(age) => self.store.delete_older_than(age),
            None => self.sync.evict_stale(),
        }
    }

    pub fn clear_cache(&self) -> TourResult<()> {
        self.store.clear_all()
    }

    /// Nearest-neighbour walking order for a tour's sites.
    pub fn plan_route(
        &self,
        tour: &TourWithSites,
        start: Option<Coordinate>,
    ) -> RouteSummary<SiteWithMedia> {
        summarize_route(&tour.sites, start)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Walking
    // ═══════════════════════════════════════════════════════════════════════

    /// Start (or resume) `tour` and watch for site arrivals.
    pub fn start_walk(
        &self,
        tour: &TourWithSites,
        tracker: Arc<LocationTracker>,
        sink: Arc<dyn NotificationSink>,
        options: WalkOptions,
    ) -> ProximityHandle {
        self.state.start_tour(&tour.tour.id, tour.site_count());

        let detector = DetectorOptions {
            sites: tour.plain_sites(),
            tour_id: Some(tour.tour.id.clone()),
            final_site_id: options.final_site_id,
            on_alert: options.on_alert,
            on_final_destination_reached: options.on_final_destination_reached,
        };

        ProximityDetector::spawn(
            detector,
            tracker,
            self.state.clone(),
            sink,
            self.clock.clone(),
            self.config.proximity.to_config(),
        )
    }

    /// Persist device state (preferences and progress).
    pub fn save_state(&self) -> TourResult<()> {
        self.state.save(&self.store)
    }

    pub fn shutdown(self) -> TourResult<()> {
        info!("Shutting down tour engine");
        if let Err(e) = self.save_state() {
            warn!(error = %e, "Failed to save device state during shutdown");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sync::{MemoryAssetFetcher, MemoryRecordSource, NetworkFlag};
    use serde_json::json;
    use tempfile::TempDir;

    fn backend(online: bool) -> SyncBackend {
        let records = MemoryRecordSource::from_json(json!({
            "tours": [{"id": "t1", "name": "Walk", "slug": "walk", "is_published": true}],
            "sites": [
                {"id": "a", "tour_id": "t1", "name": "A", "latitude": 0.0, "longitude": 0.0,
                 "display_order": 1, "is_published": true},
                {"id": "b", "tour_id": "t1", "name": "B", "latitude": 0.0, "longitude": 0.02,
                 "display_order": 2, "is_published": true},
                {"id": "c", "tour_id": "t1", "name": "C", "latitude": 0.0, "longitude": 0.01,
                 "display_order": 3, "is_published": true}
            ]
        }))
        .unwrap();
        SyncBackend::in_memory(
            Arc::new(records),
            Arc::new(MemoryAssetFetcher::new()),
            Arc::new(NetworkFlag::new(online)),
        )
    }

    #[test]
    fn test_fresh_device_uses_configured_radius() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.proximity.default_radius_m = 80.0;

        let engine =
            TourEngine::with_clock(temp.path(), config, backend(false), ManualClock::new(0))
                .unwrap();
        assert_eq!(engine.state().preferences().radius_meters, 80.0);
        assert!(engine.data_dir().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_sync_then_plan_route_offline() {
        let temp = TempDir::new().unwrap();
        {
            let engine = TourEngine::with_clock(
                temp.path(),
                EngineConfig::default(),
                backend(true),
                ManualClock::new(0),
            )
            .unwrap();
            engine.sync_tour("t1").await.unwrap();
        }

        let engine = TourEngine::with_clock(
            temp.path(),
            EngineConfig::default(),
            backend(false),
            ManualClock::new(0),
        )
        .unwrap();
        let tour = engine.load_tour("walk").await.unwrap();
        let route = engine.plan_route(&tour, None);
        let order: Vec<_> = route.stops.iter().map(|s| s.site.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_state_survives_restart() {
        let temp = TempDir::new().unwrap();
        {
            let engine = TourEngine::with_clock(
                temp.path(),
                EngineConfig::default(),
                backend(false),
                ManualClock::new(0),
            )
            .unwrap();
            engine.state().start_tour("t1", 3);
            engine.state().mark_site_visited("t1", "a");
            engine.state().set_radius_meters(120.0);
            engine.shutdown().unwrap();
        }

        let engine = TourEngine::with_clock(
            temp.path(),
            EngineConfig::default(),
            backend(false),
            ManualClock::new(0),
        )
        .unwrap();
        assert_eq!(engine.state().visited_count("t1"), 1);
        // A saved preference wins over the configured default
        assert_eq!(engine.state().preferences().radius_meters, 120.0);
    }
}

//! Tour Engine Core Library
//!
//! Offline-capable proximity walking tours: mirror published tours into a
//! local cache, watch the device position and announce arrivals at sites.
//!
//! ## Overview
//!
//! - **Offline first**: tours, sites, media and their binary assets are
//!   cached in redb and served when the network is unavailable
//! - **Proximity alerts**: rate-limited distance checks with per-site
//!   cooldown, visit tracking and tour completion
//! - **Route planning**: nearest-neighbour ordering for self-guided tours
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tourengine_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TourError> {
//!     let config = EngineConfig::load("tourengine.json")?;
//!     let backend = SyncBackend::http(
//!         "https://api.example.com",
//!         "anon-key",
//!         Arc::new(NetworkFlag::new(true)),
//!     )?;
//!     let engine = TourEngine::open("~/.tourengine/data", config, backend)?;
//!
//!     if let Some(tour) = engine.load_tour("old-town").await {
//!         let route = engine.plan_route(&tour, None);
//!         println!("{} stops, {}", route.stops.len(), route.walking_time);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod location;
pub mod logging;
pub mod proximity;
pub mod route;
pub mod state;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{TourEngine, WalkOptions};
pub use error::{TourError, TourResult};
pub use geo::{calculate_distance, distance, estimate_walking_time, format_distance};
pub use location::{LocationProvider, LocationTracker, PositionWatch, SimulatedLocation};
pub use logging::JsonlLayer;
pub use proximity::{
    DetectorOptions, LogNotificationSink, NotificationSink, ProximityConfig, ProximityDetector,
    ProximityHandle, ProximityMonitor, ProximityOutcome,
};
pub use route::{optimize_route, summarize_route, total_route_distance, Located, RouteSummary};
pub use state::{ProgressEvent, TourState};
pub use storage::{CacheCounts, EvictionReport, OfflineStore};
pub use sync::{
    AssetFetcher, Connectivity, MemoryAssetFetcher, MemoryRecordSource, NetworkFlag,
    ObjectStore, OfflineStatus, Query, RecordSource, SyncBackend, SyncEvent, SyncReport,
    TourSync,
};
pub use types::*;

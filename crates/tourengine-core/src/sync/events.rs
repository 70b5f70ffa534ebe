//! Sync event types, sync reports and offline status
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEvent: Notifications about sync activity                   │
//! │  ├── Started: A full offline sync began                         │
//! │  ├── Completed: All entities written, assets prefetched         │
//! │  ├── Failed: A required fetch failed, nothing was written       │
//! │  └── BackgroundSkipped: A sync for the tour was already running │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::Serialize;

/// Why a single asset could not be cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a successful `sync_tour_for_offline`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub tour_id: String,
    pub sites: usize,
    pub links: usize,
    pub media: usize,
    /// Assets stored during this sync
    pub assets_cached: usize,
    /// Assets that failed; these never fail the sync
    pub asset_failures: Vec<AssetFailure>,
}

impl SyncReport {
    pub fn assets_attempted(&self) -> usize {
        self.assets_cached + self.asset_failures.len()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tour {}: {} sites, {} media, {}/{} assets",
            self.tour_id,
            self.sites,
            self.media,
            self.assets_cached,
            self.assets_attempted()
        )
    }
}

/// Events emitted by the sync engine
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started {
        tour_id: String,
        background: bool,
    },
    Completed {
        report: SyncReport,
        background: bool,
    },
    Failed {
        tour_id: String,
        message: String,
        background: bool,
    },
    /// A background sync was not started because one was in flight
    BackgroundSkipped { tour_id: String },
}

impl SyncEvent {
    pub fn tour_id(&self) -> &str {
        match self {
            SyncEvent::Started { tour_id, .. } => tour_id,
            SyncEvent::Completed { report, .. } => &report.tour_id,
            SyncEvent::Failed { tour_id, .. } => tour_id,
            SyncEvent::BackgroundSkipped { tour_id } => tour_id,
        }
    }
}

/// What the offline cache currently holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    pub cached_tours: u64,
    pub cached_sites: u64,
    pub cached_media: u64,
    pub cached_assets: u64,
    /// Sum of cached asset payload sizes
    pub total_size_bytes: u64,
    pub total_size_estimate: String,
}

/// Human size in megabytes, e.g. `"1.50 MB"`.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

impl fmt::Display for OfflineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tours, {} sites, {} media, {} assets ({})",
            self.cached_tours,
            self.cached_sites,
            self.cached_media,
            self.cached_assets,
            self.total_size_estimate
        )
    }
}

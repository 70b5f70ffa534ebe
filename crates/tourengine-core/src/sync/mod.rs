//! Server ⇄ offline cache synchronization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TourSync                                                       │
//! │  ├── RecordSource (tours, sites, site_media, media queries)     │
//! │  ├── AssetFetcher + ObjectStore (binary prefetch)               │
//! │  ├── Connectivity (online check before network reads)           │
//! │  ├── OfflineStore (entity and asset writes, cache fallback)     │
//! │  └── event_tx: broadcast::Sender<SyncEvent>                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let sync = TourSync::new(store, backend);
//! let mut events = sync.subscribe();
//!
//! // Full download for offline use
//! let report = sync.sync_tour_for_offline(&tour_id).await?;
//!
//! // Read path: network first, cache fallback, never errors
//! if let Some(tour) = sync.get_tour_from_cache_or_network("old-town").await {
//!     println!("{} sites", tour.site_count());
//! }
//! ```

pub mod engine;
pub mod events;
pub mod fetch;
pub mod network;
pub mod source;

pub use engine::{SyncBackend, SyncSettings, TourLookup, TourSync};
pub use events::{format_megabytes, AssetFailure, OfflineStatus, SyncEvent, SyncReport};
pub use fetch::{
    AssetFetcher, FetchedAsset, HttpAssetFetcher, MemoryAssetFetcher, ObjectStore,
    PublicBucketStore,
};
pub use network::{Connectivity, NetworkFlag};
pub use source::{
    select_as, Filter, FilterOp, MemoryRecordSource, Order, Query, RecordSource,
    RestRecordSource,
};

//! Tour sync engine
//!
//! Pulls a published tour graph from the [`RecordSource`] into the
//! [`OfflineStore`] and serves reads with a cache fallback.
//!
//! ## Sync policy
//!
//! - All four entity fetches (tour, sites, links, media) complete before any
//!   entity is written. A failed fetch writes nothing.
//! - Asset prefetch runs concurrently and settles every attempt; failures are
//!   reported, never raised.
//! - Explicit syncs of one tour run one at a time. A background sync for a
//!   tour that is already syncing is skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{format_megabytes, AssetFailure, OfflineStatus, SyncEvent, SyncReport};
use super::fetch::{
    AssetFetcher, HttpAssetFetcher, MemoryAssetFetcher, ObjectStore, PublicBucketStore,
};
use super::network::Connectivity;
use super::source::{select_as, MemoryRecordSource, Query, RecordSource, RestRecordSource};
use crate::error::{TourError, TourResult};
use crate::storage::{EvictionReport, OfflineStore, DEFAULT_MAX_CACHE_AGE};
use crate::types::{Media, Site, SiteMediaLink, Tour, TourWithSites};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

const TOURS: &str = "tours";
const SITES: &str = "sites";
const SITE_MEDIA: &str = "site_media";
const MEDIA: &str = "media";

/// The remote collaborators of the sync engine
#[derive(Clone)]
pub struct SyncBackend {
    pub records: Arc<dyn RecordSource>,
    pub assets: Arc<dyn AssetFetcher>,
    pub objects: Arc<dyn ObjectStore>,
    pub connectivity: Arc<dyn Connectivity>,
}

impl SyncBackend {
    /// Backend talking HTTP to `base_url` for records, assets and bucket URLs.
    pub fn http(
        base_url: &str,
        api_key: &str,
        connectivity: Arc<dyn Connectivity>,
    ) -> TourResult<Self> {
        Ok(Self {
            records: Arc::new(RestRecordSource::new(base_url, api_key)?),
            assets: Arc::new(HttpAssetFetcher::new()?),
            objects: Arc::new(PublicBucketStore::new(base_url)),
            connectivity,
        })
    }

    /// Backend served entirely from memory.
    pub fn in_memory(
        records: Arc<MemoryRecordSource>,
        assets: Arc<MemoryAssetFetcher>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            records,
            assets,
            objects: Arc::new(PublicBucketStore::new("memory://objects")),
            connectivity,
        }
    }
}

/// Tunables for [`TourSync`]
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Bucket holding media referenced by `storage_path`
    pub media_bucket: String,
    pub max_cache_age: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            media_bucket: "media".to_string(),
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
        }
    }
}

/// How a caller identified a tour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TourLookup {
    Id(String),
    Slug(String),
}

impl TourLookup {
    /// UUID-shaped input is an id; anything else is a slug.
    pub fn parse(id_or_slug: &str) -> Self {
        if uuid::Uuid::parse_str(id_or_slug).is_ok() {
            TourLookup::Id(id_or_slug.to_string())
        } else {
            TourLookup::Slug(id_or_slug.to_string())
        }
    }

    fn column(&self) -> (&'static str, &str) {
        match self {
            TourLookup::Id(id) => ("id", id),
            TourLookup::Slug(slug) => ("slug", slug),
        }
    }
}

/// A fully fetched tour graph, not yet written anywhere
struct RemoteTour {
    tour: Tour,
    sites: Vec<Site>,
    links: Vec<SiteMediaLink>,
    media: Vec<Media>,
}

struct Inner {
    store: OfflineStore,
    backend: SyncBackend,
    settings: SyncSettings,
    /// Per-tour sync locks
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Sync engine between the record source and the offline store
#[derive(Clone)]
pub struct TourSync {
    inner: Arc<Inner>,
}

impl TourSync {
    pub fn new(store: OfflineStore, backend: SyncBackend) -> Self {
        Self::with_settings(store, backend, SyncSettings::default())
    }

    pub fn with_settings(store: OfflineStore, backend: SyncBackend, settings: SyncSettings) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                settings,
                in_flight: Mutex::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn store(&self) -> &OfflineStore {
        &self.inner.store
    }

    /// Download a tour and everything it references into the offline store.
    ///
    /// Fails with [`TourError::FetchFailed`] if any required fetch fails, in
    /// which case no entity is written.
    pub async fn sync_tour_for_offline(&self, tour_id: &str) -> TourResult<SyncReport> {
        let lock = self.inner.tour_lock(tour_id);
        let result = {
            let _guard = lock.lock().await;
            self.inner.run_sync(tour_id, false).await
        };
        self.inner.release_tour_lock(tour_id, lock);
        result
    }

    /// Start a detached sync of `tour_id`.
    ///
    /// Returns `None` without starting anything if a sync for the same tour
    /// is already running. The outcome is only logged and broadcast.
    pub fn spawn_background_sync(&self, tour_id: &str) -> Option<JoinHandle<()>> {
        let lock = self.inner.tour_lock(tour_id);
        let Ok(guard) = lock.clone().try_lock_owned() else {
            debug!(tour_id, "Sync already in flight, skipping background sync");
            self.inner.release_tour_lock(tour_id, lock);
            let _ = self.inner.event_tx.send(SyncEvent::BackgroundSkipped {
                tour_id: tour_id.to_string(),
            });
            return None;
        };

        let inner = self.inner.clone();
        let tour_id = tour_id.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = inner.run_sync(&tour_id, true).await {
                warn!(%tour_id, error = %e, "Background sync failed");
            }
            drop(guard);
            inner.release_tour_lock(&tour_id, lock);
        }))
    }

    /// Resolve a tour by id or slug, preferring the network.
    ///
    /// When online and the fetch succeeds, a background sync is started and
    /// the fresh tour is returned without waiting for it. Otherwise the cache
    /// is consulted by id, then by slug. Absence is `None`, never an error.
    pub async fn get_tour_from_cache_or_network(&self, id_or_slug: &str) -> Option<TourWithSites> {
        if self.inner.backend.connectivity.is_online() {
            let lookup = TourLookup::parse(id_or_slug);
            match self.inner.fetch_remote(&lookup).await {
                Ok(remote) => {
                    let tour_id = remote.tour.id.clone();
                    let tour = TourWithSites::assemble(
                        remote.tour,
                        remote.sites,
                        remote.links,
                        &remote.media,
                    );
                    self.spawn_background_sync(&tour_id);
                    return Some(tour);
                }
                Err(e) => {
                    warn!(id_or_slug, error = %e, "Network fetch failed, falling back to cache");
                }
            }
        } else {
            debug!(id_or_slug, "Offline, reading tour from cache");
        }

        match self.load_cached(id_or_slug) {
            Ok(tour) => tour,
            Err(e) => {
                warn!(id_or_slug, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Rebuild the nested tour shape from cached rows.
    pub fn load_cached(&self, id_or_slug: &str) -> TourResult<Option<TourWithSites>> {
        let store = &self.inner.store;
        let tour = match store.get_tour(id_or_slug)? {
            Some(tour) => tour,
            None => match store.get_tour_by_slug(id_or_slug)? {
                Some(tour) => tour,
                None => return Ok(None),
            },
        };
        let tour = tour.into_inner();

        let sites: Vec<Site> = store
            .sites_for_tour(&tour.id)?
            .into_iter()
            .map(|s| s.into_inner())
            .collect();

        let mut links = Vec::new();
        let mut media = Vec::new();
        let mut seen_media = HashSet::new();
        for site in &sites {
            for link in store.links_for_site(&site.id)? {
                let link = link.into_inner();
                if seen_media.insert(link.media_id.clone()) {
                    if let Some(m) = store.get_media(&link.media_id)? {
                        media.push(m.into_inner());
                    }
                }
                links.push(link);
            }
        }

        Ok(Some(TourWithSites::assemble(tour, sites, links, &media)))
    }

    /// Summary of what the offline cache holds.
    pub fn offline_status(&self) -> TourResult<OfflineStatus> {
        let counts = self.inner.store.counts()?;
        let total_size_bytes = self.inner.store.total_asset_bytes()?;
        Ok(OfflineStatus {
            cached_tours: counts.tours,
            cached_sites: counts.sites,
            cached_media: counts.media,
            cached_assets: counts.assets,
            total_size_bytes,
            total_size_estimate: format_megabytes(total_size_bytes),
        })
    }

    /// Evict cache entries older than the configured maximum age.
    pub fn evict_stale(&self) -> TourResult<EvictionReport> {
        self.inner
            .store
            .delete_older_than(self.inner.settings.max_cache_age)
    }
}

impl Inner {
    fn tour_lock(&self, tour_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .entry(tour_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map entry for `tour_id` once `lock` is its last outside holder.
    fn release_tour_lock(&self, tour_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        let ours = in_flight
            .get(tour_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock));
        // One reference in the map, one in `lock`
        if ours && Arc::strong_count(&lock) == 2 {
            in_flight.remove(tour_id);
        }
    }

    async fn run_sync(&self, tour_id: &str, background: bool) -> TourResult<SyncReport> {
        info!(tour_id, background, "Starting offline sync");
        let _ = self.event_tx.send(SyncEvent::Started {
            tour_id: tour_id.to_string(),
            background,
        });

        match self.sync_once(tour_id).await {
            Ok(report) => {
                info!(
                    tour_id,
                    sites = report.sites,
                    media = report.media,
                    assets = report.assets_cached,
                    asset_failures = report.asset_failures.len(),
                    "Offline sync complete"
                );
                let _ = self.event_tx.send(SyncEvent::Completed {
                    report: report.clone(),
                    background,
                });
                Ok(report)
            }
            Err(e) => {
                warn!(tour_id, error = %e, "Offline sync failed");
                let _ = self.event_tx.send(SyncEvent::Failed {
                    tour_id: tour_id.to_string(),
                    message: e.to_string(),
                    background,
                });
                Err(e)
            }
        }
    }

    async fn sync_once(&self, tour_id: &str) -> TourResult<SyncReport> {
        let remote = self
            .fetch_remote(&TourLookup::Id(tour_id.to_string()))
            .await?;

        self.store.put_tour(&remote.tour)?;
        self.store.bulk_put_sites(&remote.sites)?;
        self.store.bulk_put_site_media(&remote.links)?;
        self.store.bulk_put_media(&remote.media)?;

        let urls = self.asset_urls(&remote);
        let (assets_cached, asset_failures) = self.prefetch_assets(urls).await;

        Ok(SyncReport {
            tour_id: remote.tour.id,
            sites: remote.sites.len(),
            links: remote.links.len(),
            media: remote.media.len(),
            assets_cached,
            asset_failures,
        })
    }

    async fn fetch_remote(&self, lookup: &TourLookup) -> TourResult<RemoteTour> {
        let records = self.backend.records.as_ref();
        let (column, value) = lookup.column();

        let tour_query = Query::from(TOURS)
            .eq(column, value)
            .eq("is_published", true)
            .limit(1);
        let tour: Tour = select_as(records, &tour_query)
            .await
            .map_err(|e| TourError::fetch_failed("tour", e))?
            .into_iter()
            .next()
            .ok_or_else(|| TourError::fetch_failed("tour", format!("{} not found", value)))?;

        let sites_query = Query::from(SITES)
            .eq("tour_id", tour.id.as_str())
            .eq("is_published", true)
            .order("display_order", true);
        let sites: Vec<Site> = select_as(records, &sites_query)
            .await
            .map_err(|e| TourError::fetch_failed("sites", e))?;

        let links: Vec<SiteMediaLink> = if sites.is_empty() {
            Vec::new()
        } else {
            let query = Query::from(SITE_MEDIA)
                .in_list("site_id", sites.iter().map(|s| s.id.as_str()))
                .order("display_order", true);
            select_as(records, &query)
                .await
                .map_err(|e| TourError::fetch_failed("site media", e))?
        };

        let mut media_ids: Vec<&str> = links.iter().map(|l| l.media_id.as_str()).collect();
        media_ids.sort_unstable();
        media_ids.dedup();
        let media: Vec<Media> = if media_ids.is_empty() {
            Vec::new()
        } else {
            let query = Query::from(MEDIA).in_list("id", media_ids);
            select_as(records, &query)
                .await
                .map_err(|e| TourError::fetch_failed("media", e))?
        };

        debug!(
            tour_id = %tour.id,
            sites = sites.len(),
            links = links.len(),
            media = media.len(),
            "Fetched tour graph"
        );
        Ok(RemoteTour {
            tour,
            sites,
            links,
            media,
        })
    }

    /// Distinct asset URLs referenced by a tour graph, in discovery order.
    fn asset_urls(&self, remote: &RemoteTour) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        let mut push = |url: Option<String>| {
            if let Some(url) = url.filter(|u| !u.is_empty()) {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        };

        push(remote.tour.cover_image_url.clone());
        for site in &remote.sites {
            push(site.audio_url.clone());
            push(site.image_url.clone());
        }
        for media in &remote.media {
            push(self.media_url(media));
        }
        urls
    }

    fn media_url(&self, media: &Media) -> Option<String> {
        if let Some(url) = media.file_url.as_ref().filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        media
            .storage_path
            .as_ref()
            .map(|path| {
                self.backend
                    .objects
                    .public_url(&self.settings.media_bucket, path)
            })
    }

    /// Fetch and store every URL concurrently, settling all attempts.
    async fn prefetch_assets(&self, urls: Vec<String>) -> (usize, Vec<AssetFailure>) {
        let attempts = urls.into_iter().map(|url| async move {
            let result = match self.backend.assets.fetch(&url).await {
                Ok(asset) => self
                    .store
                    .put_asset(&url, &asset.content_type, asset.data.to_vec())
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            (url, result)
        });

        let mut cached = 0;
        let mut failures = Vec::new();
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(()) => cached += 1,
                Err(e) => {
                    warn!(%url, error = %e, "Asset prefetch failed");
                    failures.push(AssetFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (cached, failures)
    }
}

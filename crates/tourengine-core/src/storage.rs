//! Offline cache store using redb.
//!
//! Mirrors server entities for offline use:
//! - Tours (with a slug index)
//! - Sites (with a slug index and a tour → sites index)
//! - Media and site-media links (with a site → links index)
//! - Binary assets, keyed by the BLAKE3 hash of their source URL
//! - Device state: notification preferences and tour progress
//!
//! Every entity row is a full snapshot carrying `cached_at`. The store has no
//! network awareness; the sync engine decides what goes in.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redb::{
    Database, ReadableMultimapTable, ReadableTable, ReadableTableMetadata, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{self, Clock};
use crate::error::TourResult;
use crate::types::{Cached, CachedAsset, Media, Site, SiteMediaLink, Tour};

// Submodules
mod assets;
mod device;
mod media;
mod sites;
mod tours;

use assets::ASSETS_TABLE;
use device::{PREFERENCES_TABLE, PROGRESS_TABLE};
use media::{MEDIA_TABLE, SITE_LINKS_INDEX, SITE_MEDIA_TABLE};
use sites::{SITES_TABLE, SITE_SLUG_INDEX, TOUR_SITES_INDEX};
use tours::{TOURS_TABLE, TOUR_SLUG_INDEX};

/// Default age after which cached entities are evicted
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Row counts per cached entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub tours: u64,
    pub sites: u64,
    pub media: u64,
    pub links: u64,
    pub assets: u64,
}

/// How many rows an eviction sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub tours: usize,
    pub sites: usize,
    pub media: usize,
    pub links: usize,
    pub assets: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.tours + self.sites + self.media + self.links + self.assets
    }
}

/// Local persistent mirror of tour data
#[derive(Clone)]
pub struct OfflineStore {
    db: Arc<RwLock<Database>>,
    clock: Arc<dyn Clock>,
}

impl OfflineStore {
    /// Open (or create) the store at `path` using the system clock.
    pub fn new(path: impl AsRef<Path>) -> TourResult<Self> {
        Self::with_clock(path, clock::system())
    }

    /// Open (or create) the store with an explicit clock.
    ///
    /// Creates the parent directory and every table if missing.
    pub fn with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> TourResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        Self::create_tables(&write_txn)?;
        write_txn.commit()?;

        debug!(?path, "Opened offline store");
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            clock,
        })
    }

    fn create_tables(txn: &WriteTransaction) -> TourResult<()> {
        let _ = txn.open_table(TOURS_TABLE)?;
        let _ = txn.open_table(TOUR_SLUG_INDEX)?;
        let _ = txn.open_table(SITES_TABLE)?;
        let _ = txn.open_table(SITE_SLUG_INDEX)?;
        let _ = txn.open_multimap_table(TOUR_SITES_INDEX)?;
        let _ = txn.open_table(MEDIA_TABLE)?;
        let _ = txn.open_table(SITE_MEDIA_TABLE)?;
        let _ = txn.open_multimap_table(SITE_LINKS_INDEX)?;
        let _ = txn.open_table(ASSETS_TABLE)?;
        let _ = txn.open_table(PREFERENCES_TABLE)?;
        let _ = txn.open_table(PROGRESS_TABLE)?;
        Ok(())
    }

    /// Current time according to the store's clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove every cached entity and asset.
    ///
    /// Device state (preferences, progress) is kept.
    pub fn clear_all(&self) -> TourResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        write_txn.delete_table(TOURS_TABLE)?;
        write_txn.delete_table(TOUR_SLUG_INDEX)?;
        write_txn.delete_table(SITES_TABLE)?;
        write_txn.delete_table(SITE_SLUG_INDEX)?;
        write_txn.delete_multimap_table(TOUR_SITES_INDEX)?;
        write_txn.delete_table(MEDIA_TABLE)?;
        write_txn.delete_table(SITE_MEDIA_TABLE)?;
        write_txn.delete_multimap_table(SITE_LINKS_INDEX)?;
        write_txn.delete_table(ASSETS_TABLE)?;
        Self::create_tables(&write_txn)?;
        write_txn.commit()?;

        info!("Cleared offline cache");
        Ok(())
    }

    /// Evict everything cached strictly before `now - max_age`.
    pub fn delete_older_than(&self, max_age: Duration) -> TourResult<EvictionReport> {
        let cutoff = self.now_millis() - max_age.as_millis() as i64;
        let mut report = EvictionReport::default();

        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut tours = write_txn.open_table(TOURS_TABLE)?;
            let mut slugs = write_txn.open_table(TOUR_SLUG_INDEX)?;
            for (key, cached) in stale_rows::<Tour, _>(&tours, cutoff)? {
                tours.remove(key.as_str())?;
                remove_index_entry(&mut slugs, &cached.entity.slug, &key)?;
                report.tours += 1;
            }
        }
        {
            let mut sites = write_txn.open_table(SITES_TABLE)?;
            let mut slugs = write_txn.open_table(SITE_SLUG_INDEX)?;
            let mut by_tour = write_txn.open_multimap_table(TOUR_SITES_INDEX)?;
            for (key, cached) in stale_rows::<Site, _>(&sites, cutoff)? {
                sites.remove(key.as_str())?;
                if let Some(slug) = &cached.entity.slug {
                    remove_index_entry(&mut slugs, slug, &key)?;
                }
                by_tour.remove(cached.entity.tour_id.as_str(), key.as_str())?;
                report.sites += 1;
            }
        }
        {
            let mut media = write_txn.open_table(MEDIA_TABLE)?;
            for (key, _) in stale_rows::<Media, _>(&media, cutoff)? {
                media.remove(key.as_str())?;
                report.media += 1;
            }
        }
        {
            let mut links = write_txn.open_table(SITE_MEDIA_TABLE)?;
            let mut by_site = write_txn.open_multimap_table(SITE_LINKS_INDEX)?;
            for (key, cached) in stale_rows::<SiteMediaLink, _>(&links, cutoff)? {
                links.remove(key.as_str())?;
                by_site.remove(cached.entity.site_id.as_str(), key.as_str())?;
                report.links += 1;
            }
        }
        {
            let mut assets = write_txn.open_table(ASSETS_TABLE)?;
            let mut stale = Vec::new();
            for entry in assets.iter()? {
                let (key, value) = entry?;
                let asset: CachedAsset = postcard::from_bytes(value.value())?;
                if asset.cached_at < cutoff {
                    stale.push(key.value().to_string());
                }
            }
            for key in stale {
                assets.remove(key.as_str())?;
                report.assets += 1;
            }
        }
        write_txn.commit()?;

        info!(
            cutoff,
            evicted = report.total(),
            "Evicted stale cache entries"
        );
        Ok(report)
    }

    /// Row counts per entity table.
    pub fn counts(&self) -> TourResult<CacheCounts> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        Ok(CacheCounts {
            tours: read_txn.open_table(TOURS_TABLE)?.len()?,
            sites: read_txn.open_table(SITES_TABLE)?.len()?,
            media: read_txn.open_table(MEDIA_TABLE)?.len()?,
            links: read_txn.open_table(SITE_MEDIA_TABLE)?.len()?,
            assets: read_txn.open_table(ASSETS_TABLE)?.len()?,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row helpers shared by the submodules
// ═══════════════════════════════════════════════════════════════════════════

pub(crate) fn encode<T: Serialize>(value: &T) -> TourResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TourResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Load one cached row by primary key.
pub(crate) fn load_row<T, Tbl>(table: &Tbl, key: &str) -> TourResult<Option<Cached<T>>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(v) => Ok(Some(decode(v.value())?)),
        None => Ok(None),
    }
}

/// Rows whose snapshot is older than `cutoff`, keyed by primary key.
fn stale_rows<T, Tbl>(table: &Tbl, cutoff: i64) -> TourResult<Vec<(String, Cached<T>)>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut stale = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let cached: Cached<T> = decode(value.value())?;
        if cached.is_older_than(cutoff) {
            stale.push((key.value().to_string(), cached));
        }
    }
    Ok(stale)
}

/// Remove `index_key` from a unique index, but only while it still points at `id`.
pub(crate) fn remove_index_entry(
    index: &mut redb::Table<'_, &'static str, &'static str>,
    index_key: &str,
    id: &str,
) -> TourResult<()> {
    let points_here = index
        .get(index_key)?
        .map(|v| v.value() == id)
        .unwrap_or(false);
    if points_here {
        index.remove(index_key)?;
    }
    Ok(())
}

/// Ids stored under `key` in a multimap index.
pub(crate) fn index_values<Tbl>(index: &Tbl, key: &str) -> TourResult<Vec<String>>
where
    Tbl: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut ids = Vec::new();
    for value in index.get(key)? {
        ids.push(value?.value().to_string());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::MediaType;
    use tempfile::TempDir;

    pub(crate) fn create_test_store(start: i64) -> (OfflineStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start);
        let store =
            OfflineStore::with_clock(temp_dir.path().join("cache.redb"), clock.clone()).unwrap();
        (store, clock, temp_dir)
    }

    fn tour(id: &str, slug: &str) -> Tour {
        Tour {
            id: id.into(),
            organization_id: Some("org".into()),
            name: format!("Tour {}", id),
            slug: slug.into(),
            description: None,
            cover_image_url: None,
            is_published: true,
        }
    }

    fn site(id: &str, tour_id: &str, order: i32) -> Site {
        Site {
            id: id.into(),
            tour_id: tour_id.into(),
            name: format!("Site {}", id),
            latitude: 50.0,
            longitude: 8.0,
            description: None,
            audio_url: None,
            image_url: None,
            display_order: order,
            is_published: true,
            slug: Some(format!("{}-slug", id)),
        }
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/cache.redb");
        assert!(OfflineStore::new(&db_path).is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_counts_start_at_zero() {
        let (store, _clock, _temp) = create_test_store(0);
        assert_eq!(store.counts().unwrap(), CacheCounts::default());
    }

    #[test]
    fn test_eviction_boundary() {
        let max_age = Duration::from_millis(1_000);
        let t = 10_000;

        // Evaluated just before the boundary: retained
        let (store, clock, _temp) = create_test_store(t);
        store.put_tour(&tour("t1", "one")).unwrap();
        clock.set(t + 1_000 - 1);
        let report = store.delete_older_than(max_age).unwrap();
        assert_eq!(report.tours, 0);
        assert!(store.get_tour("t1").unwrap().is_some());

        // Evaluated just after the boundary: deleted
        clock.set(t + 1_000 + 1);
        let report = store.delete_older_than(max_age).unwrap();
        assert_eq!(report.tours, 1);
        assert!(store.get_tour("t1").unwrap().is_none());
        assert!(store.get_tour_by_slug("one").unwrap().is_none());
    }

    #[test]
    fn test_eviction_cleans_indexes() {
        let (store, clock, _temp) = create_test_store(0);
        store.bulk_put_sites(&[site("s1", "t1", 1)]).unwrap();
        store
            .bulk_put_site_media(&[SiteMediaLink {
                id: "l1".into(),
                site_id: "s1".into(),
                media_id: "m1".into(),
                display_order: 0,
            }])
            .unwrap();

        clock.set(DEFAULT_MAX_CACHE_AGE.as_millis() as i64 + 1);
        let report = store.delete_older_than(DEFAULT_MAX_CACHE_AGE).unwrap();
        assert_eq!(report.sites, 1);
        assert_eq!(report.links, 1);
        assert!(store.sites_for_tour("t1").unwrap().is_empty());
        assert!(store.get_site_by_slug("s1-slug").unwrap().is_none());
        assert!(store.links_for_site("s1").unwrap().is_empty());
    }

    #[test]
    fn test_eviction_keeps_fresh_rows() {
        let (store, clock, _temp) = create_test_store(0);
        store.put_tour(&tour("old", "old")).unwrap();
        clock.set(5_000);
        store.put_tour(&tour("new", "new")).unwrap();

        let report = store.delete_older_than(Duration::from_millis(2_000)).unwrap();
        assert_eq!(report.tours, 1);
        assert!(store.get_tour("old").unwrap().is_none());
        assert!(store.get_tour("new").unwrap().is_some());
    }

    #[test]
    fn test_clear_all_empties_cache_but_keeps_device_state() {
        let (store, _clock, _temp) = create_test_store(0);
        store.put_tour(&tour("t1", "one")).unwrap();
        store.bulk_put_sites(&[site("s1", "t1", 1)]).unwrap();
        store
            .bulk_put_media(&[Media {
                id: "m1".into(),
                organization_id: None,
                media_type: MediaType::Audio,
                file_url: None,
                storage_path: None,
                title: None,
                caption: None,
            }])
            .unwrap();
        store
            .put_asset("https://cdn.example.com/a.jpg", "image/jpeg", b"jpg".to_vec())
            .unwrap();
        let mut prefs = crate::types::NotificationPreferences::default();
        prefs.radius_meters = 120.0;
        store.save_preferences(&prefs).unwrap();

        store.clear_all().unwrap();

        assert_eq!(store.counts().unwrap(), CacheCounts::default());
        assert!(store.get_tour_by_slug("one").unwrap().is_none());
        assert_eq!(store.load_preferences().unwrap().unwrap().radius_meters, 120.0);

        // Tables are usable again after clearing
        store.put_tour(&tour("t2", "two")).unwrap();
        assert_eq!(store.counts().unwrap().tours, 1);
    }

    #[test]
    fn test_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.redb");
        {
            let store = OfflineStore::new(&db_path).unwrap();
            store.put_tour(&tour("t1", "one")).unwrap();
        }
        {
            let store = OfflineStore::new(&db_path).unwrap();
            assert!(store.get_tour("t1").unwrap().is_some());
        }
    }
}

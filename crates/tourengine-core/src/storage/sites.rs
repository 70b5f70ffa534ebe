//! Cached sites
//!
//! - **Primary table**: `sites` - keyed by site id
//! - **Secondary index**: `site_slug_index` - slug → site id
//! - **Secondary index**: `tour_sites_index` - tour id → site ids (multimap)

use redb::{MultimapTableDefinition, TableDefinition};

use super::{encode, index_values, load_row, remove_index_entry, OfflineStore};
use crate::error::TourResult;
use crate::types::{Cached, Site};

/// Table for cached sites (key: site id, value: JSON `Cached<Site>`)
pub(crate) const SITES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sites");

/// Index for slug → site id lookup
pub(crate) const SITE_SLUG_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("site_slug_index");

/// Index for tour id → site ids lookup
pub(crate) const TOUR_SITES_INDEX: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("tour_sites_index");

impl OfflineStore {
    /// Upsert many sites in one transaction, keeping both indexes current.
    pub fn bulk_put_sites(&self, sites: &[Site]) -> TourResult<()> {
        let cached_at = self.now_millis();
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SITES_TABLE)?;
            let mut slugs = write_txn.open_table(SITE_SLUG_INDEX)?;
            let mut by_tour = write_txn.open_multimap_table(TOUR_SITES_INDEX)?;

            for site in sites {
                let previous: Option<Cached<Site>> = load_row(&table, &site.id)?;
                if let Some(previous) = previous {
                    let previous = previous.entity;
                    if previous.tour_id != site.tour_id {
                        by_tour.remove(previous.tour_id.as_str(), site.id.as_str())?;
                    }
                    if let Some(old_slug) = previous.slug.filter(|s| Some(s) != site.slug.as_ref())
                    {
                        remove_index_entry(&mut slugs, &old_slug, &site.id)?;
                    }
                }

                let data = encode(&Cached::new(site.clone(), cached_at))?;
                table.insert(site.id.as_str(), data.as_slice())?;
                by_tour.insert(site.tour_id.as_str(), site.id.as_str())?;
                if let Some(slug) = &site.slug {
                    slugs.insert(slug.as_str(), site.id.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a cached site by id.
    pub fn get_site(&self, site_id: &str) -> TourResult<Option<Cached<Site>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SITES_TABLE)?;
        load_row(&table, site_id)
    }

    /// Load a cached site by slug.
    pub fn get_site_by_slug(&self, slug: &str) -> TourResult<Option<Cached<Site>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;

        let slugs = read_txn.open_table(SITE_SLUG_INDEX)?;
        let site_id = match slugs.get(slug)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(SITES_TABLE)?;
        load_row(&table, &site_id)
    }

    /// All cached sites of a tour, ordered by `display_order`.
    pub fn sites_for_tour(&self, tour_id: &str) -> TourResult<Vec<Cached<Site>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let by_tour = read_txn.open_multimap_table(TOUR_SITES_INDEX)?;
        let table = read_txn.open_table(SITES_TABLE)?;

        let mut sites = Vec::new();
        for site_id in index_values(&by_tour, tour_id)? {
            if let Some(site) = load_row::<Site, _>(&table, &site_id)? {
                sites.push(site);
            }
        }
        sites.sort_by_key(|s| s.entity.display_order);
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    fn site(id: &str, tour_id: &str, order: i32, slug: Option<&str>) -> Site {
        Site {
            id: id.into(),
            tour_id: tour_id.into(),
            name: format!("Site {}", id),
            latitude: 51.5,
            longitude: -0.12,
            description: None,
            audio_url: None,
            image_url: None,
            display_order: order,
            is_published: true,
            slug: slug.map(String::from),
        }
    }

    fn store() -> (OfflineStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store =
            OfflineStore::with_clock(temp.path().join("s.redb"), ManualClock::new(0)).unwrap();
        (store, temp)
    }

    #[test]
    fn test_sites_for_tour_sorted_by_display_order() {
        let (store, _temp) = store();
        store
            .bulk_put_sites(&[
                site("c", "t1", 3, None),
                site("a", "t1", 1, None),
                site("b", "t1", 2, None),
                site("x", "t2", 1, None),
            ])
            .unwrap();

        let ids: Vec<_> = store
            .sites_for_tour("t1")
            .unwrap()
            .into_iter()
            .map(|s| s.entity.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.sites_for_tour("t2").unwrap().len(), 1);
        assert!(store.sites_for_tour("t3").unwrap().is_empty());
    }

    #[test]
    fn test_get_site_by_slug() {
        let (store, _temp) = store();
        store
            .bulk_put_sites(&[site("s1", "t1", 1, Some("clock-tower"))])
            .unwrap();

        let found = store.get_site_by_slug("clock-tower").unwrap().unwrap();
        assert_eq!(found.entity.id, "s1");
        assert!(store.get_site("s1").unwrap().is_some());
    }

    #[test]
    fn test_moving_site_between_tours_updates_index() {
        let (store, _temp) = store();
        store.bulk_put_sites(&[site("s1", "t1", 1, None)]).unwrap();
        store.bulk_put_sites(&[site("s1", "t2", 1, None)]).unwrap();

        assert!(store.sites_for_tour("t1").unwrap().is_empty());
        assert_eq!(store.sites_for_tour("t2").unwrap().len(), 1);
    }

    #[test]
    fn test_dropping_slug_clears_index() {
        let (store, _temp) = store();
        store
            .bulk_put_sites(&[site("s1", "t1", 1, Some("fountain"))])
            .unwrap();
        store.bulk_put_sites(&[site("s1", "t1", 1, None)]).unwrap();

        assert!(store.get_site_by_slug("fountain").unwrap().is_none());
    }
}

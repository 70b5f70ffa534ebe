//! Cached media and site-media links
//!
//! - **Primary table**: `media` - keyed by media id
//! - **Primary table**: `site_media` - keyed by link id
//! - **Secondary index**: `site_links_index` - site id → link ids (multimap)

use redb::{MultimapTableDefinition, TableDefinition};

use super::{encode, index_values, load_row, OfflineStore};
use crate::error::TourResult;
use crate::types::{Cached, Media, SiteMediaLink};

/// Table for cached media (key: media id, value: JSON `Cached<Media>`)
pub(crate) const MEDIA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("media");

/// Table for site-media links (key: link id, value: JSON `Cached<SiteMediaLink>`)
pub(crate) const SITE_MEDIA_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("site_media");

/// Index for site id → link ids lookup
pub(crate) const SITE_LINKS_INDEX: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("site_links_index");

impl OfflineStore {
    /// Upsert many media rows in one transaction.
    pub fn bulk_put_media(&self, media: &[Media]) -> TourResult<()> {
        let cached_at = self.now_millis();
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(MEDIA_TABLE)?;
            for item in media {
                let data = encode(&Cached::new(item.clone(), cached_at))?;
                table.insert(item.id.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_media(&self, media_id: &str) -> TourResult<Option<Cached<Media>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MEDIA_TABLE)?;
        load_row(&table, media_id)
    }

    /// Upsert many site-media links in one transaction.
    pub fn bulk_put_site_media(&self, links: &[SiteMediaLink]) -> TourResult<()> {
        let cached_at = self.now_millis();
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SITE_MEDIA_TABLE)?;
            let mut by_site = write_txn.open_multimap_table(SITE_LINKS_INDEX)?;

            for link in links {
                let previous: Option<Cached<SiteMediaLink>> = load_row(&table, &link.id)?;
                if let Some(previous) = previous {
                    if previous.entity.site_id != link.site_id {
                        by_site.remove(previous.entity.site_id.as_str(), link.id.as_str())?;
                    }
                }

                let data = encode(&Cached::new(link.clone(), cached_at))?;
                table.insert(link.id.as_str(), data.as_slice())?;
                by_site.insert(link.site_id.as_str(), link.id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Links of a site, ordered by `display_order`.
    pub fn links_for_site(&self, site_id: &str) -> TourResult<Vec<Cached<SiteMediaLink>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let by_site = read_txn.open_multimap_table(SITE_LINKS_INDEX)?;
        let table = read_txn.open_table(SITE_MEDIA_TABLE)?;

        let mut links = Vec::new();
        for link_id in index_values(&by_site, site_id)? {
            if let Some(link) = load_row::<SiteMediaLink, _>(&table, &link_id)? {
                links.push(link);
            }
        }
        links.sort_by_key(|l| l.entity.display_order);
        Ok(links)
    }
}

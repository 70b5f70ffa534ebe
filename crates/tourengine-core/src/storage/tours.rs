//! Cached tours
//!
//! - **Primary table**: `tours` - keyed by tour id
//! - **Secondary index**: `tour_slug_index` - slug → tour id
//!
//! Slugs are only unique per organization on the server; the cache keeps the
//! most recently written tour for a slug.

use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, load_row, remove_index_entry, OfflineStore};
use crate::error::TourResult;
use crate::types::{Cached, Tour};

/// Table for cached tours (key: tour id, value: JSON `Cached<Tour>`)
pub(crate) const TOURS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tours");

/// Index for slug → tour id lookup
pub(crate) const TOUR_SLUG_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("tour_slug_index");

impl OfflineStore {
    /// Upsert a tour, replacing any previous snapshot.
    pub fn put_tour(&self, tour: &Tour) -> TourResult<()> {
        self.bulk_put_tours(std::slice::from_ref(tour))
    }

    /// Upsert many tours in one transaction.
    pub fn bulk_put_tours(&self, tours: &[Tour]) -> TourResult<()> {
        let cached_at = self.now_millis();
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(TOURS_TABLE)?;
            let mut slugs = write_txn.open_table(TOUR_SLUG_INDEX)?;

            for tour in tours {
                // A renamed slug must not keep resolving to this tour
                let previous: Option<Cached<Tour>> = load_row(&table, &tour.id)?;
                if let Some(previous) = previous {
                    if previous.entity.slug != tour.slug {
                        remove_index_entry(&mut slugs, &previous.entity.slug, &tour.id)?;
                    }
                }

                let data = encode(&Cached::new(tour.clone(), cached_at))?;
                table.insert(tour.id.as_str(), data.as_slice())?;
                slugs.insert(tour.slug.as_str(), tour.id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a cached tour by id.
    pub fn get_tour(&self, tour_id: &str) -> TourResult<Option<Cached<Tour>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TOURS_TABLE)?;
        load_row(&table, tour_id)
    }

    /// Load a cached tour by slug.
    pub fn get_tour_by_slug(&self, slug: &str) -> TourResult<Option<Cached<Tour>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;

        let slugs = read_txn.open_table(TOUR_SLUG_INDEX)?;
        let tour_id = match slugs.get(slug)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(TOURS_TABLE)?;
        load_row(&table, &tour_id)
    }

    /// Load every cached tour.
    pub fn list_tours(&self) -> TourResult<Vec<Cached<Tour>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TOURS_TABLE)?;

        let mut tours = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            tours.push(decode(value.value())?);
        }
        Ok(tours)
    }
}

//! Device-scoped state: notification preferences and tour progress.
//!
//! Unlike cached entities these rows are never evicted by age and survive
//! [`OfflineStore::clear_all`].

use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, OfflineStore};
use crate::error::TourResult;
use crate::types::{NotificationPreferences, TourProgress};

/// Table for device settings (key: setting name, value: JSON)
pub(crate) const PREFERENCES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("preferences");

/// Table for tour progress (key: tour id, value: JSON `TourProgress`)
pub(crate) const PROGRESS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("progress");

const PREFERENCES_KEY: &str = "notifications";

impl OfflineStore {
    pub fn save_preferences(&self, prefs: &NotificationPreferences) -> TourResult<()> {
        let data = encode(prefs)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(PREFERENCES_TABLE)?;
            table.insert(PREFERENCES_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Stored preferences, or `None` if nothing was saved yet.
    pub fn load_preferences(&self) -> TourResult<Option<NotificationPreferences>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PREFERENCES_TABLE)?;
        match table.get(PREFERENCES_KEY)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn save_progress(&self, progress: &TourProgress) -> TourResult<()> {
        let data = encode(progress)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(PROGRESS_TABLE)?;
            table.insert(progress.tour_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_progress(&self, tour_id: &str) -> TourResult<Option<TourProgress>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROGRESS_TABLE)?;
        match table.get(tour_id)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    /// Progress for every tour this device has started.
    pub fn list_progress(&self) -> TourResult<Vec<TourProgress>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROGRESS_TABLE)?;

        let mut all = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            all.push(decode(value.value())?);
        }
        Ok(all)
    }

    /// Delete progress for a tour. Returns whether anything was removed.
    pub fn delete_progress(&self, tour_id: &str) -> TourResult<bool> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(PROGRESS_TABLE)?;
            let removed = table.remove(tour_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

//! Binary asset cache
//!
//! Images and audio referenced by cached tours are stored here so they can be
//! rendered without a network. Keys are the BLAKE3 hash of the source URL, so
//! storing the same URL twice overwrites rather than duplicates.

use redb::{ReadableTable, TableDefinition};
use tracing::debug;

use super::OfflineStore;
use crate::error::TourResult;
use crate::types::CachedAsset;

/// Table for cached assets (key: BLAKE3 hex of URL, value: postcard `CachedAsset`)
pub(crate) const ASSETS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");

impl OfflineStore {
    /// Store the bytes fetched from `url`.
    pub fn put_asset(
        &self,
        url: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> TourResult<CachedAsset> {
        let asset = CachedAsset {
            url: url.to_string(),
            content_type: content_type.to_string(),
            data,
            cached_at: self.now_millis(),
        };
        let key = asset.key();
        let bytes = postcard::to_allocvec(&asset)?;

        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ASSETS_TABLE)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(url, size = asset.size(), "Cached asset");
        Ok(asset)
    }

    /// Load the cached asset for `url`.
    pub fn get_asset(&self, url: &str) -> TourResult<Option<CachedAsset>> {
        let key = CachedAsset::key_for(url);
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ASSETS_TABLE)?;

        match table.get(key.as_str())? {
            Some(v) => Ok(Some(postcard::from_bytes(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn has_asset(&self, url: &str) -> TourResult<bool> {
        let key = CachedAsset::key_for(url);
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ASSETS_TABLE)?;
        Ok(table.get(key.as_str())?.is_some())
    }

    /// A `data:` URL for the cached copy of `url`, if there is one.
    pub fn asset_data_url(&self, url: &str) -> TourResult<Option<String>> {
        Ok(self.get_asset(url)?.map(|asset| asset.to_data_url()))
    }

    /// Total payload bytes across all cached assets.
    pub fn total_asset_bytes(&self) -> TourResult<u64> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ASSETS_TABLE)?;

        let mut total = 0u64;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let asset: CachedAsset = postcard::from_bytes(value.value())?;
            total += asset.size() as u64;
        }
        Ok(total)
    }
}

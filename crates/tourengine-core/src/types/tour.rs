//! Tour graph entities as stored on the server and mirrored in the offline cache.
//!
//! Field names follow the server's column names, so rows returned by a
//! [`RecordSource`](crate::sync::RecordSource) deserialize directly into these types.

use serde::{Deserialize, Serialize};

use super::Coordinate;

/// A named, orderable collection of sites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tour {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub name: String,
    /// Unique per organization
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

/// A point of interest within a tour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub tour_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Canonical walking sequence and stamp number
    pub display_order: i32,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub slug: Option<String>,
}

impl Site {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
    #[default]
    #[serde(other)]
    Other,
}

/// A media file that can be attached to sites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub media_type: MediaType,
    /// Absolute URL, when the server already resolved one
    #[serde(default)]
    pub file_url: Option<String>,
    /// Path inside the media bucket, resolved through an object store
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Join row between a site and a media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMediaLink {
    pub id: String,
    pub site_id: String,
    pub media_id: String,
    #[serde(default)]
    pub display_order: i32,
}

/// A site together with its linked media, ordered by link display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteWithMedia {
    #[serde(flatten)]
    pub site: Site,
    pub media: Vec<Media>,
}

/// The canonical nested tour shape handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourWithSites {
    #[serde(flatten)]
    pub tour: Tour,
    pub sites: Vec<SiteWithMedia>,
}

impl TourWithSites {
    /// Assemble the nested shape from flat rows.
    ///
    /// Sites are ordered by `display_order`; each site receives the media its
    /// links point at, ordered by the link's `display_order`. Links whose media
    /// row is missing are skipped.
    pub fn assemble(
        tour: Tour,
        mut sites: Vec<Site>,
        mut links: Vec<SiteMediaLink>,
        media: &[Media],
    ) -> Self {
        sites.sort_by_key(|s| s.display_order);
        links.sort_by_key(|l| l.display_order);

        let sites = sites
            .into_iter()
            .map(|site| {
                let media = links
                    .iter()
                    .filter(|l| l.site_id == site.id)
                    .filter_map(|l| media.iter().find(|m| m.id == l.media_id).cloned())
                    .collect();
                SiteWithMedia { site, media }
            })
            .collect();

        Self { tour, sites }
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn find_site(&self, site_id: &str) -> Option<&SiteWithMedia> {
        self.sites.iter().find(|s| s.site.id == site_id)
    }

    /// The plain sites, in display order.
    pub fn plain_sites(&self) -> Vec<Site> {
        self.sites.iter().map(|s| s.site.clone()).collect()
    }
}

/// A cached snapshot of a server entity
///
/// A re-sync replaces the whole snapshot; partial updates are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    #[serde(flatten)]
    pub entity: T,
    /// Milliseconds since the Unix epoch
    pub cached_at: i64,
}

impl<T> Cached<T> {
    pub fn new(entity: T, cached_at: i64) -> Self {
        Self { entity, cached_at }
    }

    pub fn into_inner(self) -> T {
        self.entity
    }

    /// Whether this snapshot is strictly older than `cutoff`.
    pub fn is_older_than(&self, cutoff: i64) -> bool {
        self.cached_at < cutoff
    }
}

/// A cached binary asset, keyed by the hash of its source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAsset {
    pub url: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub cached_at: i64,
}

impl CachedAsset {
    /// Derive the stable key for a source URL (BLAKE3 hex).
    pub fn key_for(url: &str) -> String {
        blake3::hash(url.as_bytes()).to_hex().to_string()
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.url)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// A locally-dereferenceable `data:` URL for the stored bytes.
    pub fn to_data_url(&self) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

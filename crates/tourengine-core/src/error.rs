//! Error types for the tour engine

use thiserror::Error;

/// Main error type for tour engine operations
#[derive(Error, Debug)]
pub enum TourError {
    /// The platform refused access to the device location
    #[error("Location permission denied")]
    PermissionDenied,

    /// The platform could not resolve a position
    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    /// No position arrived before the deadline
    #[error("Location request timed out after {0} ms")]
    LocationTimeout(u64),

    /// A required network read failed while syncing a tour
    #[error("Failed to fetch {what}: {reason}")]
    FetchFailed {
        /// Which part of the tour graph was being fetched
        what: String,
        /// Underlying failure
        reason: String,
    },

    /// Address lookup returned no result
    #[error("Geocode not found: {0}")]
    GeocodeNotFound(String),

    /// A binary asset could not be downloaded
    #[error("Asset fetch failed for {url}: {reason}")]
    AssetFetch {
        /// Source URL of the asset
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Transport or validation error from the record source
    #[error("Network error: {0}")]
    Network(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl TourError {
    /// Build a `FetchFailed` error for one part of the tour graph.
    pub fn fetch_failed(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TourError::FetchFailed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the geolocation layer.
    pub fn is_location_error(&self) -> bool {
        matches!(
            self,
            TourError::PermissionDenied
                | TourError::PositionUnavailable(_)
                | TourError::LocationTimeout(_)
        )
    }
}

impl From<serde_json::Error> for TourError {
    fn from(err: serde_json::Error) -> Self {
        TourError::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for TourError {
    fn from(err: postcard::Error) -> Self {
        TourError::Serialization(err.to_string())
    }
}

/// Result type alias using TourError
pub type TourResult<T> = Result<T, TourError>;

//! Engine configuration
//!
//! Loaded from a JSON file. Every section and field is optional; a missing file
//! yields the defaults. `TOURENGINE_API_KEY` and `TOURENGINE_BASE_URL` override
//! the backend credentials.
//!
//! ```json
//! {
//!   "backend": { "base_url": "https://api.example.com", "api_key": "..." },
//!   "cache": { "max_age_days": 7 },
//!   "proximity": { "check_interval_ms": 5000, "rearm_after_secs": 3600 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TourError, TourResult};
use crate::location::DEFAULT_LOCATION_TIMEOUT;
use crate::proximity::ProximityConfig;
use crate::sync::SyncSettings;
use crate::types::progress::DEFAULT_RADIUS_METERS;

pub const API_KEY_ENV: &str = "TOURENGINE_API_KEY";
pub const BASE_URL_ENV: &str = "TOURENGINE_BASE_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub proximity: ProximitySettings,
    pub location: LocationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub media_bucket: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            media_bucket: "media".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_age_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_age_days: 7 }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximitySettings {
    pub check_interval_ms: u64,
    pub final_destination_delay_ms: u64,
    /// Radius applied when the device has no saved preference
    pub default_radius_m: f64,
    pub rearm_after_secs: Option<u64>,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            check_interval_ms: 5000,
            final_destination_delay_ms: 2000,
            default_radius_m: DEFAULT_RADIUS_METERS,
            rearm_after_secs: None,
        }
    }
}

impl ProximitySettings {
    pub fn to_config(&self) -> ProximityConfig {
        ProximityConfig {
            check_interval: Duration::from_millis(self.check_interval_ms),
            final_destination_delay: Duration::from_millis(self.final_destination_delay_ms),
            rearm_after: self.rearm_after_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_LOCATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl LocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    /// Load from `path` (defaults if the file does not exist), then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> TourResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data).map_err(|e| {
                TourError::Config(format!("{}: {}", path.display(), e))
            })?
        } else {
            debug!(?path, "No config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.backend.api_key = Some(key);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.backend.base_url = Some(url);
        }
    }

    pub fn validate(&self) -> TourResult<()> {
        if self.proximity.check_interval_ms == 0 {
            return Err(TourError::Config(
                "proximity.check_interval_ms must be positive".to_string(),
            ));
        }
        if !self.proximity.default_radius_m.is_finite() || self.proximity.default_radius_m <= 0.0
        {
            return Err(TourError::Config(
                "proximity.default_radius_m must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            media_bucket: self.backend.media_bucket.clone(),
            max_cache_age: self.cache.max_age(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::load(temp.path().join("none.json")).unwrap();
        // Environment may carry credentials on a developer machine
        config.backend.api_key = None;
        config.backend.base_url = None;
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.max_age(), crate::storage::DEFAULT_MAX_CACHE_AGE);
        assert_eq!(config.location.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"proximity": {"rearm_after_secs": 600}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        let proximity = config.proximity.to_config();
        assert_eq!(proximity.rearm_after, Some(Duration::from_secs(600)));
        assert_eq!(proximity.check_interval, Duration::from_millis(5000));
        assert_eq!(config.cache.max_age_days, 7);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(TourError::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = EngineConfig::default();
        config.proximity.check_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config.apply_env(|key| match key {
            API_KEY_ENV => Some("secret".to_string()),
            BASE_URL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.backend.api_key.as_deref(), Some("secret"));
        assert_eq!(config.backend.base_url, None);
    }
}

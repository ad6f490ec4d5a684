//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so a minimal file only needs
//! the precache lists:
//!
//! ```toml
//! version = "2024.06.1"
//! static_assets = ["/", "/app.js", "/style.css"]
//! routes = ["/notes", "/settings"]
//! retry_urls = ["/api/ping"]
//! fallback_url = "/offline.html"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default prefix for snapshot names.
pub const DEFAULT_CACHE_PREFIX: &str = "kpio-offline";

/// Default offline fallback document.
pub const DEFAULT_FALLBACK_URL: &str = "/offline.html";

/// Default deferred-trigger tag.
pub const DEFAULT_SYNC_TAG: &str = "retry-requests";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OfflineConfig {
    /// Build version tag; embedded in the current snapshot name.
    pub version: String,
    /// Prefix for snapshot names (`<prefix>-<version>`).
    pub cache_prefix: String,
    /// Static assets precached at install.
    pub static_assets: Vec<String>,
    /// Application routes precached at install.
    pub routes: Vec<String>,
    /// URLs queued while offline regardless of method.
    pub retry_urls: Vec<String>,
    /// Document served when nothing cached or live is obtainable.
    pub fallback_url: String,
    /// Tag used for deferred-trigger registration and sync events.
    pub sync_tag: String,
    /// Directory for the file-backed request store, when persistence is on.
    pub store_dir: Option<PathBuf>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            version: String::from(env!("CARGO_PKG_VERSION")),
            cache_prefix: String::from(DEFAULT_CACHE_PREFIX),
            static_assets: Vec::new(),
            routes: Vec::new(),
            retry_urls: Vec::new(),
            fallback_url: String::from(DEFAULT_FALLBACK_URL),
            sync_tag: String::from(DEFAULT_SYNC_TAG),
            store_dir: None,
        }
    }
}

impl OfflineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("version must not be empty")));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "cache_prefix must not be empty",
            )));
        }
        if !self.fallback_url.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "fallback_url must be an absolute path, got {:?}",
                self.fallback_url
            )));
        }
        if self.sync_tag.is_empty() {
            return Err(ConfigError::Invalid(String::from("sync_tag must not be empty")));
        }
        Ok(())
    }

    /// Name of the snapshot owned by this build.
    pub fn current_cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Static assets followed by routes. Duplicates are kept.
    pub fn precache_urls(&self) -> Vec<String> {
        self.static_assets
            .iter()
            .chain(self.routes.iter())
            .cloned()
            .collect()
    }
}

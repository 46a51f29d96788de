//! Worker configuration.
//!
//! Every value here is fixed for the lifetime of a worker version: it is built
//! once, handed to [`crate::OfflineWorker::new`] and only read afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors raised while loading or validating a [`WorkerConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL {path:?}: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Cache name must not be empty")]
    EmptyCacheName,

    #[error("{0} is not same-origin with the worker scope")]
    CrossOrigin(String),
}

/// Configuration for the offline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin every relative path below is resolved against.
    pub origin: Url,

    /// Versioned cache bucket name. Changing it retires older buckets on activate.
    pub cache_name: String,

    /// Paths fetched and stored on install.
    pub precache: Vec<String>,

    /// Path served from the cache when the network is unreachable.
    pub offline_fallback: String,

    /// Title of push notifications.
    pub app_name: String,

    /// Notification body used when a push carries no payload.
    pub default_notification_body: String,

    /// Notification icon path.
    pub notification_icon: String,

    /// Notification badge path.
    pub notification_badge: String,

    /// Background sync tag that triggers the results sync.
    pub sync_tag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:5000/").expect("static origin is valid"),
            cache_name: "celpip-practice-v1".to_string(),
            precache: vec!["/".to_string(), "/static/manifest.json".to_string()],
            offline_fallback: "/offline.html".to_string(),
            app_name: "CELPIP Practice".to_string(),
            default_notification_body: "New notification".to_string(),
            notification_icon: "/static/icons/icon-192x192.png".to_string(),
            notification_badge: "/static/icons/icon-72x72.png".to_string(),
            sync_tag: "sync-test-results".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Default configuration served from `origin`.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Load from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a configured path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin.join(path).map_err(|source| ConfigError::Url {
            path: path.to_string(),
            source,
        })
    }

    /// Pre-cache list resolved to absolute URLs.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the offline fallback page.
    pub fn offline_fallback_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.offline_fallback)
    }

    /// Whether `url` shares the worker's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Check the invariants the handlers rely on.
    ///
    /// Pre-cache entries and the fallback must be same-origin: a cross-origin
    /// entry would come back opaque and fail the install batch every time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::EmptyCacheName);
        }
        for url in self
            .precache_urls()?
            .into_iter()
            .chain(std::iter::once(self.offline_fallback_url()?))
        {
            if !self.is_same_origin(&url) {
                return Err(ConfigError::CrossOrigin(url.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "celpip-practice-v1");
        assert_eq!(config.precache, vec!["/", "/static/manifest.json"]);
        assert_eq!(config.offline_fallback, "/offline.html");
        assert_eq!(config.sync_tag, "sync-test-results");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_paths() {
        let config = WorkerConfig::for_origin(Url::parse("https://practice.example/").unwrap());
        let urls = config.precache_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://practice.example/");
        assert_eq!(urls[1].as_str(), "https://practice.example/static/manifest.json");
        assert_eq!(
            config.offline_fallback_url().unwrap().as_str(),
            "https://practice.example/offline.html"
        );
    }

    #[test]
    fn test_from_json_partial() {
        let config = WorkerConfig::from_json(
            r#"{ "origin": "https://practice.example/", "cache_name": "celpip-practice-v2" }"#,
        )
        .unwrap();
        assert_eq!(config.cache_name, "celpip-practice-v2");
        assert_eq!(config.app_name, "CELPIP Practice");
    }

    #[test]
    fn test_rejects_cross_origin_precache() {
        let result = WorkerConfig::from_json(
            r#"{ "origin": "https://practice.example/", "precache": ["/", "https://cdn.example/app.js"] }"#,
        );
        assert!(matches!(result, Err(ConfigError::CrossOrigin(_))));
    }

    #[test]
    fn test_rejects_empty_cache_name() {
        let config = WorkerConfig {
            cache_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCacheName)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            WorkerConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }
}

//! Cache storage: named buckets of request → response entries.
//!
//! [`CacheStorage`] is the seam the worker talks to. [`MemoryCacheStorage`] is
//! the in-process implementation; it can be snapshotted to JSON so a host can
//! keep buckets across restarts.

use async_trait::async_trait;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::message::{RequestKey, Response, ResponseType};

/// Errors raised by a cache store.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache {0} is not open")]
    NotOpen(String),

    #[error("Stored entry for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Asynchronous cache store shared by every event the worker handles.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check whether a bucket exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Bucket names in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Look up a request in one bucket.
    async fn match_in(&self, name: &str, key: &RequestKey)
        -> Result<Option<Response>, CacheError>;

    /// Store a response, replacing any entry under the same key.
    async fn put(&self, name: &str, key: RequestKey, response: Response)
        -> Result<(), CacheError>;

    /// Store a batch of responses. Either all are written or none are.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError>;

    /// Request keys stored in a bucket.
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError>;
}

// ==================== Entries ====================

/// A stored response in serializable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in order, repeats included. Values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Response type at the time it was stored.
    pub response_type: ResponseType,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for storage under `key`.
    pub fn capture(key: &RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: key.url.clone(),
            method: key.method.clone(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            response_type: response.response_type,
            cached_at: now_millis(),
        }
    }

    /// Key this entry is stored under.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild the response.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let status = StatusCode::from_u16(self.status).map_err(|e| CacheError::Corrupt {
            key: self.key().to_string(),
            reason: e.to_string(),
        })?;

        let corrupt = |reason: String| CacheError::Corrupt {
            key: self.key().to_string(),
            reason,
        };

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(e.to_string()))?;
            let value = HeaderValue::from_bytes(value).map_err(|e| corrupt(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Response {
            url: url::Url::parse(&self.url).ok(),
            status,
            headers,
            body: self.body.clone().into(),
            response_type: self.response_type,
        })
    }
}

// ==================== In-memory store ====================

/// One named bucket.
#[derive(Debug, Clone, Default)]
struct Cache {
    /// Cache name.
    name: String,

    /// Creation sequence, used to order bucket names.
    created: u64,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    fn new(name: &str, created: u64) -> Self {
        Self {
            name: name.to_string(),
            created,
            entries: HashMap::new(),
        }
    }
}

/// Serialized form of a [`MemoryCacheStorage`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    caches: Vec<SnapshotCache>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotCache {
    name: String,
    entries: Vec<CacheEntry>,
}

/// In-process cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
    sequence: AtomicU64,
}

impl MemoryCacheStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize every bucket to JSON.
    pub async fn to_json(&self) -> Result<String, CacheError> {
        let caches = self.caches.read().await;
        let mut ordered: Vec<&Cache> = caches.values().collect();
        ordered.sort_by_key(|c| c.created);

        let snapshot = Snapshot {
            caches: ordered
                .into_iter()
                .map(|cache| {
                    let mut entries: Vec<CacheEntry> = cache.entries.values().cloned().collect();
                    entries.sort_by(|a, b| a.url.cmp(&b.url).then(a.method.cmp(&b.method)));
                    SnapshotCache {
                        name: cache.name.clone(),
                        entries,
                    }
                })
                .collect(),
        };

        serde_json::to_string_pretty(&snapshot).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    /// Restore a store from [`MemoryCacheStorage::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|e| CacheError::Snapshot(e.to_string()))?;

        let mut store = Self::new();
        let mut caches = HashMap::new();
        for saved in snapshot.caches {
            let mut cache = Cache::new(&saved.name, store.next_sequence());
            for entry in saved.entries {
                cache.entries.insert(entry.key(), entry);
            }
            caches.insert(saved.name, cache);
        }
        *store.caches.get_mut() = caches;
        Ok(store)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            debug!(cache = %name, "Creating cache");
            let cache = Cache::new(name, self.next_sequence());
            caches.insert(name.to_string(), cache);
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let caches = self.caches.read().await;
        let mut ordered: Vec<&Cache> = caches.values().collect();
        ordered.sort_by_key(|c| c.created);
        Ok(ordered.into_iter().map(|c| c.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await;
        let Some(cache) = caches.get(name) else {
            return Ok(None);
        };
        match cache.entries.get(key) {
            Some(entry) => {
                trace!(cache = %name, %key, "Cache hit");
                entry.to_response().map(Some)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::capture(&key, &response);
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            let cache = Cache::new(name, self.next_sequence());
            caches.insert(name.to_string(), cache);
        }
        if let Some(cache) = caches.get_mut(name) {
            trace!(cache = %name, %key, "Storing entry");
            cache.entries.insert(key, entry);
        }
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let captured: Vec<(RequestKey, CacheEntry)> = entries
            .iter()
            .map(|(key, response)| (key.clone(), CacheEntry::capture(key, response)))
            .collect();

        // Single write lock: readers never observe half a batch.
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| CacheError::NotOpen(name.to_string()))?;
        cache.entries.extend(captured);
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(name)
            .ok_or_else(|| CacheError::NotOpen(name.to_string()))?;
        let mut keys: Vec<RequestKey> = cache.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

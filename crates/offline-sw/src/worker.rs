//! The offline worker: cache-first fetch handling plus the lifecycle,
//! sync and push handlers around it.

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use http::Method;
use offline_common::ResultExt;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::CacheStorage;
use crate::config::{ConfigError, WorkerConfig};
use crate::events::{
    ActivateEvent, ActivateOutcome, FetchEvent, FetchResolution, FetchSource, InstallEvent,
    InstallOutcome, PushEvent, PushOutcome, SyncEvent, SyncOutcome, WorkerHandlers,
};
use crate::message::{Request, RequestKey, Response};
use crate::network::NetworkFetch;
use crate::notify::{NotificationOptions, NotificationSink};
use crate::ServiceWorkerError;

/// Cache-first worker for one versioned cache bucket.
pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn NetworkFetch>,
    notifier: Arc<dyn NotificationSink>,
}

impl fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("cache_name", &self.config.cache_name)
            .field("origin", &self.config.origin.as_str())
            .finish_non_exhaustive()
    }
}

impl OfflineWorker {
    /// Create a worker. Fails if the configuration breaks a handler invariant.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn NetworkFetch>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            caches,
            network,
            notifier,
        })
    }

    /// The configuration this worker was built with.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Fetch every pre-cache URL and store the results as one batch.
    ///
    /// Any transport failure or non-2xx status fails the whole batch and
    /// nothing is written; the bucket itself is still created.
    pub async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let name = &self.config.cache_name;
        self.caches.open(name).await?;
        debug!(cache = %name, "Opened cache");

        let fetches = self.config.precache_urls()?.into_iter().map(|url| {
            let network = Arc::clone(&self.network);
            async move {
                let request = Request::get(url);
                let key = request.key();
                let response = network.fetch(request).await?;
                if !response.ok() {
                    return Err(ServiceWorkerError::BadStatus {
                        url: key.url,
                        status: response.status.as_u16(),
                    });
                }
                Ok::<_, ServiceWorkerError>((key, response))
            }
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.caches.put_all(name, entries).await?;
        Ok(count)
    }

    /// Delete every bucket other than the current one. Returns the deleted names.
    pub async fn prune_caches(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let keep = [self.config.cache_name.as_str()];
        let stale: Vec<String> = self
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| !keep.contains(&name.as_str()))
            .collect();

        let deletions = stale.into_iter().map(|name| {
            let caches = Arc::clone(&self.caches);
            async move {
                let result = caches.delete(&name).await;
                (name, result)
            }
        });

        let mut deleted = Vec::new();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => {
                    info!(cache = %name, "Deleted stale cache");
                    deleted.push(name);
                }
                Ok(false) => trace!(cache = %name, "Stale cache already gone"),
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete stale cache"),
            }
        }
        Ok(deleted)
    }

    /// Store `response` on a detached task.
    fn spawn_cache_write(&self, key: RequestKey, response: Response) -> JoinHandle<()> {
        let caches = Arc::clone(&self.caches);
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            trace!(%key, cache = %config.cache_name, "Caching network response");
            caches
                .put(&config.cache_name, key, response)
                .await
                .log_err("Background cache write failed");
        })
    }

    /// Resolve with the cached offline page, or nothing.
    async fn offline_fallback(&self) -> FetchResolution {
        let response = match self.config.offline_fallback_url() {
            Ok(url) => {
                let key = Request::get(url).key();
                self.caches
                    .match_in(&self.config.cache_name, &key)
                    .await
                    .log_err("Offline fallback lookup failed")
                    .flatten()
            }
            Err(e) => {
                warn!(error = %e, "Offline fallback path does not resolve");
                None
            }
        };

        if response.is_none() {
            warn!(path = %self.config.offline_fallback, "No cached offline page");
        }
        FetchResolution::new(response, FetchSource::OfflineFallback)
    }

    /// Placeholder for pushing locally recorded results once connectivity returns.
    async fn sync_test_results(&self) {
        info!("Syncing test results");
    }
}

#[async_trait]
impl WorkerHandlers for OfflineWorker {
    async fn on_install(&self, _event: InstallEvent) -> InstallOutcome {
        let (precached, precache_error) = match self.precache().await {
            Ok(count) => {
                info!(cache = %self.config.cache_name, entries = count, "Pre-cache complete");
                (count, None)
            }
            Err(e) => {
                warn!(cache = %self.config.cache_name, error = %e, "Cache installation failed");
                (0, Some(e.to_string()))
            }
        };

        InstallOutcome {
            precached,
            precache_error,
            skip_waiting: true,
        }
    }

    async fn on_activate(&self, _event: ActivateEvent) -> ActivateOutcome {
        let deleted = self
            .prune_caches()
            .await
            .log_err("Failed to enumerate caches")
            .unwrap_or_default();

        ActivateOutcome {
            deleted,
            claim_clients: true,
        }
    }

    async fn on_fetch(&self, event: FetchEvent) -> Option<FetchResolution> {
        let key = event.request.key();

        match self.caches.match_in(&self.config.cache_name, &key).await {
            Ok(Some(response)) => {
                trace!(%key, "Serving from cache");
                return Some(FetchResolution::new(Some(response), FetchSource::Cache));
            }
            Ok(None) => {}
            Err(e) => debug!(%key, error = %e, "Cache lookup failed, treating as miss"),
        }

        let fetch_request = event.request.clone();
        let response = match self.network.fetch(fetch_request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(%key, error = %e, "Network failed, serving offline fallback");
                return Some(self.offline_fallback().await);
            }
        };

        if !response.is_cacheable() {
            trace!(
                %key,
                status = response.status.as_u16(),
                response_type = ?response.response_type,
                "Response not cacheable"
            );
            return Some(FetchResolution::new(Some(response), FetchSource::Network));
        }

        // The cache rejects non-GET entries; such responses are passed through.
        if event.request.method != Method::GET {
            trace!(%key, "Skipping cache write for non-GET request");
            return Some(FetchResolution::new(Some(response), FetchSource::Network));
        }

        let cache_write = self.spawn_cache_write(key, response.clone());
        Some(FetchResolution {
            response: Some(response),
            source: FetchSource::Network,
            cache_write: Some(cache_write),
        })
    }

    async fn on_sync(&self, event: SyncEvent) -> SyncOutcome {
        if event.tag != self.config.sync_tag {
            trace!(tag = %event.tag, "Ignoring sync tag");
            return SyncOutcome::Ignored;
        }
        self.sync_test_results().await;
        SyncOutcome::Synced
    }

    async fn on_push(&self, event: PushEvent) -> Option<PushOutcome> {
        let options = NotificationOptions {
            body: event
                .text()
                .unwrap_or_else(|| self.config.default_notification_body.clone()),
            icon: self.config.notification_icon.clone(),
            badge: self.config.notification_badge.clone(),
        };
        let title = self.config.app_name.clone();

        let shown = self
            .notifier
            .show_notification(&title, options.clone())
            .await
            .log_err("Failed to show notification")
            .is_some();

        Some(PushOutcome {
            title,
            options,
            shown,
        })
    }
}

//! Events dispatched to a worker and the handler trait that receives them.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::message::{Request, Response};
use crate::notify::NotificationOptions;

/// `install` lifecycle event.
#[derive(Debug, Clone, Default)]
pub struct InstallEvent;

/// `activate` lifecycle event.
#[derive(Debug, Clone, Default)]
pub struct ActivateEvent;

/// A request from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Client that issued the request.
    pub client_id: Option<String>,
}

impl FetchEvent {
    /// Request with no known client.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.request.is_navigation()
    }
}

/// Connectivity came back for a previously registered sync tag.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// A push message, with an optional payload.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    /// Push carrying a text payload.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            data: Some(Bytes::from(text.into())),
        }
    }

    /// Payload decoded as UTF-8, lossily.
    pub fn text(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }
}

// ==================== Outcomes ====================

/// Result of handling `install`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Entries written by the pre-cache batch.
    pub precached: usize,

    /// Why the pre-cache batch failed, if it did. Install completes regardless.
    pub precache_error: Option<String>,

    /// Ask the host to activate without waiting for old clients to close.
    pub skip_waiting: bool,
}

/// Result of handling `activate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Buckets deleted as stale.
    pub deleted: Vec<String>,

    /// Ask the host to take control of every open client.
    pub claim_clients: bool,
}

/// Where a fetch resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Served from the cache without touching the network.
    Cache,
    /// Fresh from the network.
    Network,
    /// Network failed; served the cached offline page (or nothing).
    OfflineFallback,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchSource::Cache => "cache",
            FetchSource::Network => "network",
            FetchSource::OfflineFallback => "offline-fallback",
        }
    }
}

/// The single answer a fetch event receives.
#[derive(Debug)]
pub struct FetchResolution {
    /// Response handed to the page. `None` only for an offline fallback miss.
    pub response: Option<Response>,

    /// Where it came from.
    pub source: FetchSource,

    /// Detached cache write started for a fresh response.
    ///
    /// The response is already usable; awaiting this only observes the write.
    pub cache_write: Option<JoinHandle<()>>,
}

impl FetchResolution {
    pub(crate) fn new(response: Option<Response>, source: FetchSource) -> Self {
        Self {
            response,
            source,
            cache_write: None,
        }
    }
}

/// Result of handling `sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The tag matched and the sync routine ran.
    Synced,
    /// The tag is not one this worker handles.
    Ignored,
}

/// Result of handling `push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub title: String,
    pub options: NotificationOptions,
    /// Whether the notification sink accepted it.
    pub shown: bool,
}

// ==================== Handlers ====================

/// Handler set registered with a [`crate::ServiceWorkerRuntime`].
///
/// Each method is awaited to completion by the runtime before the event is
/// considered finished. Defaults mirror a worker that registers no listener
/// for the event.
#[async_trait]
pub trait WorkerHandlers: Send + Sync {
    async fn on_install(&self, _event: InstallEvent) -> InstallOutcome {
        InstallOutcome::default()
    }

    async fn on_activate(&self, _event: ActivateEvent) -> ActivateOutcome {
        ActivateOutcome::default()
    }

    /// `None` means the worker did not respond and the host goes to the network itself.
    async fn on_fetch(&self, _event: FetchEvent) -> Option<FetchResolution> {
        None
    }

    async fn on_sync(&self, _event: SyncEvent) -> SyncOutcome {
        SyncOutcome::Ignored
    }

    async fn on_push(&self, _event: PushEvent) -> Option<PushOutcome> {
        None
    }
}

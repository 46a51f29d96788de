//! # Offline Service Worker
//!
//! Cache-first offline support for the CELPIP Practice web app.
//!
//! ## Features
//!
//! - **Install**: pre-cache a fixed list of same-origin assets as one batch
//! - **Fetch**: cache, then network, then a cached offline page
//! - **Activate**: delete every cache bucket but the current version's
//! - **Sync / Push**: results-sync stub and push notifications
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRuntime (host side)
//!     │   registration: installing / waiting / active
//!     │   clients: open pages and their controller
//!     │
//!     └── dyn WorkerHandlers
//!             └── OfflineWorker
//!                     ├── dyn CacheStorage      (buckets of Request → Response)
//!                     ├── dyn NetworkFetch
//!                     └── dyn NotificationSink
//! ```
//!
//! Handlers are plain async methods over their collaborators, so they can be
//! driven directly in tests without a runtime.

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod events;
pub mod message;
pub mod network;
pub mod notify;
pub mod registration;
pub mod runtime;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheEntry, CacheError, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, Clients};
pub use config::{ConfigError, WorkerConfig};
pub use events::{
    ActivateEvent, ActivateOutcome, FetchEvent, FetchResolution, FetchSource, InstallEvent,
    InstallOutcome, PushEvent, PushOutcome, SyncEvent, SyncOutcome, WorkerHandlers,
};
pub use message::{Request, RequestKey, RequestMode, Response, ResponseType};
pub use network::{NetworkError, NetworkFetch};
pub use notify::{LogNotifier, NotificationError, NotificationOptions, NotificationSink};
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use runtime::{RegistrationReport, ServiceWorkerEvent, ServiceWorkerRuntime};
pub use worker::OfflineWorker;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Security error: {0}")]
    Security(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

//! Collaborator fakes for tests.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheError, CacheStorage};
use crate::message::{Request, RequestKey, Response};
use crate::network::{NetworkError, NetworkFetch};
use crate::notify::{NotificationError, NotificationOptions, NotificationSink};

/// Network that answers from a fixed table of URL → response.
///
/// Unknown URLs fail as if the server were unreachable.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for GET and POST requests to `url`.
    pub fn respond(&self, url: Url, response: Response) {
        let response = response.with_url(url.clone());
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Fail every request while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of requests that reached the network.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkFetch for FakeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline);
        }
        self.routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| NetworkError::Failed(format!("no route for {}", request.url)))
    }
}

/// Notification sink that records what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, NotificationOptions)>>,
    denied: AtomicBool,
}

impl RecordingNotifier {
    /// Reject every notification from now on.
    pub fn deny(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    /// Notifications shown so far, as (title, options).
    pub fn shown(&self) -> Vec<(String, NotificationOptions)> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<(), NotificationError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(NotificationError::PermissionDenied);
        }
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), options));
        Ok(())
    }
}

/// Cache store wrapper that injects write and delete failures.
#[derive(Debug)]
pub struct FaultyCaches<S> {
    inner: S,
    fail_writes: bool,
    undeletable: Vec<String>,
}

impl<S> FaultyCaches<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: false,
            undeletable: Vec::new(),
        }
    }

    /// Fail every `put` and `put_all`.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Fail `delete` for bucket `name`.
    pub fn undeletable(mut self, name: &str) -> Self {
        self.undeletable.push(name.to_string());
        self
    }

    fn quota() -> CacheError {
        CacheError::Storage("quota exceeded".to_string())
    }
}

#[async_trait]
impl<S: CacheStorage> CacheStorage for FaultyCaches<S> {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.undeletable.iter().any(|n| n == name) {
            return Err(CacheError::Storage(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        self.inner.match_in(name, key).await
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        if self.fail_writes {
            return Err(Self::quota());
        }
        self.inner.put(name, key, response).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        if self.fail_writes {
            return Err(Self::quota());
        }
        self.inner.put_all(name, entries).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        self.inner.entries(name).await
    }
}

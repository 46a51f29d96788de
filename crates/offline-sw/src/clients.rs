//! Pages open under the worker's scope and which version controls them.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::registration::ServiceWorkerId;

/// A client (controlled page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker version currently serving this page's fetches.
    pub controller: Option<ServiceWorkerId>,
}

/// Open clients, keyed by ID.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty client list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Open a page. New pages are controlled by `controller` when given.
    pub fn open(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            id: id.clone(),
            url,
            controller,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Close a page.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients sorted by ID; uncontrolled ones only when asked for.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| include_uncontrolled || c.controller.is_some())
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Make `worker` the controller of every client under `scope`.
    ///
    /// Returns the IDs whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    /// Drop control by `worker` from every client, e.g. after unregistering.
    pub fn release(&mut self, worker: ServiceWorkerId) {
        for client in self.clients.values_mut() {
            if client.controller == Some(worker) {
                client.controller = None;
            }
        }
    }

    /// Check whether `id` is controlled by `worker`.
    pub fn is_controlled_by(&self, id: &str, worker: ServiceWorkerId) -> bool {
        self.get(id).and_then(|c| c.controller) == Some(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::ServiceWorker;

    fn url(path: &str) -> Url {
        Url::parse("https://practice.example/").unwrap().join(path).unwrap()
    }

    fn worker_id() -> ServiceWorkerId {
        ServiceWorker::new(url("/static/sw.js")).id
    }

    #[test]
    fn test_open_and_remove() {
        let mut clients = Clients::new();
        let client = clients.open(url("/"), None);
        assert!(clients.get(&client.id).is_some());
        assert_eq!(clients.remove(&client.id), Some(client.clone()));
        assert!(clients.get(&client.id).is_none());
    }

    #[test]
    fn test_claim_takes_over_scope() {
        let mut clients = Clients::new();
        let old = worker_id();
        let new = worker_id();
        let home = clients.open(url("/"), None);
        let quiz = clients.open(url("/practice/reading"), Some(old));
        let outside = clients.open(Url::parse("https://other.example/").unwrap(), None);

        let changed = clients.claim(new, &url("/"));
        assert_eq!(changed.len(), 2);
        assert!(clients.is_controlled_by(&home.id, new));
        assert!(clients.is_controlled_by(&quiz.id, new));
        assert!(!clients.is_controlled_by(&outside.id, new));

        // Claiming again changes nothing.
        assert!(clients.claim(new, &url("/")).is_empty());
    }

    #[test]
    fn test_match_all_and_release() {
        let mut clients = Clients::new();
        let worker = worker_id();
        clients.open(url("/"), Some(worker));
        clients.open(url("/results"), None);

        assert_eq!(clients.match_all(false).len(), 1);
        assert_eq!(clients.match_all(true).len(), 2);

        clients.release(worker);
        assert!(clients.match_all(false).is_empty());
    }
}

//! Host side: registers worker versions, drives their lifecycle and routes
//! fetch, sync and push events to the active one.

use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument};
use url::Url;

use crate::clients::{Client, Clients};
use crate::events::{
    ActivateEvent, ActivateOutcome, FetchEvent, FetchResolution, FetchSource, InstallEvent,
    InstallOutcome, PushEvent, PushOutcome, SyncEvent, SyncOutcome, WorkerHandlers,
};
use crate::message::Request;
use crate::network::NetworkFetch;
use crate::registration::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
use crate::ServiceWorkerError;

/// Notifications emitted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker version changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A client is now served by a different worker version.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A push handler displayed a notification.
    NotificationShown { title: String },
}

/// What happened while registering a worker version.
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    pub worker_id: ServiceWorkerId,
    pub install: InstallOutcome,
    /// Present if the version activated during registration.
    pub activate: Option<ActivateOutcome>,
}

/// Event dispatcher for one registration scope.
pub struct ServiceWorkerRuntime {
    registration: RwLock<ServiceWorkerRegistration>,
    handlers: RwLock<HashMap<ServiceWorkerId, Arc<dyn WorkerHandlers>>>,
    clients: RwLock<Clients>,
    network: Arc<dyn NetworkFetch>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerRuntime {
    /// Create a runtime for `scope`. `network` serves requests no worker answers.
    pub fn new(
        scope: Url,
        network: Arc<dyn NetworkFetch>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(ServiceWorkerRegistration::new(scope)),
                handlers: RwLock::new(HashMap::new()),
                clients: RwLock::new(Clients::new()),
                network,
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            new_state: worker.state,
        });
    }

    async fn handlers_for(&self, id: ServiceWorkerId) -> Option<Arc<dyn WorkerHandlers>> {
        self.handlers.read().await.get(&id).cloned()
    }

    /// Register a new worker version and run it through install, and through
    /// activate when it may take over immediately.
    #[instrument(skip(self, handlers), fields(script = %script_url))]
    pub async fn register(
        &self,
        script_url: Url,
        handlers: Arc<dyn WorkerHandlers>,
    ) -> Result<RegistrationReport, ServiceWorkerError> {
        {
            let registration = self.registration.read().await;
            if script_url.origin() != registration.scope.origin() {
                return Err(ServiceWorkerError::Security(format!(
                    "{script_url} is outside scope {}",
                    registration.scope
                )));
            }
        }

        let worker = ServiceWorker::new(script_url);
        let worker_id = worker.id;
        self.handlers.write().await.insert(worker_id, handlers.clone());

        {
            let mut registration = self.registration.write().await;
            if let Some(replaced) = registration.begin_install(worker) {
                self.retire(&replaced).await;
            }
            if let Some(installing) = registration.installing.as_ref() {
                self.emit_state(installing);
            }
        }

        // The event lasts until the handler's future settles.
        let install = handlers.on_install(InstallEvent).await;
        info!(
            worker = worker_id.raw(),
            precached = install.precached,
            failed = install.precache_error.is_some(),
            "Install finished"
        );

        let can_activate = {
            let mut registration = self.registration.write().await;
            match registration.install_complete(worker_id, install.skip_waiting) {
                Ok(replaced) => {
                    if let Some(replaced) = replaced {
                        self.retire(&replaced).await;
                    }
                    if let Some(waiting) = registration.waiting.as_ref() {
                        self.emit_state(waiting);
                    }
                    registration.can_activate(worker_id)
                }
                Err(e) => {
                    debug!(worker = worker_id.raw(), error = %e, "Superseded during install");
                    false
                }
            }
        };

        let activate = if can_activate {
            self.activate(worker_id).await?
        } else {
            debug!(worker = worker_id.raw(), "Installed, not activating yet");
            None
        };

        Ok(RegistrationReport {
            worker_id,
            install,
            activate,
        })
    }

    /// Activate the waiting version, if any.
    pub async fn activate_waiting(&self) -> Result<Option<ActivateOutcome>, ServiceWorkerError> {
        let waiting = self.registration.read().await.waiting.as_ref().map(|w| w.id);
        match waiting {
            Some(worker_id) => self.activate(worker_id).await,
            None => Ok(None),
        }
    }

    /// Run version `worker_id` from waiting through activate. Returns `None`
    /// if it stopped being the waiting version before activation began.
    async fn activate(
        &self,
        worker_id: ServiceWorkerId,
    ) -> Result<Option<ActivateOutcome>, ServiceWorkerError> {
        let superseded = {
            let mut registration = self.registration.write().await;
            let superseded = match registration.begin_activate(worker_id) {
                Ok(superseded) => superseded,
                Err(e) => {
                    debug!(worker = worker_id.raw(), error = %e, "Activation skipped");
                    return Ok(None);
                }
            };
            if let Some(active) = registration.active.as_ref() {
                self.emit_state(active);
            }
            superseded
        };
        if let Some(old) = superseded {
            self.retire(&old).await;
        }

        let handlers = self
            .handlers_for(worker_id)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("handlers for {worker_id:?}")))?;
        let outcome = handlers.on_activate(ActivateEvent).await;

        let (completed, scope) = {
            let mut registration = self.registration.write().await;
            let completed = registration.activation_complete(worker_id);
            if completed {
                if let Some(active) = registration.active.as_ref() {
                    self.emit_state(active);
                }
            }
            (completed, registration.scope.clone())
        };
        if !completed {
            debug!(worker = worker_id.raw(), "Superseded during activate");
            return Ok(Some(outcome));
        }
        info!(worker = worker_id.raw(), deleted = ?outcome.deleted, "Activated");

        if outcome.claim_clients {
            let changed = self.clients.write().await.claim(worker_id, &scope);
            for client_id in changed {
                self.emit(ServiceWorkerEvent::ControllerChange {
                    client_id,
                    worker_id,
                });
            }
        }

        Ok(Some(outcome))
    }

    /// Drop a superseded version's handlers.
    async fn retire(&self, worker: &ServiceWorker) {
        self.handlers.write().await.remove(&worker.id);
        self.emit_state(worker);
    }

    /// Snapshot of the active worker.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.get_active().cloned()
    }

    /// Snapshot of the waiting worker.
    pub async fn waiting_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    /// Open a page. It is controlled by the active worker if there is one.
    pub async fn open_client(&self, url: Url) -> Client {
        let controller = self.active_worker().await.map(|w| w.id);
        self.clients.write().await.open(url, controller)
    }

    /// Close a page.
    pub async fn close_client(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Look up a page.
    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Resolve a request issued by `client_id`.
    ///
    /// Navigations are matched to the active worker by scope. Other requests
    /// go through the worker only if their client is controlled by it. While
    /// a new version is still activating no version is active, so requests
    /// reach the network directly. Requests the worker declines also go to
    /// the network.
    pub async fn fetch(
        &self,
        client_id: Option<&str>,
        request: Request,
    ) -> Result<FetchResolution, ServiceWorkerError> {
        let controller = match self.active_worker().await {
            Some(active) => {
                let controls = if request.is_navigation() {
                    self.registration.read().await.in_scope(&request.url)
                } else {
                    match client_id {
                        Some(id) => self.clients.read().await.is_controlled_by(id, active.id),
                        None => false,
                    }
                };
                controls.then_some(active.id)
            }
            None => None,
        };

        if let Some(worker_id) = controller {
            if let Some(handlers) = self.handlers_for(worker_id).await {
                let event = FetchEvent {
                    request: request.clone(),
                    client_id: client_id.map(str::to_string),
                };
                if let Some(resolution) = handlers.on_fetch(event).await {
                    return Ok(resolution);
                }
            }
        }

        debug!(url = %request.url, "No worker response, fetching directly");
        let response = self.network.fetch(request).await?;
        Ok(FetchResolution::new(Some(response), FetchSource::Network))
    }

    /// Deliver a background sync tag to the active worker.
    pub async fn sync(&self, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        let handlers = self.active_handlers().await?;
        Ok(handlers.on_sync(SyncEvent::new(tag)).await)
    }

    /// Deliver a push message to the active worker.
    pub async fn push(&self, event: PushEvent) -> Result<Option<PushOutcome>, ServiceWorkerError> {
        let handlers = self.active_handlers().await?;
        let outcome = handlers.on_push(event).await;
        if let Some(shown) = outcome.as_ref().filter(|o| o.shown) {
            self.emit(ServiceWorkerEvent::NotificationShown {
                title: shown.title.clone(),
            });
        }
        Ok(outcome)
    }

    async fn active_handlers(&self) -> Result<Arc<dyn WorkerHandlers>, ServiceWorkerError> {
        let active = self
            .active_worker()
            .await
            .ok_or_else(|| ServiceWorkerError::State("no active worker".into()))?;
        self.handlers_for(active.id)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("handlers for {:?}", active.id)))
    }

    /// Unregister every version and release all clients.
    pub async fn unregister(&self) {
        let active = self.active_worker().await.map(|w| w.id);
        self.registration.write().await.unregister();
        self.handlers.write().await.clear();
        if let Some(id) = active {
            self.clients.write().await.release(id);
        }
        info!("Service worker unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Response;
    use crate::testing::FakeNetwork;
    use http::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Handlers that never respond to fetches and may decline skip-waiting.
    struct Passive {
        skip_waiting: bool,
    }

    #[async_trait::async_trait]
    impl WorkerHandlers for Passive {
        async fn on_install(&self, _event: InstallEvent) -> InstallOutcome {
            InstallOutcome {
                skip_waiting: self.skip_waiting,
                ..Default::default()
            }
        }
    }

    /// Handlers that answer every fetch themselves.
    struct Answering;

    #[async_trait::async_trait]
    impl WorkerHandlers for Answering {
        async fn on_install(&self, _event: InstallEvent) -> InstallOutcome {
            InstallOutcome {
                skip_waiting: true,
                ..Default::default()
            }
        }

        async fn on_fetch(&self, _event: FetchEvent) -> Option<FetchResolution> {
            let response = Response::new(StatusCode::OK, "worker");
            Some(FetchResolution::new(Some(response), FetchSource::Cache))
        }
    }

    /// Handlers whose install blocks until `release` is notified.
    #[derive(Default)]
    struct Gated {
        started: Notify,
        release: Notify,
        installed: AtomicBool,
        activated: AtomicBool,
        activated_early: AtomicBool,
    }

    #[async_trait::async_trait]
    impl WorkerHandlers for Gated {
        async fn on_install(&self, _event: InstallEvent) -> InstallOutcome {
            self.started.notify_one();
            self.release.notified().await;
            self.installed.store(true, Ordering::SeqCst);
            InstallOutcome {
                skip_waiting: true,
                ..Default::default()
            }
        }

        async fn on_activate(&self, _event: ActivateEvent) -> ActivateOutcome {
            if !self.installed.load(Ordering::SeqCst) {
                self.activated_early.store(true, Ordering::SeqCst);
            }
            self.activated.store(true, Ordering::SeqCst);
            ActivateOutcome::default()
        }
    }

    fn url(path: &str) -> Url {
        Url::parse("https://practice.example/").unwrap().join(path).unwrap()
    }

    fn runtime() -> (ServiceWorkerRuntime, Arc<FakeNetwork>, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let network = Arc::new(FakeNetwork::new());
        let (runtime, rx) = ServiceWorkerRuntime::new(url("/"), network.clone());
        (runtime, network, rx)
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let (runtime, _network, mut rx) = runtime();
        let report = runtime
            .register(url("/static/sw.js"), Arc::new(Passive { skip_waiting: false }))
            .await
            .unwrap();

        assert!(report.activate.is_some());
        let active = runtime.active_worker().await.unwrap();
        assert_eq!(active.id, report.worker_id);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_update_without_skip_waits() {
        let (runtime, _network, _rx) = runtime();
        let first = runtime
            .register(url("/static/sw.js"), Arc::new(Passive { skip_waiting: false }))
            .await
            .unwrap();
        let second = runtime
            .register(url("/static/sw.js"), Arc::new(Passive { skip_waiting: false }))
            .await
            .unwrap();

        assert!(second.activate.is_none());
        assert_eq!(runtime.active_worker().await.unwrap().id, first.worker_id);
        assert_eq!(runtime.waiting_worker().await.unwrap().id, second.worker_id);

        runtime.activate_waiting().await.unwrap().unwrap();
        assert_eq!(runtime.active_worker().await.unwrap().id, second.worker_id);
    }

    #[tokio::test]
    async fn test_overlapping_registrations() {
        let (runtime, _network, _rx) = runtime();
        let runtime = Arc::new(runtime);
        let first = Arc::new(Gated::default());
        let second = Arc::new(Gated::default());

        let spawn_register = |gated: &Arc<Gated>| {
            let runtime = runtime.clone();
            let handlers: Arc<dyn WorkerHandlers> = gated.clone();
            tokio::spawn(async move { runtime.register(url("/static/sw.js"), handlers).await })
        };

        let first_task = spawn_register(&first);
        first.started.notified().await;
        let second_task = spawn_register(&second);
        second.started.notified().await;

        // The older install settles first but was replaced while it ran.
        first.release.notify_one();
        let first_report = first_task.await.unwrap().unwrap();
        assert!(first_report.activate.is_none());
        assert!(!first.activated.load(Ordering::SeqCst));
        assert!(!second.activated.load(Ordering::SeqCst));
        assert!(runtime.active_worker().await.is_none());
        assert!(runtime.waiting_worker().await.is_none());

        second.release.notify_one();
        let second_report = second_task.await.unwrap().unwrap();
        assert!(second_report.activate.is_some());
        assert!(second.activated.load(Ordering::SeqCst));
        assert!(!second.activated_early.load(Ordering::SeqCst));
        assert_eq!(
            runtime.active_worker().await.unwrap().id,
            second_report.worker_id
        );
    }

    #[tokio::test]
    async fn test_rejects_cross_origin_script() {
        let (runtime, _network, _rx) = runtime();
        let result = runtime
            .register(
                Url::parse("https://cdn.example/sw.js").unwrap(),
                Arc::new(Passive { skip_waiting: true }),
            )
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::Security(_))));
    }

    #[tokio::test]
    async fn test_declined_fetch_goes_to_network() {
        let (runtime, network, _rx) = runtime();
        network.respond(url("/"), Response::new(StatusCode::OK, "home"));
        runtime
            .register(url("/static/sw.js"), Arc::new(Passive { skip_waiting: true }))
            .await
            .unwrap();

        let resolution = runtime.fetch(None, Request::navigate(url("/"))).await.unwrap();
        assert_eq!(resolution.source, FetchSource::Network);
        assert_eq!(resolution.response.unwrap().text(), "home");
    }

    #[tokio::test]
    async fn test_subresource_needs_controlled_client() {
        let (runtime, network, _rx) = runtime();
        network.respond(url("/static/app.js"), Response::new(StatusCode::OK, "network"));
        runtime
            .register(url("/static/sw.js"), Arc::new(Answering))
            .await
            .unwrap();

        let orphan = runtime
            .fetch(None, Request::get(url("/static/app.js")))
            .await
            .unwrap();
        assert_eq!(orphan.source, FetchSource::Network);

        let page = runtime.open_client(url("/")).await;
        let controlled = runtime
            .fetch(Some(&page.id), Request::get(url("/static/app.js")))
            .await
            .unwrap();
        assert_eq!(controlled.response.unwrap().text(), "worker");

        let navigation = runtime
            .fetch(None, Request::navigate(url("/practice/writing")))
            .await
            .unwrap();
        assert_eq!(navigation.source, FetchSource::Cache);
    }

    #[tokio::test]
    async fn test_sync_requires_active_worker() {
        let (runtime, _network, _rx) = runtime();
        assert!(matches!(
            runtime.sync("sync-test-results").await,
            Err(ServiceWorkerError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_releases_clients() {
        let (runtime, _network, _rx) = runtime();
        runtime
            .register(url("/static/sw.js"), Arc::new(Passive { skip_waiting: true }))
            .await
            .unwrap();
        let client = runtime.open_client(url("/")).await;
        assert!(client.controller.is_some());

        runtime.unregister().await;
        assert!(runtime.active_worker().await.is_none());
        assert!(runtime.client(&client.id).await.unwrap().controller.is_none());
    }
}

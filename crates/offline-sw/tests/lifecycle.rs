//! End-to-end lifecycle scenarios driven through the runtime.

use http::StatusCode;
use offline_sw::testing::{FakeNetwork, RecordingNotifier};
use offline_sw::{
    CacheStorage, FetchSource, MemoryCacheStorage, OfflineWorker, PushEvent, Request, Response,
    ServiceWorkerEvent, ServiceWorkerRuntime, SyncOutcome, WorkerConfig,
};
use std::sync::Arc;
use url::Url;

const ORIGIN: &str = "https://practice.example/";
const CURRENT: &str = "celpip-practice-v1";

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

struct Site {
    runtime: ServiceWorkerRuntime,
    events: tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    caches: Arc<MemoryCacheStorage>,
    network: Arc<FakeNetwork>,
    notifier: Arc<RecordingNotifier>,
}

impl Site {
    fn new() -> Self {
        let caches = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(FakeNetwork::new());
        let notifier = Arc::new(RecordingNotifier::default());
        network.respond(url("/"), Response::new(StatusCode::OK, "<html>home</html>"));
        network.respond(
            url("/static/manifest.json"),
            Response::new(StatusCode::OK, r#"{"name":"CELPIP Practice"}"#),
        );
        let (runtime, events) = ServiceWorkerRuntime::new(url("/"), network.clone());
        Self {
            runtime,
            events,
            caches,
            network,
            notifier,
        }
    }

    fn worker(&self, config: WorkerConfig) -> Arc<OfflineWorker> {
        Arc::new(
            OfflineWorker::new(
                config,
                self.caches.clone(),
                self.network.clone(),
                self.notifier.clone(),
            )
            .unwrap(),
        )
    }

    async fn install_default(&self) {
        let config = WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap());
        let report = self
            .runtime
            .register(url("/static/sw.js"), self.worker(config))
            .await
            .unwrap();
        assert!(report.install.precache_error.is_none());
        assert!(report.activate.is_some());
    }
}

#[tokio::test]
async fn precached_root_is_served_without_network() {
    let site = Site::new();
    site.install_default().await;
    let calls_after_install = site.network.calls();
    assert_eq!(calls_after_install, 2);

    let resolution = site
        .runtime
        .fetch(None, Request::navigate(url("/")))
        .await
        .unwrap();
    assert_eq!(resolution.source, FetchSource::Cache);
    assert_eq!(resolution.response.unwrap().text(), "<html>home</html>");
    assert_eq!(site.network.calls(), calls_after_install);
}

#[tokio::test]
async fn server_error_is_passed_through_uncached() {
    let site = Site::new();
    site.install_default().await;
    site.network.respond(
        url("/api/data"),
        Response::new(StatusCode::INTERNAL_SERVER_ERROR, "error"),
    );

    let page = site.runtime.open_client(url("/practice/reading")).await;
    let resolution = site
        .runtime
        .fetch(Some(&page.id), Request::get(url("/api/data")))
        .await
        .unwrap();
    assert_eq!(
        resolution.response.unwrap().status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(site
        .caches
        .match_in(CURRENT, &Request::get(url("/api/data")).key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn activate_removes_previous_version_bucket() {
    let site = Site::new();
    site.caches.open("celpip-practice-v0").await.unwrap();
    site.caches
        .put(
            "celpip-practice-v0",
            Request::get(url("/")).key(),
            Response::new(StatusCode::OK, "old home"),
        )
        .await
        .unwrap();

    site.install_default().await;

    assert_eq!(site.caches.keys().await.unwrap(), vec![CURRENT]);
}

#[tokio::test]
async fn new_version_takes_over_open_pages() {
    let mut site = Site::new();
    site.install_default().await;
    let page = site.runtime.open_client(url("/practice/reading")).await;
    let v1 = page.controller.unwrap();

    let config = WorkerConfig {
        cache_name: "celpip-practice-v2".to_string(),
        ..WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap())
    };
    let report = site
        .runtime
        .register(url("/static/sw.js"), site.worker(config))
        .await
        .unwrap();

    // skip-waiting plus claim: no reload needed.
    let client = site.runtime.client(&page.id).await.unwrap();
    assert_eq!(client.controller, Some(report.worker_id));
    assert_ne!(client.controller, Some(v1));
    assert_eq!(
        report.activate.unwrap().deleted,
        vec!["celpip-practice-v1".to_string()]
    );
    assert_eq!(site.caches.keys().await.unwrap(), vec!["celpip-practice-v2"]);

    let mut controller_changes = 0;
    while let Ok(event) = site.events.try_recv() {
        if matches!(event, ServiceWorkerEvent::ControllerChange { .. }) {
            controller_changes += 1;
        }
    }
    assert_eq!(controller_changes, 1);
}

#[tokio::test]
async fn offline_navigation_gets_offline_page() {
    let site = Site::new();
    site.network
        .respond(url("/offline.html"), Response::new(StatusCode::OK, "offline"));
    let config = WorkerConfig {
        precache: vec![
            "/".to_string(),
            "/static/manifest.json".to_string(),
            "/offline.html".to_string(),
        ],
        ..WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap())
    };
    site.runtime
        .register(url("/static/sw.js"), site.worker(config))
        .await
        .unwrap();

    site.network.set_offline(true);
    let page = site.runtime.open_client(url("/")).await;
    let resolution = site
        .runtime
        .fetch(Some(&page.id), Request::navigate(url("/practice/speaking")))
        .await
        .unwrap();
    assert_eq!(resolution.source, FetchSource::OfflineFallback);
    assert_eq!(resolution.response.unwrap().text(), "offline");
}

#[tokio::test]
async fn failed_precache_still_activates() {
    let site = Site::new();
    site.network.set_offline(true);
    let config = WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap());
    let report = site
        .runtime
        .register(url("/static/sw.js"), site.worker(config))
        .await
        .unwrap();

    assert!(report.install.precache_error.is_some());
    assert!(site.runtime.active_worker().await.is_some());
    assert!(site.caches.entries(CURRENT).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_and_push_reach_the_active_worker() {
    let mut site = Site::new();
    site.install_default().await;

    assert_eq!(
        site.runtime.sync("sync-test-results").await.unwrap(),
        SyncOutcome::Synced
    );
    assert_eq!(
        site.runtime.sync("unrelated").await.unwrap(),
        SyncOutcome::Ignored
    );

    let outcome = site
        .runtime
        .push(PushEvent::with_text("Mock test scheduled"))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.shown);
    assert_eq!(site.notifier.shown()[0].0, "CELPIP Practice");

    let mut shown = Vec::new();
    while let Ok(event) = site.events.try_recv() {
        if let ServiceWorkerEvent::NotificationShown { title } = event {
            shown.push(title);
        }
    }
    assert_eq!(shown, vec!["CELPIP Practice".to_string()]);
}

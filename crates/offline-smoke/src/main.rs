//! Offline Smoke Harness
//!
//! Registers the offline worker against a live origin, runs install and
//! activate, resolves a list of paths through it and prints what happened.
//! With `--state` the cache buckets persist between runs, so a second run
//! with the server stopped exercises the cache and offline fallback paths.

use anyhow::{bail, Context, Result};
use offline_common::{init_logging, LogConfig, LogFormat};
use offline_net::{HttpFetcher, LoaderConfig};
use offline_sw::{
    CacheStorage, LogNotifier, MemoryCacheStorage, OfflineWorker, PushEvent, Request,
    ServiceWorkerRuntime, WorkerConfig,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// Duration samples per operation.
#[derive(Default)]
struct PerfTiming {
    timings: BTreeMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            let avg_ms = total_ms / durations.len() as f64;
            summary.insert(
                op.to_string(),
                json!({
                    "count": durations.len(),
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                    "avg_ms": (avg_ms * 100.0).round() / 100.0,
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
#[derive(Debug, Default)]
struct Args {
    origin: Option<String>,
    config: Option<String>,
    state: Option<String>,
    fetch: Vec<String>,
    push: Option<String>,
    sync: Option<String>,
    log_format: LogFormat,
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => parsed.origin = args.next(),
                "--config" => parsed.config = args.next(),
                "--state" => parsed.state = args.next(),
                "--fetch" => {
                    if let Some(path) = args.next() {
                        parsed.fetch.push(path);
                    }
                }
                "--push" => parsed.push = args.next(),
                "--sync" => parsed.sync = args.next(),
                "--log-format" => {
                    let name = args.next().unwrap_or_default();
                    parsed.log_format = LogFormat::parse(&name)
                        .with_context(|| format!("unknown log format {name:?}"))?;
                }
                "-v" | "--verbose" => parsed.verbose = true,
                other => bail!("unknown argument {other:?}"),
            }
        }

        if parsed.origin.is_none() && parsed.config.is_none() {
            bail!("usage: offline-smoke --origin <url> [--config <file>] [--state <file>] [--fetch <path>]... [--push <text>] [--sync <tag>]");
        }
        if parsed.fetch.is_empty() {
            parsed.fetch.push("/".to_string());
        }
        Ok(parsed)
    }

    fn worker_config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {path}"))?;
                WorkerConfig::from_json(&json)?
            }
            None => WorkerConfig::default(),
        };
        if let Some(origin) = &self.origin {
            config.origin = Url::parse(origin).with_context(|| format!("parsing origin {origin}"))?;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_caches(&self) -> Result<MemoryCacheStorage> {
        match &self.state {
            Some(path) if std::path::Path::new(path).exists() => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading cache state {path}"))?;
                Ok(MemoryCacheStorage::from_json(&json)?)
            }
            _ => Ok(MemoryCacheStorage::new()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config.with_format(args.log_format))?;

    let config = args.worker_config()?;
    info!(
        origin = %config.origin,
        cache = %config.cache_name,
        fetches = args.fetch.len(),
        "Starting offline smoke harness"
    );

    let mut perf = PerfTiming::default();
    let caches = Arc::new(args.load_caches()?);
    let fetcher = Arc::new(HttpFetcher::new(config.origin.clone(), LoaderConfig::default())?);
    let (runtime, _events) = ServiceWorkerRuntime::new(config.origin.clone(), fetcher.clone());

    let script_url = config.resolve("/static/sw.js")?;
    let worker = Arc::new(OfflineWorker::new(
        config.clone(),
        caches.clone(),
        fetcher,
        Arc::new(LogNotifier),
    )?);

    let started = Instant::now();
    let report = runtime.register(script_url, worker).await?;
    perf.record("register", started.elapsed());

    let mut fetches = Vec::new();
    for path in &args.fetch {
        let url = config.resolve(path)?;
        let started = Instant::now();
        match runtime.fetch(None, Request::navigate(url)).await {
            Ok(mut resolution) => {
                perf.record("fetch", started.elapsed());
                if let Some(write) = resolution.cache_write.take() {
                    if let Err(e) = write.await {
                        warn!(path = %path, error = %e, "Cache write task failed");
                    }
                }
                fetches.push(json!({
                    "path": path,
                    "source": resolution.source.as_str(),
                    "status": resolution.response.as_ref().map(|r| r.status.as_u16()),
                    "bytes": resolution.response.as_ref().map(|r| r.body.len()),
                }));
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Fetch failed");
                fetches.push(json!({ "path": path, "error": e.to_string() }));
            }
        }
    }

    let sync = match &args.sync {
        Some(tag) => Some(format!("{:?}", runtime.sync(tag).await?)),
        None => None,
    };
    let push = match &args.push {
        Some(text) => runtime
            .push(PushEvent::with_text(text.clone()))
            .await?
            .map(|outcome| outcome.shown),
        None => None,
    };

    let mut buckets = serde_json::Map::new();
    for name in caches.keys().await? {
        let keys: Vec<String> = caches
            .entries(&name)
            .await?
            .iter()
            .map(|k| k.to_string())
            .collect();
        buckets.insert(name, json!(keys));
    }

    if let Some(path) = &args.state {
        std::fs::write(path, caches.to_json().await?)
            .with_context(|| format!("writing cache state {path}"))?;
    }

    let summary = json!({
        "cache_name": config.cache_name,
        "install": {
            "precached": report.install.precached,
            "error": report.install.precache_error,
        },
        "deleted": report.activate.map(|a| a.deleted).unwrap_or_default(),
        "fetches": fetches,
        "sync": sync,
        "push_shown": push,
        "caches": buckets,
        "timing": perf.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

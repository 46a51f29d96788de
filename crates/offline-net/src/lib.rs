//! # Offline Net
//!
//! HTTP implementation of the worker's network collaborator.
//!
//! Responses are classified relative to the worker's origin: anything served
//! from that origin (after redirects) is `basic`, everything else `cors`.

use async_trait::async_trait;
use http::header::ACCEPT_LANGUAGE;
use offline_sw::{NetworkError, NetworkFetch, Request, Response, ResponseType};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors raised by the HTTP fetcher.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Client setup failed: {0}")]
    Setup(String),

    #[error("Could not reach {0}")]
    Unreachable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<NetError> for NetworkError {
    fn from(error: NetError) -> Self {
        match error {
            NetError::Unreachable(_) => NetworkError::Offline,
            other => NetworkError::Failed(other.to_string()),
        }
    }
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header, sent unless the request sets its own.
    pub accept_language: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("celpip-offline/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-CA,en;q=0.9".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Network collaborator backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
    origin: Url,
}

impl HttpFetcher {
    /// Create a fetcher for a worker served from `origin`.
    pub fn new(origin: Url, config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::Setup(e.to_string()))?;

        info!(origin = %origin, "HttpFetcher initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    /// Classify a response by the request URL and the final URL after redirects.
    fn response_type(&self, requested: &Url, final_url: &Url) -> ResponseType {
        let origin = self.origin.origin();
        if requested.origin() == origin && final_url.origin() == origin {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }

    async fn send(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.headers.contains_key(ACCEPT_LANGUAGE) {
            builder = builder.header(ACCEPT_LANGUAGE, &self.config.accept_language);
        }
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else if e.is_connect() {
                NetError::Unreachable(request.url.to_string())
            } else {
                NetError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let response_type = self.response_type(&request.url, &final_url);
        let body = response.bytes().await?;

        trace!(
            url = %final_url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(final_url),
            status,
            headers,
            body,
            response_type,
        })
    }
}

#[async_trait]
impl NetworkFetch for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        Ok(self.send(request).await?)
    }
}

//! Network fetch collaborator.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Request, Response};

/// Failure to obtain any response from the network.
///
/// HTTP error statuses are responses, not errors; this covers the cases where
/// there is nothing to hand back to the page.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Network request failed: {0}")]
    Failed(String),

    #[error("Network is offline")]
    Offline,
}

/// Issues requests on behalf of the worker.
#[async_trait]
pub trait NetworkFetch: Send + Sync {
    /// Fetch a request. The request is consumed; callers clone it beforehand
    /// if they still need it.
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError>;
}

//! Network-fetch collaborator boundary.
//!
//! Fetching is external; the pipeline and the worker only see this seam.
//! Every started fetch exposes an abort handle up front so the request
//! tracker can cancel it; aborting resolves the in-flight future with
//! [`TileError::Aborted`](crate::TileError::Aborted), which callers treat as
//! a silent no-result outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TileResult;

/// Per-source fetch options, carried in the service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug)]
pub struct FetchResponse {
    pub data: Vec<u8>,
    /// HTTP status when the transport has one.
    pub status: u16,
}

pub trait AbortHandle: Send + Sync {
    fn abort(&self);
}

pub type FetchFuture = Pin<Box<dyn Future<Output = TileResult<FetchResponse>> + Send>>;

/// One in-flight fetch: the cancellation handle and the pending result.
pub struct FetchJob {
    pub abort: Arc<dyn AbortHandle>,
    pub result: FetchFuture,
}

pub trait Fetch: Send + Sync {
    fn start(&self, url: &str, options: &FetchOptions) -> FetchJob;
}

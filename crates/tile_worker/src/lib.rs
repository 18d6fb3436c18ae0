//! Decode service around [`tile3d`]: request/abort tracking, fetch
//! orchestration, and channel-based hand-off of decoded tile content.
//!
//! The host submits [`TileRequest`]s and receives [`TileResponse`]s; each
//! tile decodes in its own task with a concurrency cap. Cancellation is
//! advisory: an aborted fetch short-circuits delivery, while CPU-bound
//! transform work runs to completion and is discarded.

mod config;
mod service;
mod tracker;

pub use config::{append_query, ServiceConfig, SourceOptions};
pub use service::{DecodeService, TileRequest, TileResponse, WorkerDeps};
pub use tracker::{RequestTracker, TrackedFetch};

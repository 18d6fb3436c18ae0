//! URL-keyed tracking of in-flight operations.

use std::sync::Arc;

use dashmap::DashMap;
use tile3d::{AbortHandle, Fetch, FetchJob, FetchOptions};

/// Maps a request URL to the abort handles of its in-flight operations.
///
/// A URL may carry more than one handle at a time (a tile request whose
/// payload spawns a sub-fetch, for instance). Aborting invokes every handle
/// and clears the entry; entries are removed as soon as the operation
/// settles, so a late abort is a no-op.
#[derive(Default)]
pub struct RequestTracker {
    inflight: DashMap<String, Vec<Arc<dyn AbortHandle>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: &str, handle: Arc<dyn AbortHandle>) {
        self.inflight.entry(url.to_string()).or_default().push(handle);
    }

    /// Drop one settled handle; the entry goes away with its last handle.
    pub fn unregister(&self, url: &str, handle: &Arc<dyn AbortHandle>) {
        let emptied = match self.inflight.get_mut(url) {
            Some(mut entry) => {
                entry.retain(|h| !Arc::ptr_eq(h, handle));
                entry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.inflight.remove_if(url, |_, handles| handles.is_empty());
        }
    }

    /// Cancel everything in flight for `url`. Returns how many handles were
    /// aborted; 0 means the URL had already settled.
    pub fn abort(&self, url: &str) -> usize {
        match self.inflight.remove(url) {
            Some((_, handles)) => {
                for handle in &handles {
                    handle.abort();
                }
                tracing::debug!(url, count = handles.len(), "aborted in-flight request");
                handles.len()
            }
            None => 0,
        }
    }

    /// Forget a settled URL outright.
    pub fn settle(&self, url: &str) {
        self.inflight.remove(url);
    }

    pub fn pending(&self, url: &str) -> usize {
        self.inflight.get(url).map_or(0, |entry| entry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

/// Fetch decorator that registers every started job with a tracker under a
/// fixed key (the originating tile URL), so one cancel call reaches the
/// main fetch and any sub-fetches alike.
pub struct TrackedFetch {
    inner: Arc<dyn Fetch>,
    tracker: Arc<RequestTracker>,
    key: String,
}

impl TrackedFetch {
    pub fn new(inner: Arc<dyn Fetch>, tracker: Arc<RequestTracker>, key: String) -> Self {
        Self { inner, tracker, key }
    }
}

impl Fetch for TrackedFetch {
    fn start(&self, url: &str, options: &FetchOptions) -> FetchJob {
        let job = self.inner.start(url, options);
        let handle = Arc::clone(&job.abort);
        self.tracker.register(&self.key, Arc::clone(&handle));

        let tracker = Arc::clone(&self.tracker);
        let key = self.key.clone();
        let inner_result = job.result;
        FetchJob {
            abort: job.abort,
            result: Box::pin(async move {
                let out = inner_result.await;
                tracker.unregister(&key, &handle);
                out
            }),
        }
    }
}

//! The decode service: a dedicated worker loop that fetches, decodes, and
//! hands finished tile content to the host over channels.
//!
//! Each tile decodes inside its own task; CPU-bound stages run to completion
//! once the data is in memory and are never interleaved with another tile's
//! processing in the same task. No ordering is guaranteed between tiles;
//! each result is delivered atomically (content and buffers together, or an
//! error/not-found signal, or, after an abort, nothing at all).

use std::collections::VecDeque;
use std::sync::Arc;

use glam::DMat4;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use tile3d::{
    decode_tile, Collaborators, DecodeParams, Fetch, ModelParser, ParseOptions, Projection,
    TileContent, TileError, TransferList, UpAxis,
};

use crate::config::{append_query, ServiceConfig, SourceOptions};
use crate::tracker::{RequestTracker, TrackedFetch};

/// Collaborators every decode task shares.
#[derive(Clone)]
pub struct WorkerDeps {
    pub parser: Arc<dyn ModelParser>,
    pub projection: Arc<dyn Projection>,
    pub fetcher: Arc<dyn Fetch>,
}

/// One tile request, immutable once submitted.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub url: String,
    /// Skip the fetch when the host already holds the bytes.
    pub raw_buffer: Option<Vec<u8>>,
    pub root_index: usize,
    pub up_axis: UpAxis,
    pub external_transform: Option<DMat4>,
}

impl TileRequest {
    pub fn new(url: impl Into<String>, root_index: usize) -> Self {
        Self {
            url: url.into(),
            raw_buffer: None,
            root_index,
            up_axis: UpAxis::default(),
            external_transform: None,
        }
    }
}

/// Outcome delivered to the host.
#[derive(Debug)]
pub enum TileResponse {
    Ready {
        url: String,
        content: TileContent,
        transfer: TransferList,
    },
    /// The tile does not exist (404, or decoded to nothing usable).
    NotFound { url: String },
    Failed { url: String, error: TileError },
}

impl TileResponse {
    pub fn url(&self) -> &str {
        match self {
            TileResponse::Ready { url, .. }
            | TileResponse::NotFound { url }
            | TileResponse::Failed { url, .. } => url,
        }
    }
}

/// Handle to a running decode worker.
///
/// Dropping the handle shuts the worker down and cancels outstanding work.
pub struct DecodeService {
    request_tx: mpsc::UnboundedSender<TileRequest>,
    tracker: Arc<RequestTracker>,
    shutdown_tx: watch::Sender<()>,
}

impl DecodeService {
    /// Spawn the worker loop on the current tokio runtime. Results arrive on
    /// the returned receiver.
    pub fn spawn(
        deps: WorkerDeps,
        config: ServiceConfig,
    ) -> (DecodeService, mpsc::UnboundedReceiver<TileResponse>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let tracker = Arc::new(RequestTracker::new());

        tokio::spawn(worker_loop(
            deps,
            config,
            Arc::clone(&tracker),
            request_rx,
            result_tx,
            shutdown_rx,
        ));

        (DecodeService { request_tx, tracker, shutdown_tx }, result_rx)
    }

    /// Queue a tile for decoding. Returns false when the worker is gone.
    pub fn submit(&self, request: TileRequest) -> bool {
        self.request_tx.send(request).is_ok()
    }

    /// Best-effort cancellation: abort every in-flight operation tracked
    /// under `url`. CPU-bound decode stages already past the fetch run to
    /// completion; their result is discarded. Returns the number of aborted
    /// handles (0 when the request had already settled).
    pub fn cancel(&self, url: &str) -> usize {
        self.tracker.abort(url)
    }

    /// How many operations are currently in flight for `url`.
    pub fn pending(&self, url: &str) -> usize {
        self.tracker.pending(url)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn worker_loop(
    deps: WorkerDeps,
    config: ServiceConfig,
    tracker: Arc<RequestTracker>,
    mut request_rx: mpsc::UnboundedReceiver<TileRequest>,
    result_tx: mpsc::UnboundedSender<TileResponse>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut active: JoinSet<Option<TileResponse>> = JoinSet::new();
    let mut backlog: VecDeque<TileRequest> = VecDeque::new();
    let mut requests_open = true;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("decode service shutting down");
                active.abort_all();
                return;
            }
            maybe_request = request_rx.recv(), if requests_open => {
                match maybe_request {
                    Some(request) => backlog.push_back(request),
                    None => requests_open = false,
                }
            }
            Some(joined) = active.join_next(), if !active.is_empty() => {
                match joined {
                    Ok(Some(response)) => {
                        let _ = result_tx.send(response);
                    }
                    Ok(None) => {
                        // Aborted: a silent no-result outcome.
                    }
                    Err(e) => error!("decode task panicked: {e}"),
                }
            }
        }

        if !requests_open && backlog.is_empty() && active.is_empty() {
            return;
        }

        while active.len() < config.max_concurrent.max(1) {
            let Some(request) = backlog.pop_front() else { break };
            let deps = deps.clone();
            let source = config.source(request.root_index);
            let tracker = Arc::clone(&tracker);
            active.spawn(async move { decode_one(request, deps, source, tracker).await });
        }
    }
}

/// Fetch (unless raw bytes were supplied) and decode one tile. Returns
/// `None` when the request was aborted.
async fn decode_one(
    request: TileRequest,
    deps: WorkerDeps,
    source: SourceOptions,
    tracker: Arc<RequestTracker>,
) -> Option<TileResponse> {
    let url = request.url.clone();
    debug!(url = %url, root_index = request.root_index, "decoding tile");

    let tracked = TrackedFetch::new(Arc::clone(&deps.fetcher), Arc::clone(&tracker), url.clone());

    let buffer = match request.raw_buffer {
        Some(buffer) => buffer,
        None => {
            let fetch_url = append_query(&url, &source.url_params);
            let job = tracked.start(&fetch_url, &source.fetch);
            match job.result.await {
                Ok(response) if (200..300).contains(&response.status) => response.data,
                Ok(response) => {
                    tracker.settle(&url);
                    let error = TileError::Network {
                        status: Some(response.status),
                        message: format!("fetching {fetch_url}"),
                    };
                    return Some(classify(url, error));
                }
                Err(TileError::Aborted) => {
                    tracker.settle(&url);
                    return None;
                }
                Err(error) => {
                    tracker.settle(&url);
                    return Some(classify(url, error));
                }
            }
        }
    };

    let params = DecodeParams {
        root_index: request.root_index,
        up_axis: request.up_axis,
        external_transform: request.external_transform,
        parse_options: ParseOptions { max_texture_size: source.max_texture_size },
        fetch_options: source.fetch.clone(),
    };
    let collab = Collaborators {
        parser: deps.parser.as_ref(),
        projection: deps.projection.as_ref(),
        fetcher: Some(&tracked),
    };
    let outcome = decode_tile(&buffer, &params, &collab).await;
    tracker.settle(&url);

    match outcome {
        Ok((content, transfer)) => Some(TileResponse::Ready { url, content, transfer }),
        Err(TileError::Aborted) => None,
        Err(error) => Some(classify(url, error)),
    }
}

fn classify(url: String, error: TileError) -> TileResponse {
    if error.is_not_found() {
        debug!(url = %url, "tile not found");
        TileResponse::NotFound { url }
    } else {
        tracing::warn!(url = %url, error = %error, "tile decode failed");
        TileResponse::Failed { url, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tile3d::{
        AbortHandle, ContentKind, FetchJob, FetchOptions, FetchResponse, ParseOptions, ParsedModel,
        TileResult, WebMercator,
    };
    use tokio::sync::Notify;
    use tokio::time::{sleep, Duration};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    struct NoModelParser;

    #[async_trait::async_trait]
    impl ModelParser for NoModelParser {
        async fn parse(
            &self,
            _buffer: &[u8],
            _byte_offset: usize,
            _options: &ParseOptions,
        ) -> TileResult<ParsedModel> {
            Err(TileError::Parse("no model parser configured".into()))
        }
    }

    struct NoopAbort;
    impl AbortHandle for NoopAbort {
        fn abort(&self) {}
    }

    /// Serves canned responses keyed by URL; unknown URLs get a 404.
    #[derive(Default)]
    struct MapFetch {
        tiles: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapFetch {
        fn with(tiles: &[(&str, Vec<u8>)]) -> Self {
            let map = tiles.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            Self { tiles: Mutex::new(map) }
        }
    }

    impl Fetch for MapFetch {
        fn start(&self, url: &str, _options: &FetchOptions) -> FetchJob {
            let found = self.tiles.lock().unwrap().get(url).cloned();
            FetchJob {
                abort: Arc::new(NoopAbort),
                result: Box::pin(async move {
                    match found {
                        Some(data) => Ok(FetchResponse { data, status: 200 }),
                        None => Ok(FetchResponse { data: Vec::new(), status: 404 }),
                    }
                }),
            }
        }
    }

    /// Never completes until aborted; abort resolves the future with the
    /// aborted outcome.
    struct HangingFetch;

    struct NotifyAbort(Arc<Notify>);
    impl AbortHandle for NotifyAbort {
        fn abort(&self) {
            self.0.notify_one();
        }
    }

    impl Fetch for HangingFetch {
        fn start(&self, _url: &str, _options: &FetchOptions) -> FetchJob {
            let notify = Arc::new(Notify::new());
            FetchJob {
                abort: Arc::new(NotifyAbort(Arc::clone(&notify))),
                result: Box::pin(async move {
                    notify.notified().await;
                    Err(TileError::Aborted)
                }),
            }
        }
    }

    fn deps(fetcher: Arc<dyn Fetch>) -> WorkerDeps {
        WorkerDeps {
            parser: Arc::new(NoModelParser),
            projection: Arc::new(WebMercator),
            fetcher,
        }
    }

    fn pnts_tile(positions: &[[f32; 3]]) -> Vec<u8> {
        let json = format!(
            r#"{{"POINTS_LENGTH":{},"POSITION":{{"byteOffset":0}}}}"#,
            positions.len()
        );
        let json = json.into_bytes();
        let mut body = Vec::new();
        for p in positions {
            for c in p {
                body.extend_from_slice(&c.to_le_bytes());
            }
        }
        let total = 28 + json.len() + body.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"pnts");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&body);
        out
    }

    #[tokio::test]
    async fn decodes_fetched_point_tile() {
        init_tracing();
        let tile = pnts_tile(&[[1.0, 2.0, 3.0], [3.0, 4.0, 5.0]]);
        let fetcher = Arc::new(MapFetch::with(&[("http://tiles/a.pnts?token=k", tile)]));
        let mut config = ServiceConfig::default();
        config.sources.insert(
            0,
            SourceOptions {
                url_params: vec![("token".to_string(), "k".to_string())],
                ..Default::default()
            },
        );
        let (service, mut results) = DecodeService::spawn(deps(fetcher), config);

        assert!(service.submit(TileRequest::new("http://tiles/a.pnts", 0)));
        let response = results.recv().await.expect("one response");
        match response {
            TileResponse::Ready { url, content, transfer } => {
                assert_eq!(url, "http://tiles/a.pnts");
                assert!(matches!(content.kind, ContentKind::PointCloud(_)));
                assert_eq!(transfer.len(), 1);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(service.pending("http://tiles/a.pnts"), 0);
    }

    #[tokio::test]
    async fn missing_tile_is_not_found() {
        init_tracing();
        let fetcher = Arc::new(MapFetch::default());
        let (service, mut results) = DecodeService::spawn(deps(fetcher), ServiceConfig::default());

        service.submit(TileRequest::new("http://tiles/missing.b3dm", 0));
        match results.recv().await.expect("one response") {
            TileResponse::NotFound { url } => assert_eq!(url, "http://tiles/missing.b3dm"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn raw_buffer_skips_the_fetch() {
        init_tracing();
        let fetcher = Arc::new(MapFetch::default());
        let (service, mut results) = DecodeService::spawn(deps(fetcher), ServiceConfig::default());

        let mut request = TileRequest::new("mem://t.pnts", 2);
        request.raw_buffer = Some(pnts_tile(&[[0.0, 0.0, 0.0]]));
        service.submit(request);

        match results.recv().await.expect("one response") {
            TileResponse::Ready { content, .. } => assert_eq!(content.root_index, 2),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborted_request_delivers_nothing() {
        init_tracing();
        let (service, mut results) =
            DecodeService::spawn(deps(Arc::new(HangingFetch)), ServiceConfig::default());

        service.submit(TileRequest::new("http://tiles/slow.pnts", 0));
        // Wait for the fetch to be tracked before cancelling it.
        for _ in 0..200 {
            if service.pending("http://tiles/slow.pnts") > 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(service.cancel("http://tiles/slow.pnts"), 1);
        // A second cancel is a no-op: the entry is gone.
        assert_eq!(service.cancel("http://tiles/slow.pnts"), 0);

        // The aborted tile never surfaces; a later good tile does.
        let mut request = TileRequest::new("mem://ok.pnts", 0);
        request.raw_buffer = Some(pnts_tile(&[[9.0, 9.0, 9.0]]));
        service.submit(request);

        let response = results.recv().await.expect("only the good tile responds");
        assert_eq!(response.url(), "mem://ok.pnts");
    }
}

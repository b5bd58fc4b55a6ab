#![allow(dead_code)]

use async_trait::async_trait;
use folio::app::config::DownloadConfig;
use folio::cache::CacheStore;
use folio::download::{
    DownloadOrchestrator, GalleryStatus, NotificationBridge, PageRequest, ProgressFn, Transport,
    TransportError,
};
use folio::gallery::resolver::{GalleryResolver, ResolveError};
use folio::gallery::{GalleryId, GalleryInfo};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type PageKey = (GalleryId, usize);
type AttemptHook = Box<dyn Fn(u32) + Send + Sync>;

// Initialize logging once for all tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn gallery(id: u32) -> GalleryId {
    GalleryId::new(id).unwrap()
}

/// Gallery info with `pages` PNG pages
pub fn gallery_info(id: u32, pages: usize) -> GalleryInfo {
    let urls = (0..pages)
        .map(|index| format!("https://img.test/{}/{}.png", id, index))
        .collect();
    GalleryInfo::new(gallery(id), format!("Gallery {}", id), urls)
}

/// Deterministic body served for a page
pub fn page_bytes(id: GalleryId, index: usize) -> Vec<u8> {
    format!("gallery {} page {}", id, index).into_bytes()
}

/// Download settings with a short restart delay
pub fn fast_config() -> DownloadConfig {
    DownloadConfig {
        retry_attempts: 5,
        max_restarts: 8,
        restart_delay_ms: 10,
    }
}

/// Resolver answering from a fixed table; unknown ids are NotFound
#[derive(Default)]
pub struct FakeResolver {
    galleries: Mutex<HashMap<GalleryId, GalleryInfo>>,
    transient_failures: Mutex<HashMap<GalleryId, u32>>,
    calls: Mutex<HashMap<GalleryId, u32>>,
}

impl FakeResolver {
    pub fn new(galleries: Vec<GalleryInfo>) -> Self {
        let resolver = Self::default();
        {
            let mut table = resolver.galleries.lock().unwrap();
            for info in galleries {
                table.insert(info.id, info);
            }
        }
        resolver
    }

    /// Fail the first `count` resolves of `id` with a transient error
    pub fn fail_transiently(&self, id: GalleryId, count: u32) {
        self.transient_failures.lock().unwrap().insert(id, count);
    }

    pub fn calls(&self, id: GalleryId) -> u32 {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GalleryResolver for FakeResolver {
    async fn resolve(&self, id: GalleryId) -> Result<GalleryInfo, ResolveError> {
        *self.calls.lock().unwrap().entry(id).or_insert(0) += 1;

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ResolveError::Transient("metadata service unavailable".into()));
                }
            }
        }

        self.galleries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ResolveError::NotFound(id))
    }
}

/// Scriptable in-memory transport
///
/// Every request is counted per (gallery, index). Failures, delays and hooks
/// apply to the first attempts of a page.
#[derive(Default)]
pub struct FakeTransport {
    attempts: Mutex<HashMap<PageKey, u32>>,
    failures: Mutex<HashMap<PageKey, (u32, u16)>>,
    delays: Mutex<HashMap<PageKey, (Duration, u32)>>,
    hooks: Mutex<HashMap<PageKey, AttemptHook>>,
    sizes: Mutex<HashMap<PageKey, usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every request until the returned semaphore gets permits
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (transport, gate)
    }

    /// Answer the first `count` requests for the page with HTTP 500
    pub fn fail_first(&self, id: GalleryId, index: usize, count: u32) {
        self.fail_first_with(id, index, count, 500);
    }

    /// Answer the first `count` requests for the page with `status`
    pub fn fail_first_with(&self, id: GalleryId, index: usize, count: u32, status: u16) {
        self.failures.lock().unwrap().insert((id, index), (count, status));
    }

    /// Delay the first `count` requests for the page
    pub fn delay_first(&self, id: GalleryId, index: usize, delay: Duration, count: u32) {
        self.delays.lock().unwrap().insert((id, index), (delay, count));
    }

    /// Run `hook` with the attempt number whenever the page is requested
    pub fn on_attempt(&self, id: GalleryId, index: usize, hook: impl Fn(u32) + Send + Sync + 'static) {
        self.hooks.lock().unwrap().insert((id, index), Box::new(hook));
    }

    /// Serve `size` filler bytes for the page instead of [`page_bytes`]
    pub fn large_page(&self, id: GalleryId, index: usize, size: usize) {
        self.sizes.lock().unwrap().insert((id, index), size);
    }

    pub fn fetch_count(&self, id: GalleryId, index: usize) -> u32 {
        self.attempts.lock().unwrap().get(&(id, index)).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, request: &PageRequest, progress: &ProgressFn) -> Result<Vec<u8>, TransportError> {
        let key = (request.gallery, request.index);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.entry(key).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if let Some(hook) = self.hooks.lock().unwrap().get(&key) {
            hook(attempt);
        }

        if let Some(ref gate) = self.gate {
            let _permit = gate.acquire().await;
        }

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&key)
            .and_then(|&(delay, count)| (attempt <= count).then_some(delay));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failures.lock().unwrap().get(&key).copied();
        if let Some((count, status)) = failing {
            if attempt <= count {
                return Err(TransportError::status(status));
            }
        }

        let size = self.sizes.lock().unwrap().get(&key).copied();
        let body = match size {
            Some(size) => vec![0x5a; size],
            None => page_bytes(request.gallery, request.index),
        };
        let total = body.len() as u64;
        progress(total / 2, Some(total));
        progress(total, Some(total));
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Update {
        id: GalleryId,
        completed: usize,
        total: usize,
        is_complete: bool,
    },
    Cancel(GalleryId),
}

/// Bridge recording every call
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<Notification> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: GalleryId) -> Vec<Notification> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Notification::Update { id: call_id, .. } => *call_id == id,
                Notification::Cancel(call_id) => *call_id == id,
            })
            .collect()
    }
}

impl NotificationBridge for RecordingNotifier {
    fn update(&self, id: GalleryId, completed: usize, total: usize, is_complete: bool) {
        self.calls.lock().unwrap().push(Notification::Update {
            id,
            completed,
            total,
            is_complete,
        });
    }

    fn cancel(&self, id: GalleryId) {
        self.calls.lock().unwrap().push(Notification::Cancel(id));
    }
}

/// Orchestrator wired to fakes over a temporary cache root
pub struct Harness {
    pub dir: TempDir,
    pub cache: Arc<CacheStore>,
    pub resolver: Arc<FakeResolver>,
    pub transport: Arc<FakeTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: DownloadOrchestrator,
}

impl Harness {
    pub fn new(galleries: Vec<GalleryInfo>) -> Self {
        Self::with_transport(galleries, FakeTransport::new(), fast_config())
    }

    pub fn with_transport(galleries: Vec<GalleryInfo>, transport: FakeTransport, config: DownloadConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, galleries, transport, config)
    }

    /// Build over an existing cache root, e.g. to simulate a process restart
    pub fn in_dir(dir: TempDir, galleries: Vec<GalleryInfo>, transport: FakeTransport, config: DownloadConfig) -> Self {
        init_logging();

        let cache = Arc::new(CacheStore::new(dir.path().join("cache")));
        let resolver = Arc::new(FakeResolver::new(galleries));
        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::default());

        let orchestrator = DownloadOrchestrator::start(
            &config,
            cache.clone(),
            resolver.clone(),
            transport.clone(),
            notifier.clone(),
        );

        Self {
            dir,
            cache,
            resolver,
            transport,
            notifier,
            orchestrator,
        }
    }

    pub fn gallery_dir(&self, id: GalleryId) -> std::path::PathBuf {
        self.cache.gallery_dir(id)
    }

    /// Wait (bounded) until no download is running for the gallery
    pub async fn settle(&self, id: GalleryId) -> GalleryStatus {
        timeout(Duration::from_secs(10), self.orchestrator.wait(id))
            .await
            .expect("download did not settle in time")
    }

    /// Wait (bounded) until the gallery's status matches
    pub async fn wait_for_status(&self, id: GalleryId, f: impl FnMut(&GalleryStatus) -> bool) {
        let mut receiver = self.orchestrator.subscribe(id);
        timeout(Duration::from_secs(10), receiver.wait_for(f))
            .await
            .expect("status not reached in time")
            .unwrap();
    }

    /// (name, size) of every file in the gallery folder, sorted by name
    pub fn file_sizes(&self, id: GalleryId) -> Vec<(String, u64)> {
        let mut files: Vec<(String, u64)> = match std::fs::read_dir(self.gallery_dir(id)) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|entry| {
                    let size = entry.metadata().ok()?.len();
                    Some((entry.file_name().into_string().ok()?, size))
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    /// Names of the files in the gallery folder, sorted
    pub fn files(&self, id: GalleryId) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.gallery_dir(id)) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// Mock metadata and image server for one gallery
///
/// Serves `GET /galleries/{id}.json` and `GET /images/{id}/{index}.jpg`.
pub async fn setup_gallery_server(id: GalleryId, pages: usize) -> (MockServer, String) {
    let server = MockServer::start().await;
    let uri = server.uri();

    let page_entries: Vec<serde_json::Value> = (0..pages)
        .map(|index| serde_json::json!({ "url": format!("../images/{}/{}.jpg", id, index) }))
        .collect();

    Mock::given(method("GET"))
        .and(path(format!("/galleries/{}.json", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": format!("Gallery {}", id),
            "pages": page_entries,
        })))
        .mount(&server)
        .await;

    for index in 0..pages {
        Mock::given(method("GET"))
            .and(path(format!("/images/{}/{}.jpg", id, index)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(page_bytes(id, index)))
            .mount(&server)
            .await;
    }

    (server, format!("{}/galleries/", uri))
}

//! Download orchestrator
//!
//! Entry point for callers. Owns the registry of running downloads (one
//! supervisor per gallery), the generation table, the progress tracker and
//! per-gallery status watchers. Created by [`DownloadOrchestrator::start`] and
//! torn down by [`DownloadOrchestrator::shutdown`].
//!
//! Executor events are applied by a single pump task. Every state change made
//! on behalf of a generation happens inside [`Generations::with_current`], so
//! once `cancel` has retired a generation nothing it produced can reach the
//! tracker, the status watchers or the notification bridge.

use super::executor::{DownloadEvent, ExecutorSettings, FetchExecutor};
use super::generation::{Generations, Ticket};
use super::notify::NotificationBridge;
use super::transport::Transport;
use crate::app::config::DownloadConfig;
use crate::cache::{CacheResult, CacheStore};
use crate::gallery::resolver::GalleryResolver;
use crate::gallery::GalleryId;
use crate::progress::{PageProgress, ProgressTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Externally visible state of a gallery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GalleryStatus {
    /// Nothing running and nothing happened in this session
    Idle,
    Resolving,
    Downloading { completed: usize, total: usize },
    Restarting { attempt: u32 },
    Completed,
    NotFound,
    /// Gave up after the restart bound; progress stays below 100%
    Stalled { reason: String },
    Cancelled,
    Deleted,
}

impl GalleryStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::Downloading { .. } | Self::Restarting { .. }
        )
    }

    /// True when no download is running for the gallery
    pub fn is_settled(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for GalleryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Downloading { completed, total } => write!(f, "Downloading ({}/{})", completed, total),
            Self::Restarting { attempt } => write!(f, "Restarting (attempt {})", attempt),
            Self::Completed => write!(f, "Completed"),
            Self::NotFound => write!(f, "Not found"),
            Self::Stalled { reason } => write!(f, "Stalled: {}", reason),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// State shared between the orchestrator and its event pump
struct Registry {
    cache: Arc<CacheStore>,
    tracker: Arc<ProgressTracker>,
    generations: Arc<Generations>,
    bridge: Arc<dyn NotificationBridge>,
    /// Running supervisors; also serializes download/cancel/delete per orchestrator
    active: AsyncMutex<HashMap<GalleryId, JoinHandle<()>>>,
    statuses: Mutex<HashMap<GalleryId, watch::Sender<GalleryStatus>>>,
}

impl Registry {
    fn watcher(&self, id: GalleryId) -> watch::Sender<GalleryStatus> {
        let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        statuses
            .entry(id)
            .or_insert_with(|| watch::channel(GalleryStatus::Idle).0)
            .clone()
    }

    fn set_status(&self, id: GalleryId, status: GalleryStatus) {
        tracing::trace!("Gallery {} status: {}", id, status);
        self.watcher(id).send_replace(status);
    }

    /// Forward progress, or withdraw it once the cache folder is gone
    fn notify(&self, id: GalleryId, has_folder: bool, completed: usize, total: usize, is_complete: bool) {
        if has_folder {
            self.bridge.update(id, completed, total, is_complete);
        } else {
            tracing::debug!("Gallery {} has no cache folder; suppressing notification", id);
            self.bridge.cancel(id);
        }
    }

    async fn apply(&self, event: DownloadEvent) {
        let ticket = event.ticket();
        let id = ticket.gallery;
        // Checked before entering the generation lock, which must not wait on I/O
        let has_folder = self.cache.folder_exists(id).await;

        match event {
            DownloadEvent::Started {
                title,
                completed,
                total,
                ..
            } => {
                self.generations.with_current(ticket, || {
                    tracing::debug!("Gallery {} '{}' started at {}/{}", id, title, completed, total);
                    self.set_status(id, GalleryStatus::Downloading { completed, total });
                    if completed < total {
                        self.notify(id, has_folder, completed, total, false);
                    }
                });
            }
            DownloadEvent::PageCompleted {
                index,
                completed,
                total,
                ..
            } => {
                self.generations.with_current(ticket, || {
                    tracing::trace!("Gallery {} page {} done ({}/{})", id, index, completed, total);
                    self.set_status(id, GalleryStatus::Downloading { completed, total });
                    self.notify(id, has_folder, completed, total, false);
                });
            }
            DownloadEvent::Restarting { attempt, .. } => {
                self.generations.with_current(ticket, || {
                    self.set_status(id, GalleryStatus::Restarting { attempt });
                });
            }
            DownloadEvent::Completed { .. } => {
                self.finish(ticket, |registry| {
                    let (completed, total) = registry.tracker.counts(id).unwrap_or((0, 0));
                    registry.set_status(id, GalleryStatus::Completed);
                    registry.notify(id, has_folder, completed, total, true);
                })
                .await;
            }
            DownloadEvent::NotFound { .. } => {
                self.finish(ticket, |registry| {
                    registry.set_status(id, GalleryStatus::NotFound);
                    registry.bridge.cancel(id);
                })
                .await;
            }
            DownloadEvent::Stalled { reason, .. } => {
                self.finish(ticket, |registry| {
                    registry.set_status(id, GalleryStatus::Stalled { reason });
                })
                .await;
            }
        }
    }

    /// Retire a finished generation and run `f` if it was still current
    async fn finish(&self, ticket: Ticket, f: impl FnOnce(&Self)) {
        let mut active = self.active.lock().await;
        if self.generations.retire_if(ticket) {
            active.remove(&ticket.gallery);
            f(self);
        }
    }

    /// Stop whatever runs for the gallery; requires the `active` lock
    ///
    /// Returns once the supervisor and all of its page requests are gone and
    /// no page write or metadata persist for the gallery is still in progress.
    async fn stop(&self, active: &mut HashMap<GalleryId, JoinHandle<()>>, id: GalleryId) -> bool {
        self.generations.retire(id);

        let Some(handle) = active.remove(&id) else {
            return false;
        };
        handle.abort();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                tracing::error!("Download supervisor for gallery {} panicked: {}", id, e);
            }
        }
        self.cache.barrier(id).await;
        true
    }
}

pub struct DownloadOrchestrator {
    registry: Arc<Registry>,
    executor: FetchExecutor,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadOrchestrator {
    /// Create the registry and spawn the event pump
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &DownloadConfig,
        cache: Arc<CacheStore>,
        resolver: Arc<dyn GalleryResolver>,
        transport: Arc<dyn Transport>,
        bridge: Arc<dyn NotificationBridge>,
    ) -> Self {
        let tracker = Arc::new(ProgressTracker::new());
        let generations = Arc::new(Generations::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let executor = FetchExecutor::new(
            cache.clone(),
            tracker.clone(),
            generations.clone(),
            resolver,
            transport,
            ExecutorSettings::from(config),
            events_tx,
        );

        let registry = Arc::new(Registry {
            cache,
            tracker,
            generations,
            bridge,
            active: AsyncMutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
        });

        let pump_registry = registry.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_registry.apply(event).await;
            }
        });

        tracing::debug!(
            "Download orchestrator started (retry_attempts={}, max_restarts={})",
            config.retry_attempts,
            config.max_restarts
        );

        Self {
            registry,
            executor,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Seed progress and status from the cache store for every cached gallery
    ///
    /// Galleries already tracked in this session are left alone.
    pub async fn restore(&self) -> CacheResult<usize> {
        let mut restored = 0;

        for id in self.registry.cache.cached_galleries().await? {
            let metadata = self.registry.cache.open(id).await?;
            let Some(image_list) = metadata.image_list.as_deref() else {
                continue;
            };

            if self.registry.tracker.restore(id, image_list) {
                if metadata.is_complete() {
                    self.registry.set_status(id, GalleryStatus::Completed);
                }
                restored += 1;
            }
        }

        tracing::debug!("Restored progress for {} cached gallery(s)", restored);
        Ok(restored)
    }

    /// Start downloading the gallery, restarting it if it is already running
    pub async fn download(&self, id: GalleryId) {
        let mut active = self.registry.active.lock().await;

        if self.registry.stop(&mut active, id).await {
            tracing::info!("Restarting download of gallery {}", id);
            self.registry.tracker.clear(id);
        }

        let ticket = self.registry.generations.advance(id);
        self.registry.set_status(id, GalleryStatus::Resolving);
        active.insert(id, self.executor.spawn(ticket));

        tracing::info!("Download of gallery {} queued (generation {})", id, ticket.generation);
    }

    /// Abort the gallery's download; stored pages are kept
    ///
    /// Returns whether a download was running. Nothing the aborted generation
    /// did can change state after this returns.
    pub async fn cancel(&self, id: GalleryId) -> bool {
        let mut active = self.registry.active.lock().await;
        self.cancel_locked(&mut active, id).await
    }

    async fn cancel_locked(&self, active: &mut HashMap<GalleryId, JoinHandle<()>>, id: GalleryId) -> bool {
        let was_running = self.registry.stop(active, id).await;

        self.registry.tracker.clear(id);
        self.registry.bridge.cancel(id);
        if was_running {
            self.registry.set_status(id, GalleryStatus::Cancelled);
            tracing::info!("Cancelled download of gallery {}", id);
        }
        was_running
    }

    /// Cancel every running download; returns how many were stopped
    pub async fn cancel_all(&self) -> usize {
        let mut active = self.registry.active.lock().await;
        let ids: Vec<GalleryId> = active.keys().copied().collect();

        let mut cancelled = 0;
        for id in ids {
            if self.cancel_locked(&mut active, id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel the gallery and remove everything cached for it
    pub async fn delete(&self, id: GalleryId) -> CacheResult<()> {
        let mut active = self.registry.active.lock().await;
        self.cancel_locked(&mut active, id).await;

        self.registry.cache.delete(id).await?;
        self.registry.tracker.clear(id);
        self.registry.set_status(id, GalleryStatus::Deleted);
        Ok(())
    }

    /// Cancel everything and stop the event pump
    pub async fn shutdown(&self) {
        let cancelled = self.cancel_all().await;

        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }

        tracing::info!("Download orchestrator stopped ({} download(s) cancelled)", cancelled);
    }

    pub fn snapshot(&self, id: GalleryId) -> Option<Vec<PageProgress>> {
        self.registry.tracker.snapshot(id)
    }

    pub fn counts(&self, id: GalleryId) -> Option<(usize, usize)> {
        self.registry.tracker.counts(id)
    }

    pub fn is_fully_complete(&self, id: GalleryId) -> bool {
        self.registry.tracker.is_fully_complete(id)
    }

    pub fn status(&self, id: GalleryId) -> GalleryStatus {
        let watcher = self.registry.watcher(id);
        let status = watcher.borrow().clone();
        status
    }

    pub fn subscribe(&self, id: GalleryId) -> watch::Receiver<GalleryStatus> {
        self.registry.watcher(id).subscribe()
    }

    /// Resolve once no download is running for the gallery
    pub async fn wait(&self, id: GalleryId) -> GalleryStatus {
        let mut receiver = self.subscribe(id);
        let settled = match receiver.wait_for(GalleryStatus::is_settled).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(id),
        };
        settled
    }

    /// Whether the last resolve reported the gallery as nonexistent
    pub fn is_not_found(&self, id: GalleryId) -> bool {
        self.registry.tracker.is_not_found(id)
    }

    /// Whether progress is held for the gallery in this session
    pub fn is_tracked(&self, id: GalleryId) -> bool {
        self.registry.tracker.contains(id)
    }

    /// Galleries with a running download
    pub async fn active(&self) -> Vec<GalleryId> {
        let active = self.registry.active.lock().await;
        let mut ids: Vec<GalleryId> = active.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn thumbnail(&self, id: GalleryId) -> CacheResult<Vec<u8>> {
        self.registry.cache.thumbnail(id).await
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.registry.cache
    }
}

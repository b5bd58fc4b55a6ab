//! Fetch executor
//!
//! Runs one supervised task per gallery download. A generation:
//!
//! 1. reads the cache record, resolving the gallery first if its page list is
//!    not stored yet,
//! 2. requests every missing page at once in a [`JoinSet`],
//! 3. stores each fetched page through the cache store and marks it complete.
//!
//! A request that keeps failing is retried in place up to `retry_attempts`
//! total attempts; a rate-limited one (HTTP 429) first waits out
//! `restart_delay`. Any page failure that survives those retries, and any
//! storage failure, aborts the whole generation; the supervisor then moves to
//! a new generation and recomputes the missing set from the cache store.
//! Pages stored before the failure are not fetched again, but siblings that
//! were still in flight are.

use super::error::FetchError;
use super::generation::{Generations, Ticket};
use super::transport::{PageRequest, Transport};
use crate::app::config::DownloadConfig;
use crate::cache::CacheStore;
use crate::gallery::resolver::{GalleryResolver, ResolveError};
use crate::gallery::PageDescriptor;
use crate::progress::ProgressTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Retry and restart policy
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Total attempts per page request before the generation is abandoned
    pub retry_attempts: u32,
    /// Whole-gallery restarts before the gallery is reported stalled
    pub max_restarts: u32,
    /// Pause before a restarted generation begins
    pub restart_delay: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            max_restarts: 8,
            restart_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&DownloadConfig> for ExecutorSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts.max(1),
            max_restarts: config.max_restarts,
            restart_delay: Duration::from_millis(config.restart_delay_ms),
        }
    }
}

/// Progress reported back to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Page list known and progress seeded
    Started {
        ticket: Ticket,
        title: String,
        completed: usize,
        total: usize,
    },
    /// `completed` counts pages stored so far in this generation's gallery
    PageCompleted {
        ticket: Ticket,
        index: usize,
        completed: usize,
        total: usize,
    },
    Completed { ticket: Ticket },
    /// `ticket` is the new generation
    Restarting {
        ticket: Ticket,
        attempt: u32,
        reason: String,
    },
    NotFound { ticket: Ticket },
    Stalled { ticket: Ticket, reason: String },
}

impl DownloadEvent {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Started { ticket, .. }
            | Self::PageCompleted { ticket, .. }
            | Self::Completed { ticket }
            | Self::Restarting { ticket, .. }
            | Self::NotFound { ticket }
            | Self::Stalled { ticket, .. } => *ticket,
        }
    }
}

/// How a generation ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    NotFound,
    /// Cancelled or replaced while running
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOutcome {
    Stored(usize),
    Discarded,
}

#[derive(Clone)]
pub struct FetchExecutor {
    cache: Arc<CacheStore>,
    tracker: Arc<ProgressTracker>,
    generations: Arc<Generations>,
    resolver: Arc<dyn GalleryResolver>,
    transport: Arc<dyn Transport>,
    settings: ExecutorSettings,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

impl FetchExecutor {
    pub fn new(
        cache: Arc<CacheStore>,
        tracker: Arc<ProgressTracker>,
        generations: Arc<Generations>,
        resolver: Arc<dyn GalleryResolver>,
        transport: Arc<dyn Transport>,
        settings: ExecutorSettings,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Self {
        Self {
            cache,
            tracker,
            generations,
            resolver,
            transport,
            settings,
            events,
        }
    }

    /// Spawn the supervisor for `ticket`
    ///
    /// Aborting the returned handle drops the supervisor's join set, which
    /// aborts every page request of the gallery.
    pub fn spawn(&self, ticket: Ticket) -> JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move { executor.supervise(ticket).await })
    }

    fn emit(&self, event: DownloadEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver closed; dropping download event");
        }
    }

    async fn supervise(self, mut ticket: Ticket) {
        let gallery = ticket.gallery;
        let mut restarts = 0;

        loop {
            match self.run_generation(ticket).await {
                Ok(Outcome::Completed) => {
                    tracing::info!("Gallery {} download complete", gallery);
                    self.emit(DownloadEvent::Completed { ticket });
                    return;
                }
                Ok(Outcome::NotFound) => {
                    tracing::warn!("Gallery {} does not exist; cache removed", gallery);
                    self.emit(DownloadEvent::NotFound { ticket });
                    return;
                }
                Ok(Outcome::Superseded) => {
                    tracing::debug!("Gallery {} generation {} superseded", gallery, ticket.generation);
                    return;
                }
                Err(e) => {
                    if restarts >= self.settings.max_restarts {
                        tracing::error!(
                            "Gallery {} stalled after {} restart(s): {}",
                            gallery,
                            restarts,
                            e
                        );
                        self.emit(DownloadEvent::Stalled {
                            ticket,
                            reason: e.to_string(),
                        });
                        return;
                    }

                    let Some(next) = self.generations.advance_if(ticket) else {
                        return;
                    };
                    restarts += 1;
                    tracing::warn!(
                        "Gallery {} failed ({}); restarting (attempt {}/{})",
                        gallery,
                        e,
                        restarts,
                        self.settings.max_restarts
                    );

                    ticket = next;
                    self.emit(DownloadEvent::Restarting {
                        ticket,
                        attempt: restarts,
                        reason: e.to_string(),
                    });
                    tokio::time::sleep(self.settings.restart_delay).await;
                }
            }
        }
    }

    async fn run_generation(&self, ticket: Ticket) -> Result<Outcome, FetchError> {
        let gallery = ticket.gallery;
        let mut metadata = self.cache.open(gallery).await?;

        if metadata.image_list.is_none() {
            self.tracker.begin_resolving(ticket);

            match self.resolver.resolve(gallery).await {
                Ok(info) => {
                    let attached = self
                        .cache
                        .attach_info_guarded(gallery, info, || self.generations.is_current(ticket))
                        .await?;
                    let Some(attached) = attached else {
                        return Ok(Outcome::Superseded);
                    };
                    metadata = attached;
                }
                Err(ResolveError::NotFound(_)) => {
                    let deleted = self
                        .cache
                        .delete_guarded(gallery, || self.generations.is_current(ticket))
                        .await?;
                    if !deleted {
                        return Ok(Outcome::Superseded);
                    }
                    self.tracker.mark_not_found(ticket);
                    return Ok(Outcome::NotFound);
                }
                Err(e) => return Err(FetchError::Resolve(e)),
            }
        }

        if !self.generations.is_current(ticket) {
            return Ok(Outcome::Superseded);
        }

        if let Err(e) = self.cache.prune_orphans(gallery).await {
            tracing::warn!("Could not prune gallery {}: {}", gallery, e);
        }

        let missing = metadata.missing();
        let (Some(info), Some(image_list)) = (metadata.gallery_info, metadata.image_list) else {
            return Err(FetchError::Unresolved);
        };

        self.tracker.begin(ticket, &image_list);

        let total = image_list.len();
        let mut completed = total - missing.len();
        self.emit(DownloadEvent::Started {
            ticket,
            title: info.title.clone(),
            completed,
            total,
        });

        if missing.is_empty() {
            return Ok(Outcome::Completed);
        }

        tracing::info!(
            "Gallery {} '{}': fetching {} of {} page(s)",
            gallery,
            info.title,
            missing.len(),
            total
        );

        let mut pages = JoinSet::new();
        for index in missing {
            let Some(page) = info.pages.get(index).cloned() else {
                return Err(FetchError::Unresolved);
            };
            let executor = self.clone();
            pages.spawn(async move { executor.fetch_page(ticket, page).await });
        }

        while let Some(joined) = pages.join_next().await {
            match joined {
                Ok(Ok(PageOutcome::Stored(index))) => {
                    completed += 1;
                    self.emit(DownloadEvent::PageCompleted {
                        ticket,
                        index,
                        completed,
                        total,
                    });
                }
                Ok(Ok(PageOutcome::Discarded)) => {
                    pages.abort_all();
                    return Ok(Outcome::Superseded);
                }
                Ok(Err(e)) => {
                    pages.abort_all();
                    return Err(e);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    pages.abort_all();
                    return Err(FetchError::Panicked(e.to_string()));
                }
            }
        }

        if self.cache.open(gallery).await?.is_complete() {
            Ok(Outcome::Completed)
        } else {
            Err(FetchError::Incomplete)
        }
    }

    async fn fetch_page(&self, ticket: Ticket, page: PageDescriptor) -> Result<PageOutcome, FetchError> {
        let index = page.index;
        let request = PageRequest {
            gallery: ticket.gallery,
            index,
            url: page.url,
        };

        let tracker = self.tracker.clone();
        let on_progress = move |read: u64, total: Option<u64>| {
            if let Some(total) = total.filter(|&total| total > 0) {
                let percent = (read.saturating_mul(100) / total).min(100) as u8;
                tracker.set_in_flight(ticket, index, percent);
            }
        };

        let mut attempt = 1;
        let bytes = loop {
            match self.transport.fetch(&request, &on_progress).await {
                Ok(bytes) => break bytes,
                Err(e) if attempt < self.settings.retry_attempts && e.is_rate_limited() => {
                    tracing::warn!(
                        "Page {} of gallery {} rate limited, backing off {:?} (attempt {}/{})",
                        index,
                        ticket.gallery,
                        self.settings.restart_delay,
                        attempt + 1,
                        self.settings.retry_attempts
                    );
                    tokio::time::sleep(self.settings.restart_delay).await;
                    attempt += 1;
                }
                Err(e) if attempt < self.settings.retry_attempts => {
                    tracing::debug!(
                        "Page {} of gallery {} failed ({}), retrying (attempt {}/{})",
                        index,
                        ticket.gallery,
                        e,
                        attempt + 1,
                        self.settings.retry_attempts
                    );
                    attempt += 1;
                }
                Err(source) => {
                    return Err(FetchError::Transport {
                        index,
                        attempts: attempt,
                        source,
                    });
                }
            }
        };

        let stored = self
            .cache
            .put_page_guarded(ticket.gallery, index, bytes, || self.generations.is_current(ticket))
            .await
            .map_err(|source| FetchError::Storage { index, source })?;

        if !stored {
            return Ok(PageOutcome::Discarded);
        }

        self.tracker.set_complete(ticket, index);
        Ok(PageOutcome::Stored(index))
    }
}

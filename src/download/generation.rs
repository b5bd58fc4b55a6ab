//! Per-gallery download generations
//!
//! Every download attempt of a gallery runs under a generation. Starting,
//! restarting or cancelling a download moves the gallery to a new generation
//! (or none), and any work still tagged with an older one is stale. Values come
//! from a single global counter, so a generation is never handed out twice even
//! after a gallery's entry is retired.

use crate::gallery::GalleryId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Identity of one download attempt: (gallery, generation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub gallery: GalleryId,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct Generations {
    next: AtomicU64,
    current: Mutex<HashMap<GalleryId, u64>>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start a new generation for the gallery, superseding any previous one
    pub fn advance(&self, gallery: GalleryId) -> Ticket {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.mint();
        current.insert(gallery, generation);
        Ticket { gallery, generation }
    }

    /// Advance only if `ticket` is still current
    ///
    /// Used by a running download to restart itself without resurrecting a
    /// gallery that was cancelled in the meantime.
    pub fn advance_if(&self, ticket: Ticket) -> Option<Ticket> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.get(&ticket.gallery) != Some(&ticket.generation) {
            return None;
        }

        let generation = self.mint();
        current.insert(ticket.gallery, generation);
        Some(Ticket {
            gallery: ticket.gallery,
            generation,
        })
    }

    /// Invalidate whatever generation the gallery is on
    pub fn retire(&self, gallery: GalleryId) -> Option<u64> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.remove(&gallery)
    }

    /// Retire only if `ticket` is still current
    pub fn retire_if(&self, ticket: Ticket) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.get(&ticket.gallery) == Some(&ticket.generation) {
            current.remove(&ticket.gallery);
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.get(&ticket.gallery) == Some(&ticket.generation)
    }

    pub fn current(&self, gallery: GalleryId) -> Option<Ticket> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current
            .get(&gallery)
            .map(|&generation| Ticket { gallery, generation })
    }

    /// Run `f` under the table lock if `ticket` is current
    ///
    /// A concurrent `retire`/`advance` either happens before (and `f` is
    /// skipped) or after `f` has returned.
    pub fn with_current<R>(&self, ticket: Ticket, f: impl FnOnce() -> R) -> Option<R> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.get(&ticket.gallery) == Some(&ticket.generation) {
            Some(f())
        } else {
            None
        }
    }

    /// Galleries that currently have a live generation
    pub fn active(&self) -> Vec<GalleryId> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.keys().copied().collect()
    }
}

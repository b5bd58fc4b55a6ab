//! In-memory per-page progress
//!
//! Purely for live reporting; the cache store stays the durable record. Each
//! gallery entry is tagged with the generation that created it and every
//! mutation carries a [`Ticket`]. A mutation from another generation is
//! dropped under the same lock that would apply it, so stale callbacks can
//! never land in a newer entry.

use crate::download::generation::Ticket;
use crate::gallery::GalleryId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Largest percentage reported for a page still in flight
const MAX_IN_FLIGHT_PERCENT: u8 = 99;

/// Owner of entries restored from disk; never minted, so no ticket matches it
const RESTORED_GENERATION: u64 = 0;

/// Transient state of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageProgress {
    /// Percentage in `0..=99`
    InFlight(u8),
    /// Stored durably; terminal until the entry is cleared
    Complete,
}

impl PageProgress {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

#[derive(Debug, Clone)]
enum EntryState {
    /// Gallery info not known yet
    Resolving,
    /// Gallery does not exist remotely
    NotFound,
    Pages(Vec<PageProgress>),
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u64,
    state: EntryState,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<GalleryId, Entry>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry(&self, ticket: Ticket, f: impl FnOnce(&mut EntryState)) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&ticket.gallery) {
            if entry.generation == ticket.generation {
                f(&mut entry.state);
            }
        }
    }

    /// Start tracking a generation whose page list is not known yet
    pub fn begin_resolving(&self, ticket: Ticket) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            ticket.gallery,
            Entry {
                generation: ticket.generation,
                state: EntryState::Resolving,
            },
        );
    }

    /// Seed a generation from the cache store's image list
    ///
    /// Pages already stored start out complete, the rest at 0%.
    pub fn begin(&self, ticket: Ticket, image_list: &[Option<String>]) {
        let pages = image_list
            .iter()
            .map(|slot| match slot {
                Some(_) => PageProgress::Complete,
                None => PageProgress::InFlight(0),
            })
            .collect();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            ticket.gallery,
            Entry {
                generation: ticket.generation,
                state: EntryState::Pages(pages),
            },
        );
    }

    /// Rebuild an idle entry from a persisted image list
    ///
    /// Only fills the gap when nothing is tracked for the gallery. The entry
    /// belongs to no generation and is replaced by the next download.
    pub fn restore(&self, gallery: GalleryId, image_list: &[Option<String>]) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&gallery) {
            return false;
        }

        let pages = image_list
            .iter()
            .map(|slot| match slot {
                Some(_) => PageProgress::Complete,
                None => PageProgress::InFlight(0),
            })
            .collect();
        entries.insert(
            gallery,
            Entry {
                generation: RESTORED_GENERATION,
                state: EntryState::Pages(pages),
            },
        );
        true
    }

    /// Update an in-flight page; completed pages are left untouched
    pub fn set_in_flight(&self, ticket: Ticket, index: usize, percent: u8) {
        self.with_entry(ticket, |state| {
            if let EntryState::Pages(pages) = state {
                if let Some(page) = pages.get_mut(index) {
                    if !page.is_complete() {
                        *page = PageProgress::InFlight(percent.min(MAX_IN_FLIGHT_PERCENT));
                    }
                }
            }
        });
    }

    /// Mark a page as durably stored
    pub fn set_complete(&self, ticket: Ticket, index: usize) {
        self.with_entry(ticket, |state| {
            if let EntryState::Pages(pages) = state {
                if let Some(page) = pages.get_mut(index) {
                    *page = PageProgress::Complete;
                }
            }
        });
    }

    /// Record that the gallery does not exist
    pub fn mark_not_found(&self, ticket: Ticket) {
        self.with_entry(ticket, |state| *state = EntryState::NotFound);
    }

    /// Per-page states, or `None` while untracked or unresolved
    pub fn snapshot(&self, gallery: GalleryId) -> Option<Vec<PageProgress>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&gallery).map(|entry| &entry.state) {
            Some(EntryState::Pages(pages)) => Some(pages.clone()),
            _ => None,
        }
    }

    /// (completed, total) page counts
    pub fn counts(&self, gallery: GalleryId) -> Option<(usize, usize)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&gallery).map(|entry| &entry.state) {
            Some(EntryState::Pages(pages)) => Some((
                pages.iter().filter(|page| page.is_complete()).count(),
                pages.len(),
            )),
            _ => None,
        }
    }

    /// True iff the gallery is tracked with a page list and every page is complete
    pub fn is_fully_complete(&self, gallery: GalleryId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&gallery).map(|entry| &entry.state) {
            Some(EntryState::Pages(pages)) => pages.iter().all(|page| page.is_complete()),
            _ => false,
        }
    }

    pub fn is_not_found(&self, gallery: GalleryId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        matches!(
            entries.get(&gallery).map(|entry| &entry.state),
            Some(EntryState::NotFound)
        )
    }

    pub fn contains(&self, gallery: GalleryId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&gallery)
    }

    /// Drop all transient state of the gallery
    pub fn clear(&self, gallery: GalleryId) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&gallery);
    }
}

//! Notification bridge
//!
//! Receives gallery progress from the orchestrator. Calls arrive on the
//! orchestrator's event pump and must not block.

use crate::gallery::GalleryId;

pub trait NotificationBridge: Send + Sync {
    /// Progress after a page completed, or the final state when `is_complete`
    fn update(&self, id: GalleryId, completed: usize, total: usize, is_complete: bool);

    /// Withdraw whatever is shown for the gallery
    fn cancel(&self, id: GalleryId);
}

/// Bridge that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationBridge for LogNotifier {
    fn update(&self, id: GalleryId, completed: usize, total: usize, is_complete: bool) {
        if is_complete {
            tracing::info!("Gallery {} finished: {}/{} page(s)", id, completed, total);
        } else {
            tracing::debug!("Gallery {} progress: {}/{} page(s)", id, completed, total);
        }
    }

    fn cancel(&self, id: GalleryId) {
        tracing::debug!("Gallery {} notification withdrawn", id);
    }
}

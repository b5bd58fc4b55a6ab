use crate::cache::CacheMetadata;
use crate::download::{GalleryStatus, NotificationBridge};
use crate::gallery::GalleryId;
use crate::progress::PageProgress;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Gallery summary printed by `status` and `list`
#[derive(Debug, Clone, Serialize)]
pub struct GalleryReport {
    pub id: GalleryId,
    pub title: Option<String>,
    pub completed: usize,
    pub total: Option<usize>,
    pub status: GalleryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageProgress>>,
}

impl GalleryReport {
    pub fn new(id: GalleryId, metadata: &CacheMetadata, status: GalleryStatus) -> Self {
        Self {
            id,
            title: metadata.gallery_info.as_ref().map(|info| info.title.clone()),
            completed: metadata.completed_count(),
            total: metadata.page_count(),
            status,
            pages: None,
        }
    }

    pub fn with_pages(mut self, pages: Option<Vec<PageProgress>>) -> Self {
        self.pages = pages;
        self
    }
}

pub fn format_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        (completed * 100 / total) as u8
    }
}

/// Format a single gallery for display
pub fn format_gallery(report: &GalleryReport, detailed: bool) -> String {
    let title = report.title.as_deref().unwrap_or("(unresolved)");
    let progress = match report.total {
        Some(total) => format!("{}/{} ({}%)", report.completed, total, format_percent(report.completed, total)),
        None => "-".to_string(),
    };

    if !detailed {
        return format!("{:>10}  {:<16} {}", report.id, progress, title);
    }

    let mut output = String::new();
    output.push_str(&format!("ID: {}\n", report.id));
    output.push_str(&format!("Title: {}\n", title));
    output.push_str(&format!("Pages: {}\n", progress));
    output.push_str(&format!("Status: {}", report.status));

    if let Some(ref pages) = report.pages {
        let missing: Vec<String> = pages
            .iter()
            .enumerate()
            .filter(|(_, page)| !page.is_complete())
            .map(|(index, _)| index.to_string())
            .collect();
        if !missing.is_empty() {
            output.push_str(&format!("\nMissing: {}", missing.join(", ")));
        }
    }

    output
}

/// Format multiple galleries for display (human or JSON)
pub fn format_galleries(reports: &[GalleryReport], json: bool) -> String {
    if json {
        serde_json::to_string_pretty(reports).unwrap_or_else(|_| "[]".to_string())
    } else if reports.is_empty() {
        "No cached galleries.".to_string()
    } else {
        reports
            .iter()
            .map(|report| format_gallery(report, false))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Notification bridge printing one line per progress step
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    /// Last percentage printed per gallery; avoids repeating identical lines
    last: Mutex<HashMap<GalleryId, u8>>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationBridge for ConsoleNotifier {
    fn update(&self, id: GalleryId, completed: usize, total: usize, is_complete: bool) {
        let percent = format_percent(completed, total);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        if is_complete {
            last.remove(&id);
            println!("[{}] ✓ {}/{} pages", id, completed, total);
        } else if last.insert(id, percent) != Some(percent) {
            println!("[{}] {:3}% {}/{} pages", id, percent, completed, total);
        }
    }

    fn cancel(&self, id: GalleryId) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.remove(&id);
    }
}

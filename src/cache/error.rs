use crate::gallery::GalleryId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the cache store
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metadata record could not be encoded or decoded
    #[error("Failed to (de)serialize cache metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Page index outside the gallery's page list
    #[error("Page {index} out of range for gallery {gallery} ({page_count} pages)")]
    IndexOutOfRange {
        gallery: GalleryId,
        index: usize,
        page_count: usize,
    },

    /// Page write attempted before gallery info was recorded
    #[error("Gallery {0} has no resolved page list")]
    Unresolved(GalleryId),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

use super::transport::TransportError;
use crate::cache::CacheError;
use crate::gallery::resolver::ResolveError;
use thiserror::Error;

/// Why a download generation was abandoned
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to resolve gallery: {0}")]
    Resolve(ResolveError),

    #[error("Page {index} failed after {attempts} attempt(s): {source}")]
    Transport {
        index: usize,
        attempts: u32,
        source: TransportError,
    },

    #[error("Could not store page {index}: {source}")]
    Storage { index: usize, source: CacheError },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Gallery page list missing from cache")]
    Unresolved,

    /// Every request finished but the record still has gaps
    #[error("Download finished with pages still missing")]
    Incomplete,

    #[error("Page task panicked: {0}")]
    Panicked(String),
}

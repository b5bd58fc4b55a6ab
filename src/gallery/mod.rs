//! Gallery domain types
//!
//! A gallery is a remote, multi-page image collection addressed by a positive
//! integer id. Its title and ordered page list are resolved once through a
//! [`resolver::GalleryResolver`] and are immutable afterwards.

pub mod resolver;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fallback extension for pages whose URL carries none
const FALLBACK_EXTENSION: &str = "img";

/// Opaque positive identifier of a remote gallery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GalleryId(u32);

impl GalleryId {
    /// Create a gallery id, rejecting zero
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GalleryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when parsing a gallery id from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid gallery id '{0}': expected a positive integer")]
pub struct ParseGalleryIdError(String);

impl FromStr for GalleryId {
    type Err = ParseGalleryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ParseGalleryIdError(s.to_string()))
    }
}

/// One page of a gallery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Ordinal position within the gallery
    pub index: usize,
    /// Location of the page image
    pub url: String,
}

impl PageDescriptor {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
        }
    }

    /// File extension used when the page is stored on disk
    ///
    /// Taken from the last path segment of the URL, lowercased. Query strings
    /// and fragments are ignored.
    pub fn extension(&self) -> String {
        let path = match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            // Relative fragment: strip query/fragment by hand
            Err(_) => self
                .url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        path.rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
    }

    /// File name of the stored page (`{index}.{ext}`)
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.index, self.extension())
    }
}

/// Resolved gallery metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryInfo {
    pub id: GalleryId,
    pub title: String,
    pub pages: Vec<PageDescriptor>,
}

impl GalleryInfo {
    pub fn new(id: GalleryId, title: impl Into<String>, urls: Vec<String>) -> Self {
        let pages = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| PageDescriptor::new(index, url))
            .collect();

        Self {
            id,
            title: title.into(),
            pages,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

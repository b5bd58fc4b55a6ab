//! Metadata-fetch collaborator
//!
//! Resolves a gallery id into its title and ordered page list. The engine only
//! depends on [`GalleryResolver`]; [`HttpResolver`] is the adapter used by the
//! binary.

use super::{GalleryId, GalleryInfo};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Resolution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The gallery does not exist remotely (terminal)
    #[error("Gallery {0} not found")]
    NotFound(GalleryId),

    /// Any failure worth retrying later
    #[error("Transient resolve error: {0}")]
    Transient(String),
}

#[async_trait]
pub trait GalleryResolver: Send + Sync {
    async fn resolve(&self, id: GalleryId) -> Result<GalleryInfo, ResolveError>;
}

/// JSON document served per gallery
#[derive(Debug, Deserialize)]
struct GalleryDocument {
    title: String,
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    url: String,
}

/// Resolver fetching `{base}/{id}.json`
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpResolver {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, base_url)?)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, url::ParseError> {
        // Trailing slash so join() appends instead of replacing the last segment
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
        })
    }

    fn document_url(&self, id: GalleryId) -> Result<Url, ResolveError> {
        self.base_url
            .join(&format!("{}.json", id))
            .map_err(|e| ResolveError::Transient(format!("Invalid metadata URL: {}", e)))
    }
}

#[async_trait]
impl GalleryResolver for HttpResolver {
    async fn resolve(&self, id: GalleryId) -> Result<GalleryInfo, ResolveError> {
        let url = self.document_url(id)?;
        tracing::debug!("Resolving gallery {} from {}", id, url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ResolveError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(id));
        }
        if !status.is_success() {
            let info = crate::download::http_errors::HttpErrorInfo::from_status(status.as_u16());
            return Err(ResolveError::Transient(info.format()));
        }

        let document: GalleryDocument = response
            .json()
            .await
            .map_err(|e| ResolveError::Transient(format!("Malformed gallery document: {}", e)))?;

        // Page URLs may be relative to the document location
        let urls = document
            .pages
            .into_iter()
            .map(|page| match url.join(&page.url) {
                Ok(absolute) => absolute.to_string(),
                Err(_) => page.url,
            })
            .collect();

        let info = GalleryInfo::new(id, document.title, urls);
        tracing::info!("Resolved gallery {} '{}' ({} pages)", id, info.title, info.page_count());
        Ok(info)
    }
}

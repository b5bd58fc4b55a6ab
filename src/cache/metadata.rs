//! Persisted per-gallery cache record

use crate::gallery::GalleryInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of what is on disk for one gallery
///
/// `image_list` is unset until the gallery info is known; afterwards its
/// length always equals the page count. A `Some` slot holds the file name of
/// the stored page, relative to the gallery folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default)]
    pub gallery_info: Option<GalleryInfo>,
    #[serde(default)]
    pub image_list: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CacheMetadata {
    /// Record gallery info if none is stored yet
    ///
    /// Returns true when the record changed. Stored info is never replaced.
    pub fn attach(&mut self, info: GalleryInfo) -> bool {
        if self.gallery_info.is_some() && self.image_list.is_some() {
            return false;
        }

        let info = self.gallery_info.take().unwrap_or(info);
        let page_count = info.page_count();

        let image_list = match self.image_list.take() {
            Some(list) if list.len() == page_count => list,
            _ => vec![None; page_count],
        };

        self.gallery_info = Some(info);
        self.image_list = Some(image_list);
        true
    }

    pub fn page_count(&self) -> Option<usize> {
        self.gallery_info.as_ref().map(GalleryInfo::page_count)
    }

    /// Indices of pages not yet stored
    pub fn missing(&self) -> Vec<usize> {
        match &self.image_list {
            Some(list) => list
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_none())
                .map(|(index, _)| index)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.image_list
            .as_ref()
            .map(|list| list.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }

    /// True once info is known and every slot is filled
    pub fn is_complete(&self) -> bool {
        self.image_list
            .as_ref()
            .is_some_and(|list| list.iter().all(Option::is_some))
    }

    /// File names referenced by the image list
    pub fn referenced_files(&self) -> impl Iterator<Item = &str> {
        self.image_list
            .iter()
            .flatten()
            .filter_map(|slot| slot.as_deref())
    }
}

//! Cache store
//!
//! Single source of truth for what is on disk. Layout:
//!
//! ```text
//! {root}/{gallery_id}/metadata.json   persisted CacheMetadata
//! {root}/{gallery_id}/{index}.{ext}   page files
//! ```
//!
//! Metadata persists go through a temp file and a rename, so a crash leaves
//! either the previous record or the new one, never a torn file. Page bytes go
//! to `{index}.{ext}.part` first and are renamed into place together with the
//! record persist that references them. A crash in between leaves an orphan
//! that [`CacheStore::prune_orphans`] removes later.
//!
//! Each gallery has an async mutex guarding the in-memory copy of its last
//! persisted record, which serializes metadata persists, and a read/write lock
//! whose read side is held by every page file write until its bytes are on
//! disk. [`CacheStore::barrier`] takes both.

use super::error::{CacheError, CacheResult};
use super::metadata::CacheMetadata;
use crate::gallery::{GalleryId, GalleryInfo};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

const METADATA_FILE: &str = "metadata.json";
const METADATA_TEMP_FILE: &str = "metadata.json.tmp";
const PART_SUFFIX: &str = ".part";

/// 1x1 transparent PNG returned when no page is cached yet
pub const PLACEHOLDER_THUMBNAIL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

#[derive(Default)]
struct GallerySlot {
    /// Mirror of the last persisted record (`None` until loaded)
    record: Arc<AsyncMutex<Option<CacheMetadata>>>,
    /// Read side held by page file writes in progress
    writes: Arc<RwLock<()>>,
}

type RecordGuard = OwnedMutexGuard<Option<CacheMetadata>>;

/// Page file written under `.part`, renamed when its record is persisted
struct StagedPage {
    part: PathBuf,
    path: PathBuf,
}

pub struct CacheStore {
    root: PathBuf,
    galleries: Mutex<HashMap<GalleryId, Arc<GallerySlot>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            galleries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding a gallery's record and pages
    pub fn gallery_dir(&self, id: GalleryId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Whether a cache folder exists for the gallery
    pub fn has_folder(&self, id: GalleryId) -> bool {
        self.gallery_dir(id).is_dir()
    }

    /// [`CacheStore::has_folder`] without blocking the runtime
    pub async fn folder_exists(&self, id: GalleryId) -> bool {
        tokio::fs::metadata(self.gallery_dir(id))
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    fn slot(&self, id: GalleryId) -> Arc<GallerySlot> {
        let mut galleries = self.galleries.lock().unwrap_or_else(PoisonError::into_inner);
        galleries.entry(id).or_default().clone()
    }

    async fn lock_record(&self, id: GalleryId) -> RecordGuard {
        self.slot(id).record.clone().lock_owned().await
    }

    async fn load_from_disk(&self, id: GalleryId) -> CacheResult<CacheMetadata> {
        let path = self.gallery_dir(id).join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheMetadata::default()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Write the record via temp file + rename on the blocking pool
    ///
    /// A staged page is renamed into place first. The record guard moves into
    /// the blocking write and the mirror is updated there, so the gallery stays
    /// locked until the rename has landed even if the calling task is aborted
    /// while waiting.
    async fn persist(
        &self,
        id: GalleryId,
        mut guard: RecordGuard,
        metadata: CacheMetadata,
        staged: Option<StagedPage>,
    ) -> CacheResult<()> {
        let dir = self.gallery_dir(id);
        let content = serde_json::to_vec_pretty(&metadata)?;
        let size = content.len();

        let written = tokio::task::spawn_blocking(move || {
            if let Some(page) = staged {
                std::fs::rename(&page.part, &page.path).map_err(|e| CacheError::io(&page.path, e))?;
            }
            write_record(&dir, &content)?;
            *guard = Some(metadata);
            Ok::<_, CacheError>(())
        })
        .await;

        match written {
            Ok(result) => result?,
            Err(e) => return Err(CacheError::io(self.gallery_dir(id), std::io::Error::other(e))),
        }

        tracing::trace!("Persisted metadata for gallery {} ({} bytes)", id, size);
        Ok(())
    }

    /// Return the persisted record, or an empty one when nothing is cached
    ///
    /// Does not create anything on disk.
    pub async fn open(&self, id: GalleryId) -> CacheResult<CacheMetadata> {
        let mut guard = self.lock_record(id).await;

        if guard.is_none() {
            *guard = Some(self.load_from_disk(id).await?);
        }

        Ok(guard.clone().unwrap_or_default())
    }

    /// Record resolved gallery info and size the image list
    ///
    /// Already stored info wins; the record is only persisted when it changed.
    pub async fn attach_info(&self, id: GalleryId, info: GalleryInfo) -> CacheResult<CacheMetadata> {
        Ok(self
            .attach_info_guarded(id, info, || true)
            .await?
            .unwrap_or_default())
    }

    /// [`CacheStore::attach_info`] if `guard` holds under the gallery lock
    ///
    /// Returns `Ok(None)` without touching the disk when it fails.
    pub async fn attach_info_guarded<F>(
        &self,
        id: GalleryId,
        info: GalleryInfo,
        guard: F,
    ) -> CacheResult<Option<CacheMetadata>>
    where
        F: Fn() -> bool,
    {
        let mut record = self.lock_record(id).await;
        if !guard() {
            return Ok(None);
        }

        if record.is_none() {
            *record = Some(self.load_from_disk(id).await?);
        }
        let mut metadata = record.as_ref().cloned().unwrap_or_default();

        if metadata.attach(info) {
            metadata.updated_at = Some(Utc::now());
            self.persist(id, record, metadata.clone(), None).await?;
            tracing::debug!(
                "Attached info to gallery {} ({} pages)",
                id,
                metadata.page_count().unwrap_or(0)
            );
        }

        Ok(Some(metadata))
    }

    /// Store one page and persist the updated record
    pub async fn put_page(&self, id: GalleryId, index: usize, bytes: &[u8]) -> CacheResult<()> {
        self.put_page_guarded(id, index, bytes.to_vec(), || true)
            .await
            .map(|_| ())
    }

    /// Store one page, persisting only if `guard` still holds
    ///
    /// `guard` is checked once the page write slot is taken, before any byte is
    /// written, and again while the gallery lock is held, immediately before the
    /// page is renamed into place and the record persisted. Returns `Ok(false)`
    /// when it fails; a `.part` file may then be left behind as an orphan.
    pub async fn put_page_guarded<F>(
        &self,
        id: GalleryId,
        index: usize,
        bytes: Vec<u8>,
        guard: F,
    ) -> CacheResult<bool>
    where
        F: Fn() -> bool,
    {
        let file_name = {
            let metadata = self.open(id).await?;
            let info = metadata.gallery_info.as_ref().ok_or(CacheError::Unresolved(id))?;
            let page = info.pages.get(index).ok_or(CacheError::IndexOutOfRange {
                gallery: id,
                index,
                page_count: info.page_count(),
            })?;
            page.file_name()
        };

        let dir = self.gallery_dir(id);
        let staged = StagedPage {
            part: dir.join(format!("{}{}", file_name, PART_SUFFIX)),
            path: dir.join(&file_name),
        };
        let size = bytes.len();

        // Page files for distinct indices are written without the gallery lock
        let writing = self.slot(id).writes.clone().read_owned().await;
        if !guard() {
            return Ok(false);
        }

        let part = staged.part.clone();
        tokio::task::spawn_blocking(move || {
            let _writing = writing;
            std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            std::fs::write(&part, &bytes).map_err(|e| CacheError::io(&part, e))
        })
        .await
        .map_err(|e| CacheError::io(&staged.part, std::io::Error::other(e)))??;

        let lock = self.lock_record(id).await;

        if !guard() {
            tracing::debug!("Discarding page {} of gallery {}: write no longer wanted", index, id);
            return Ok(false);
        }

        let mut metadata = match lock.as_ref() {
            Some(metadata) => metadata.clone(),
            None => self.load_from_disk(id).await?,
        };

        let list = metadata.image_list.as_mut().ok_or(CacheError::Unresolved(id))?;
        let page_count = list.len();
        let entry = list.get_mut(index).ok_or(CacheError::IndexOutOfRange {
            gallery: id,
            index,
            page_count,
        })?;
        *entry = Some(file_name);
        metadata.updated_at = Some(Utc::now());

        // The mirror only moves forward once the record is durable
        self.persist(id, lock, metadata, Some(staged)).await?;

        tracing::trace!("Stored page {} of gallery {} ({} bytes)", index, id, size);
        Ok(true)
    }

    /// Remove every file of the gallery; no-op when nothing is cached
    pub async fn delete(&self, id: GalleryId) -> CacheResult<()> {
        self.delete_guarded(id, || true).await.map(|_| ())
    }

    /// Remove every file of the gallery if `guard` holds under the gallery lock
    ///
    /// Returns `Ok(false)` without touching the disk when it fails.
    pub async fn delete_guarded<F>(&self, id: GalleryId, guard: F) -> CacheResult<bool>
    where
        F: Fn() -> bool,
    {
        let mut record = self.lock_record(id).await;
        if !guard() {
            return Ok(false);
        }
        let dir = self.gallery_dir(id);

        // Runs to completion under the gallery lock even if the caller goes away
        let removed = tokio::task::spawn_blocking(move || {
            let removed = match std::fs::remove_dir_all(&dir) {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(CacheError::io(dir, e)),
            };
            *record = Some(CacheMetadata::default());
            Ok(removed)
        })
        .await
        .map_err(|e| CacheError::io(self.gallery_dir(id), std::io::Error::other(e)))??;

        if removed {
            tracing::info!("Deleted cache for gallery {}", id);
        }
        Ok(true)
    }

    /// Bytes of the first stored page, or [`PLACEHOLDER_THUMBNAIL`]
    pub async fn thumbnail(&self, id: GalleryId) -> CacheResult<Vec<u8>> {
        let metadata = self.open(id).await?;
        let dir = self.gallery_dir(id);

        for file_name in metadata.referenced_files() {
            let path = dir.join(file_name);
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => tracing::warn!("Cached page {:?} unreadable: {}", path, e),
            }
        }

        Ok(PLACEHOLDER_THUMBNAIL.to_vec())
    }

    /// Delete page files not referenced by the persisted record
    ///
    /// Returns the number of removed files.
    pub async fn prune_orphans(&self, id: GalleryId) -> CacheResult<usize> {
        let slot = self.slot(id);
        let _writes = slot.writes.write().await;
        let mut guard = slot.record.lock().await;

        let metadata = match guard.take() {
            Some(metadata) => metadata,
            None => self.load_from_disk(id).await?,
        };
        *guard = Some(metadata.clone());

        let dir = self.gallery_dir(id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(dir, e)),
        };

        let referenced: Vec<&str> = metadata.referenced_files().collect();
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == METADATA_FILE || referenced.contains(&name) {
                continue;
            }

            let path = entry.path();
            if path.is_file() {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Pruned {} orphaned file(s) from gallery {}", removed, id);
        }
        Ok(removed)
    }

    /// Wait until no page write or metadata persist for the gallery is in progress
    pub async fn barrier(&self, id: GalleryId) {
        let slot = self.slot(id);
        let _writes = slot.writes.write().await;
        let _record = slot.record.lock().await;
    }

    /// Gallery ids that have a cache folder
    pub async fn cached_galleries(&self) -> CacheResult<Vec<GalleryId>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|name| name.parse().ok()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Blocking temp-file-and-rename write of a gallery record
fn write_record(dir: &Path, content: &[u8]) -> CacheResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let temp_path = dir.join(METADATA_TEMP_FILE);
    let path = dir.join(METADATA_FILE);
    std::fs::write(&temp_path, content).map_err(|e| CacheError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, &path).map_err(|e| CacheError::io(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn gallery(id: u32) -> GalleryId {
        GalleryId::new(id).unwrap()
    }

    fn info(id: u32, pages: usize) -> GalleryInfo {
        GalleryInfo::new(
            gallery(id),
            "Cached",
            (0..pages)
                .map(|i| format!("https://cdn.example.com/{}/{}.png", id, i))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_open_missing_gallery_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        let metadata = store.open(gallery(1)).await.unwrap();

        assert_eq!(metadata, CacheMetadata::default());
        assert!(!store.has_folder(gallery(1)));
    }

    #[tokio::test]
    async fn test_put_page_persists_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(10);

        store.attach_info(id, info(10, 2)).await.unwrap();
        store.put_page(id, 1, b"page-one").await.unwrap();

        // A fresh store sees the durable state
        let reopened = CacheStore::new(temp_dir.path());
        let metadata = reopened.open(id).await.unwrap();

        assert_eq!(metadata.image_list, Some(vec![None, Some("1.png".to_string())]));
        assert_eq!(
            std::fs::read(temp_dir.path().join("10").join("1.png")).unwrap(),
            b"page-one"
        );
    }

    #[tokio::test]
    async fn test_put_page_rejects_out_of_range_index() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(2);

        store.attach_info(id, info(2, 1)).await.unwrap();
        let result = store.put_page(id, 4, b"x").await;

        assert!(matches!(result, Err(CacheError::IndexOutOfRange { index: 4, .. })));
    }

    #[tokio::test]
    async fn test_put_page_requires_resolved_info() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        let result = store.put_page(gallery(3), 0, b"x").await;

        assert!(matches!(result, Err(CacheError::Unresolved(_))));
    }

    #[tokio::test]
    async fn test_guarded_put_skips_persist_when_guard_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(4);

        store.attach_info(id, info(4, 1)).await.unwrap();
        let written = store
            .put_page_guarded(id, 0, b"late".to_vec(), || false)
            .await
            .unwrap();

        assert!(!written);
        assert_eq!(store.open(id).await.unwrap().missing(), vec![0]);
    }

    #[tokio::test]
    async fn test_guarded_put_leaves_final_name_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(11);

        store.attach_info(id, info(11, 1)).await.unwrap();
        store.put_page(id, 0, b"stored").await.unwrap();

        // A superseded writer must not clobber the referenced page
        let checks = std::sync::atomic::AtomicUsize::new(0);
        let written = store
            .put_page_guarded(id, 0, b"stale".to_vec(), || {
                checks.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0
            })
            .await
            .unwrap();

        assert!(!written);
        let dir = temp_dir.path().join("11");
        assert_eq!(std::fs::read(dir.join("0.png")).unwrap(), b"stored");
        assert_eq!(std::fs::read(dir.join("0.png.part")).unwrap(), b"stale");

        assert_eq!(store.prune_orphans(id).await.unwrap(), 1);
        assert!(!dir.join("0.png.part").exists());
    }

    #[tokio::test]
    async fn test_guarded_attach_and_delete_skip_when_guard_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(12);

        let attached = store.attach_info_guarded(id, info(12, 2), || false).await.unwrap();
        assert_eq!(attached, None);
        assert!(!store.has_folder(id));

        store.attach_info(id, info(12, 2)).await.unwrap();
        assert!(!store.delete_guarded(id, || false).await.unwrap());
        assert!(store.folder_exists(id).await);

        assert!(store.delete_guarded(id, || true).await.unwrap());
        assert!(!store.folder_exists(id).await);
    }

    #[tokio::test]
    async fn test_concurrent_puts_keep_every_page() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::new(temp_dir.path()));
        let id = gallery(5);

        store.attach_info(id, info(5, 8)).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put_page(id, index, &[index as u8; 16]).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened = CacheStore::new(temp_dir.path());
        assert!(reopened.open(id).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_orphan_page_without_record_stays_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(6);

        store.attach_info(id, info(6, 2)).await.unwrap();
        store.put_page(id, 0, b"kept").await.unwrap();

        // Simulate a crash after the page write but before the record persist
        std::fs::write(temp_dir.path().join("6").join("1.png"), b"orphan").unwrap();
        std::fs::write(temp_dir.path().join("6").join(METADATA_TEMP_FILE), b"{ torn").unwrap();

        let restarted = CacheStore::new(temp_dir.path());
        let metadata = restarted.open(id).await.unwrap();
        assert_eq!(metadata.missing(), vec![1]);

        let removed = restarted.prune_orphans(id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!temp_dir.path().join("6").join("1.png").exists());
        assert!(temp_dir.path().join("6").join("0.png").exists());
    }

    #[tokio::test]
    async fn test_delete_removes_folder_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(7);

        store.attach_info(id, info(7, 1)).await.unwrap();
        store.put_page(id, 0, b"bye").await.unwrap();

        store.delete(id).await.unwrap();
        assert!(!store.has_folder(id));
        assert_eq!(store.open(id).await.unwrap(), CacheMetadata::default());

        store.delete(id).await.unwrap();
        store.delete(gallery(70)).await.unwrap();
        assert!(!store.has_folder(gallery(70)));
    }

    #[tokio::test]
    async fn test_thumbnail_falls_back_to_placeholder() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());
        let id = gallery(8);

        assert_eq!(store.thumbnail(id).await.unwrap(), PLACEHOLDER_THUMBNAIL);

        store.attach_info(id, info(8, 3)).await.unwrap();
        store.put_page(id, 2, b"third").await.unwrap();
        store.put_page(id, 1, b"second").await.unwrap();

        assert_eq!(store.thumbnail(id).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_cached_galleries_lists_folders() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path());

        store.attach_info(gallery(30), info(30, 1)).await.unwrap();
        store.attach_info(gallery(4), info(4, 1)).await.unwrap();
        std::fs::create_dir_all(temp_dir.path().join("not-a-gallery")).unwrap();

        assert_eq!(
            store.cached_galleries().await.unwrap(),
            vec![gallery(4), gallery(30)]
        );
    }
}

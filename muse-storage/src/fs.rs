//! Filesystem storage adapter.
//!
//! Layout, per generation:
//!
//! ```text
//! <root>/<YYYYMMDD_HHMMSS>/
//!     grid_<stamp>.png            grid image
//!     grid_<stamp>.meta.json      grid metadata
//!     prompt_<stamp>.txt          plaintext prompt
//!     variant_<n>_<stamp>.png     upscaled variant n (0..=3)
//!     variant_<n>_<stamp>.meta.json
//!     generation_<stamp>.json     consolidated record
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! readers never observe a half-written artifact.

use crate::error::StorageError;
use crate::{extension_for, ArtifactMeta, ArtifactStore, GenerationRecord, RecordEntry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Stores artifacts under a root directory.
pub struct FilesystemStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on consolidated records; the
    /// four variant appends run concurrently.
    record_lock: Mutex<()>,
}

impl FilesystemStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            record_lock: Mutex::new(()),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load an artifact and its metadata back by storage id.
    pub async fn load(&self, storage_id: &str) -> Result<(Vec<u8>, ArtifactMeta), StorageError> {
        let path = self.root.join(storage_id);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(storage_id.to_string()));
        }

        let bytes = fs::read(&path).await?;
        let meta_bytes = fs::read(meta_path(&path)).await?;
        let meta: ArtifactMeta = serde_json::from_slice(&meta_bytes)?;
        Ok((bytes, meta))
    }

    /// Load a generation's consolidated record.
    pub async fn load_record(
        &self,
        generation_id: &str,
    ) -> Result<GenerationRecord, StorageError> {
        let path = self.record_path(generation_id);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(generation_id.to_string()));
        }
        let bytes = fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn generation_dir(&self, generation_id: &str) -> PathBuf {
        self.root.join(generation_id)
    }

    fn record_path(&self, generation_id: &str) -> PathBuf {
        self.generation_dir(generation_id)
            .join(format!("generation_{generation_id}.json"))
    }

    async fn save_artifact(
        &self,
        file_stem: &str,
        bytes: &[u8],
        meta: &ArtifactMeta,
    ) -> Result<String, StorageError> {
        let dir = self.generation_dir(&meta.generation_id);
        fs::create_dir_all(&dir).await?;

        let file_name = format!("{file_stem}.{}", extension_for(&meta.content_type));
        let image_path = dir.join(&file_name);
        write_atomic(&image_path, bytes).await?;

        let meta_json = serde_json::to_vec_pretty(meta)?;
        write_atomic(&meta_path(&image_path), &meta_json).await?;

        let storage_id = format!("{}/{}", meta.generation_id, file_name);
        debug!(storage_id = %storage_id, size = bytes.len(), "Artifact persisted");
        Ok(storage_id)
    }
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    async fn save_grid(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError> {
        let stamp = &meta.generation_id;
        let storage_id = self
            .save_artifact(&format!("grid_{stamp}"), bytes, meta)
            .await?;

        // The plaintext prompt sits beside the grid.
        let prompt_path = self
            .generation_dir(stamp)
            .join(format!("prompt_{stamp}.txt"));
        write_atomic(&prompt_path, meta.prompt.as_bytes()).await?;

        Ok(storage_id)
    }

    async fn save_upscale(
        &self,
        bytes: &[u8],
        meta: &ArtifactMeta,
    ) -> Result<String, StorageError> {
        let variant = meta
            .variant_index
            .ok_or(StorageError::MissingVariantIndex)?;
        let stamp = &meta.generation_id;
        self.save_artifact(&format!("variant_{variant}_{stamp}"), bytes, meta)
            .await
    }

    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: RecordEntry,
    ) -> Result<(), StorageError> {
        let _guard = self.record_lock.lock().await;

        let dir = self.generation_dir(generation_id);
        fs::create_dir_all(&dir).await?;

        let path = self.record_path(generation_id);
        let mut record = if fs::try_exists(&path).await? {
            let bytes = fs::read(&path).await?;
            serde_json::from_slice(&bytes)?
        } else {
            GenerationRecord {
                generation_id: generation_id.to_string(),
                ..Default::default()
            }
        };

        record.apply(entry);

        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &json).await
    }
}

/// Write `bytes` to a temporary sibling of `path` and rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Metadata sibling of an artifact path: `grid_x.png` -> `grid_x.meta.json`.
fn meta_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("meta.json")
}

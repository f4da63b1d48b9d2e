//! In-memory storage adapter.
//!
//! Deterministic second implementation of [`ArtifactStore`]: everything
//! lives in concurrent maps, nothing touches disk. Used under tests and
//! for ephemeral deployments where artifacts are consumed immediately.

use crate::error::StorageError;
use crate::{ArtifactMeta, ArtifactStore, GenerationRecord, RecordEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Stores artifacts in process memory.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: DashMap<String, (Arc<Vec<u8>>, ArtifactMeta)>,
    records: Mutex<std::collections::HashMap<String, GenerationRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an artifact by storage id.
    pub fn artifact(&self, storage_id: &str) -> Option<(Arc<Vec<u8>>, ArtifactMeta)> {
        self.artifacts
            .get(storage_id)
            .map(|entry| entry.value().clone())
    }

    /// Look up a generation's consolidated record.
    pub fn record(&self, generation_id: &str) -> Option<GenerationRecord> {
        self.records.lock().get(generation_id).cloned()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the store holds no artifacts.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    fn insert(&self, file_stem: &str, bytes: &[u8], meta: &ArtifactMeta) -> String {
        let storage_id = format!(
            "{}/{}.{}",
            meta.generation_id,
            file_stem,
            crate::extension_for(&meta.content_type)
        );
        self.artifacts
            .insert(storage_id.clone(), (Arc::new(bytes.to_vec()), meta.clone()));
        storage_id
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn save_grid(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError> {
        let stamp = &meta.generation_id;
        Ok(self.insert(&format!("grid_{stamp}"), bytes, meta))
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
        Ok(self.insert(&format!("variant_{variant}_{stamp}"), bytes, meta))
    }

    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: RecordEntry,
    ) -> Result<(), StorageError> {
        let mut records = self.records.lock();
        let record = records
            .entry(generation_id.to_string())
            .or_insert_with(|| GenerationRecord {
                generation_id: generation_id.to_string(),
                ..Default::default()
            });
        record.apply(entry);
        Ok(())
    }
}

//! Muse Storage - artifact persistence
#![deny(unsafe_code)]
//!
//! Generated images and their correlation metadata outlive the process;
//! this crate owns that durability. Two adapters share the
//! [`ArtifactStore`] contract: a filesystem store with a strict naming
//! discipline and atomic writes, and an in-memory store used in tests and
//! ephemeral deployments.
//!
//! Every upscale record carries the grid message id it was correlated
//! against; that back-reference is the durable proof that a variant
//! belongs to its grid.

pub mod error;
pub mod fs;
pub mod memory;

pub use error::StorageError;
pub use fs::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use muse_model::Snowflake;
use serde::{Deserialize, Serialize};

/// What kind of artifact a blob is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The 2x2 composite returned for a prompt.
    Grid,
    /// A single upscaled variant.
    Upscale,
}

/// Metadata stored beside every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Timestamp stamp (`YYYYMMDD_HHMMSS`) grouping one generation's
    /// outputs.
    pub generation_id: String,
    /// Grid or upscale.
    pub kind: ArtifactKind,
    /// Zero-based variant index; required for upscales.
    #[serde(default)]
    pub variant_index: Option<u8>,
    /// Message id of the grid this artifact belongs to.
    pub grid_message_id: Snowflake,
    /// The raw prompt.
    pub prompt: String,
    /// Normalized prompt fingerprint.
    pub fingerprint: String,
    /// CDN URL the bytes came from.
    pub source_url: String,
    /// MIME type of the bytes.
    pub content_type: String,
}

/// Grid line of the consolidated generation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridEntry {
    /// Message id of the grid.
    pub grid_message_id: Snowflake,
    /// Storage id returned by `save_grid`.
    pub storage_id: String,
    /// CDN URL of the grid image.
    pub source_url: String,
    /// The raw prompt.
    pub prompt: String,
    /// Normalized prompt fingerprint.
    pub fingerprint: String,
}

/// Variant line of the consolidated generation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantEntry {
    /// Zero-based variant index.
    pub variant_index: u8,
    /// Back-reference to the grid this variant was correlated against.
    pub grid_message_id: Snowflake,
    /// Storage id returned by `save_upscale`.
    pub storage_id: String,
    /// CDN URL of the upscale image.
    pub source_url: String,
}

/// One append to the consolidated generation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "entry")]
pub enum RecordEntry {
    /// The grid arrived.
    Grid(GridEntry),
    /// One upscaled variant resolved.
    Variant(VariantEntry),
}

/// Consolidated record for one generation, rewritten on every append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Timestamp stamp of the generation.
    pub generation_id: String,
    /// The raw prompt.
    #[serde(default)]
    pub prompt: String,
    /// Normalized prompt fingerprint.
    #[serde(default)]
    pub fingerprint: String,
    /// Message id of the grid, once known.
    #[serde(default)]
    pub grid_message_id: Option<Snowflake>,
    /// Grid entry, once saved.
    #[serde(default)]
    pub grid: Option<GridEntry>,
    /// Variant entries in resolution order.
    #[serde(default)]
    pub variants: Vec<VariantEntry>,
}

impl GenerationRecord {
    /// Fold one entry into the record.
    pub fn apply(&mut self, entry: RecordEntry) {
        match entry {
            RecordEntry::Grid(grid) => {
                self.prompt = grid.prompt.clone();
                self.fingerprint = grid.fingerprint.clone();
                self.grid_message_id = Some(grid.grid_message_id);
                self.grid = Some(grid);
            }
            RecordEntry::Variant(variant) => {
                self.variants.retain(|v| v.variant_index != variant.variant_index);
                self.variants.push(variant);
                self.variants.sort_by_key(|v| v.variant_index);
            }
        }
    }
}

/// Persistence contract shared by the storage adapters.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist grid bytes and their metadata. Returns a storage id.
    async fn save_grid(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError>;

    /// Persist upscale bytes and their metadata. The metadata must carry a
    /// variant index and the grid back-reference. Returns a storage id.
    async fn save_upscale(&self, bytes: &[u8], meta: &ArtifactMeta)
        -> Result<String, StorageError>;

    /// Fold one entry into the generation's consolidated record.
    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: RecordEntry,
    ) -> Result<(), StorageError>;
}

/// File extension for a MIME type. The provider serves PNG almost
/// exclusively, so unknown types fall back to `png`.
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

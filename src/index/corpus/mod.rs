
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{SearchHit, VectorIndex, commit_file, stage_file};
use crate::ingest::chunking::{Chunk, ChunkAttributes};
use crate::{ChatError, Result};

/// Contents of the metadata file, joined to the index by position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    pub metadata: Vec<ChunkAttributes>,
    pub texts: Vec<String>,
}

/// Which halves of the persisted corpus exist on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusStatus {
    Missing,
    IndexOnly,
    MetadataOnly,
    Present,
}

impl CorpusStatus {
    #[inline]
    pub fn inspect(index_path: &Path, metadata_path: &Path) -> Self {
        match (index_path.exists(), metadata_path.exists()) {
            (false, false) => Self::Missing,
            (true, false) => Self::IndexOnly,
            (false, true) => Self::MetadataOnly,
            (true, true) => Self::Present,
        }
    }
}

/// The vector index together with its parallel chunk metadata and texts
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusState {
    index: VectorIndex,
    metadata: Vec<ChunkAttributes>,
    texts: Vec<String>,
}

impl CorpusState {
    #[inline]
    pub const fn new(dimension: usize) -> Self {
        Self {
            index: VectorIndex::new(dimension),
            metadata: Vec::new(),
            texts: Vec::new(),
        }
    }

    /// Pair an index with metadata, rejecting mismatched lengths
    #[inline]
    pub fn from_parts(index: VectorIndex, metadata: CorpusMetadata) -> Result<Self> {
        let state = Self {
            index,
            metadata: metadata.metadata,
            texts: metadata.texts,
        };
        state.check_consistency()?;
        Ok(state)
    }

    /// Add a chunk with its embedding, returning the shared id
    #[inline]
    pub fn push(&mut self, chunk: &Chunk, vector: &[f32]) -> Result<usize> {
        self.push_entry(chunk.attributes(), chunk.text.clone(), vector)
    }

    /// Add a raw metadata entry with its embedding. Nothing is recorded when
    /// the vector is rejected.
    #[inline]
    pub fn push_entry(
        &mut self,
        attributes: ChunkAttributes,
        text: String,
        vector: &[f32],
    ) -> Result<usize> {
        let id = self.index.add(vector)?;
        self.metadata.push(attributes);
        self.texts.push(text);
        Ok(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.index.dimension()
    }

    #[inline]
    pub const fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn text(&self, id: usize) -> Option<&str> {
        self.texts.get(id).map(String::as_str)
    }

    #[inline]
    pub fn attributes(&self, id: usize) -> Option<&ChunkAttributes> {
        self.metadata.get(id)
    }

    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, k)
    }

    #[inline]
    pub fn check_consistency(&self) -> Result<()> {
        if self.index.len() != self.metadata.len() || self.metadata.len() != self.texts.len() {
            return Err(ChatError::CorpusStateInconsistent(format!(
                "index has {} vectors, metadata has {} entries and {} texts",
                self.index.len(),
                self.metadata.len(),
                self.texts.len()
            )));
        }
        Ok(())
    }

    /// Persist index and metadata. Both files are staged before either is
    /// renamed into place.
    #[inline]
    pub fn save(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        self.check_consistency()?;

        let metadata = CorpusMetadataRef {
            metadata: &self.metadata,
            texts: &self.texts,
        };
        let metadata_json = serde_json::to_vec_pretty(&metadata)?;

        let staged_index = stage_file(index_path, &self.index.to_bytes())?;
        let staged_metadata = stage_file(metadata_path, &metadata_json)?;

        // Each rename is atomic but the pair is not. A failure between them
        // leaves mismatched files, which `load` reports as inconsistent.
        commit_file(&staged_index, index_path)?;
        commit_file(&staged_metadata, metadata_path)?;

        info!(
            "Saved corpus with {} entries to {} and {}",
            self.len(),
            index_path.display(),
            metadata_path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn load(index_path: &Path, metadata_path: &Path) -> Result<Self> {
        match CorpusStatus::inspect(index_path, metadata_path) {
            CorpusStatus::Missing => {
                return Err(ChatError::CorpusMissing(format!(
                    "no index at {} and no metadata at {}; run `ragchat ingest` first",
                    index_path.display(),
                    metadata_path.display()
                )));
            }
            CorpusStatus::IndexOnly => {
                return Err(ChatError::CorpusStateInconsistent(format!(
                    "index {} exists but metadata {} is missing",
                    index_path.display(),
                    metadata_path.display()
                )));
            }
            CorpusStatus::MetadataOnly => {
                return Err(ChatError::CorpusStateInconsistent(format!(
                    "metadata {} exists but index {} is missing; run `ragchat reindex` to rebuild it",
                    metadata_path.display(),
                    index_path.display()
                )));
            }
            CorpusStatus::Present => {}
        }

        let index = VectorIndex::load(index_path)?;
        let metadata = Self::load_metadata(metadata_path)?;
        let state = Self::from_parts(index, metadata)?;

        debug!("Loaded corpus state with {} entries", state.len());
        Ok(state)
    }

    #[inline]
    pub fn load_metadata(metadata_path: &Path) -> Result<CorpusMetadata> {
        let content = fs::read_to_string(metadata_path)?;
        let metadata: CorpusMetadata = serde_json::from_str(&content)?;

        if metadata.metadata.len() != metadata.texts.len() {
            return Err(ChatError::CorpusStateInconsistent(format!(
                "metadata file has {} entries but {} texts",
                metadata.metadata.len(),
                metadata.texts.len()
            )));
        }

        Ok(metadata)
    }
}

#[derive(Serialize)]
struct CorpusMetadataRef<'a> {
    metadata: &'a [ChunkAttributes],
    texts: &'a [String],
}

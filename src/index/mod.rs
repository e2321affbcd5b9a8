// Exact flat L2 vector index with binary persistence

#[cfg(test)]
mod tests;

pub mod corpus;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{ChatError, Result};

pub use corpus::{CorpusMetadata, CorpusState, CorpusStatus};

const INDEX_MAGIC: &[u8; 8] = b"RGXFLAT1";
const HEADER_LEN: usize = INDEX_MAGIC.len() + 4 + 8;

/// A nearest-neighbour match, `id` is the insertion ordinal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: usize,
    pub distance: f32,
}

/// Exhaustive nearest-neighbour index over vectors of one fixed dimension
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    #[inline]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector and return its id
    #[inline]
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if self.dimension == 0 || vector.len() != self.dimension {
            return Err(ChatError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let id = self.len();
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    #[inline]
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        let start = id.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Return at most `k` entries ordered by ascending L2 distance, ties by id
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(ChatError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, vector)| SearchHit {
                id,
                distance: l2_distance(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits.truncate(k);

        Ok(hits)
    }

    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..INDEX_MAGIC.len()] != INDEX_MAGIC {
            return Err(ChatError::Index("Not a flat index file".to_string()));
        }

        let mut dimension_bytes = [0_u8; 4];
        dimension_bytes.copy_from_slice(&bytes[8..12]);
        let dimension = u32::from_le_bytes(dimension_bytes) as usize;

        let mut count_bytes = [0_u8; 8];
        count_bytes.copy_from_slice(&bytes[12..HEADER_LEN]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| ChatError::Index("Index entry count overflows".to_string()))?;

        let expected = count
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| ChatError::Index("Index size overflows".to_string()))?;
        let payload = &bytes[HEADER_LEN..];

        if payload.len() != expected {
            return Err(ChatError::Index(format!(
                "Index file truncated: expected {} bytes of vectors, found {}",
                expected,
                payload.len()
            )));
        }

        if dimension == 0 && count > 0 {
            return Err(ChatError::Index("Index has zero dimension".to_string()));
        }

        let data = payload
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        Ok(Self { dimension, data })
    }

    /// Write the index to `path` through a temporary sibling file
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let staged = stage_file(path, &self.to_bytes())?;
        commit_file(&staged, path)?;
        debug!("Saved {} vectors to {}", self.len(), path.display());
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            ChatError::Index(format!("Failed to read index {}: {}", path.display(), e))
        })?;
        let index = Self::from_bytes(&bytes)?;
        debug!("Loaded {} vectors from {}", index.len(), path.display());
        Ok(index)
    }
}

/// Euclidean distance between two equal-length vectors
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` next to `path` without touching `path` itself
pub(crate) fn stage_file(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staged = staging_path(path);
    fs::write(&staged, bytes)?;
    Ok(staged)
}

pub(crate) fn commit_file(staged: &Path, path: &Path) -> Result<()> {
    fs::rename(staged, path)?;
    Ok(())
}

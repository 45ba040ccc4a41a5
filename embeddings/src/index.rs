//! Similarity index for fast embedding lookups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{SimilarityResult, normalize, rank_by_distance};

/// An entry in the similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique identifier.
    pub id: String,

    /// The embedding vector (normalized).
    pub embedding: Embedding,

    /// Associated metadata.
    pub metadata: Option<serde_json::Value>,
}

/// A similarity index for fast vector lookups.
///
/// The index stores normalized embeddings and supports nearest-neighbor
/// search by cosine distance. Re-adding an existing ID replaces its entry,
/// which is how revised tools get re-indexed.
pub struct SimilarityIndex {
    /// Stored entries.
    entries: HashMap<String, IndexEntry>,

    /// Expected dimension of embeddings.
    dimension: usize,
}

impl SimilarityIndex {
    /// Create a new similarity index.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimension,
        }
    }

    /// Add an embedding to the index, replacing any entry with the same ID.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        mut embedding: Embedding,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let id = id.into();

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        normalize(&mut embedding);

        let entry = IndexEntry {
            id: id.clone(),
            embedding,
            metadata,
        };

        self.entries.insert(id.clone(), entry);
        debug!("Added embedding to index: {id}");

        Ok(())
    }

    /// Check if an ID exists in the index.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search for the `k` entries closest to the query, ascending by
    /// distance.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SimilarityResult>> {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.clone();
        normalize(&mut query);

        let candidates: Vec<(String, Embedding)> = self
            .entries
            .values()
            .map(|e| (e.id.clone(), e.embedding.clone()))
            .collect();

        let mut results = rank_by_distance(&query, &candidates, k)?;

        // Add metadata to results
        for result in &mut results {
            if let Some(entry) = self.entries.get(&result.id) {
                result.metadata = entry.metadata.clone();
            }
        }

        Ok(results)
    }
}

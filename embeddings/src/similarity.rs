//! Similarity and distance computation for embeddings.
//!
//! The tool store ranks candidates by cosine distance (`1 - cosine
//! similarity`), so a perfect match scores 0.0 and unrelated text scores
//! close to 1.0.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical vectors
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Compute the cosine distance between two embeddings.
///
/// Distance is `1 - cosine_similarity`: 0.0 for identical vectors, 1.0 for
/// orthogonal ones, 2.0 for opposite ones.
pub fn distance(a: &[f32], b: &[f32]) -> Result<f32> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// A similarity search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// ID of the matched item.
    pub id: String,

    /// Cosine distance from the query (lower is closer).
    pub distance: f32,

    /// Additional metadata.
    pub metadata: Option<serde_json::Value>,
}

impl SimilarityResult {
    /// Create a new similarity result.
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
            metadata: None,
        }
    }

    /// Add metadata to the result.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Rank candidates by ascending distance from the query and keep the
/// closest `k`.
///
/// Thresholding is left to the caller; every candidate that shares the
/// query's dimension appears in the ranking.
pub fn rank_by_distance(
    query: &Embedding,
    candidates: &[(String, Embedding)],
    k: usize,
) -> Result<Vec<SimilarityResult>> {
    let mut ranked: Vec<(OrderedFloat<f32>, String)> = Vec::with_capacity(candidates.len());

    for (id, embedding) in candidates {
        let d = distance(query, embedding)?;
        ranked.push((OrderedFloat(d), id.clone()));
    }

    // Sort by distance ascending
    ranked.sort_by(|a, b| a.0.cmp(&b.0));

    let results: Vec<SimilarityResult> = ranked
        .into_iter()
        .take(k)
        .map(|(d, id)| SimilarityResult::new(id, d.0))
        .collect();

    Ok(results)
}

/// Normalize an embedding to unit length.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

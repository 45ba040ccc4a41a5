//! # Toolsmith Embeddings
//!
//! This crate provides embedding generation and similarity search for the
//! toolsmith tool store.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert tool descriptions to dense vectors
//! - **Similarity Search**: Find semantically close tools by distance
//! - **Multiple Providers**: OpenAI-compatible APIs or the offline hash embedder
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Embeddings System                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► SimilarityIndex           │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  OpenAI / HashEmbedder             rank_by_distance            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use index::SimilarityIndex;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashEmbedder, OpenAIProvider,
};
pub use similarity::{SimilarityResult, cosine_similarity, distance};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (varies by model).
pub const DEFAULT_DIMENSION: usize = 1536; // OpenAI text-embedding-3-small

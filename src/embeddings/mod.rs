// Embeddings module
// Chunking of document text and the embedding capability used to vectorise it

pub mod chunking;
pub mod hashing;
pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{Chunk, ChunkBoundary, Chunker, ChunkingConfig, chunk_document, chunk_text};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;

/// Maps text to fixed-length vectors.
///
/// Output order matches input order one-to-one, and the same text always
/// produces the same vector for a given model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model, recorded in the persisted index
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

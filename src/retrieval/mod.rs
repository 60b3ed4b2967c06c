#[cfg(test)]
mod tests;

use tracing::debug;

use crate::Result;
use crate::embeddings::Embedder;
use crate::index::{RetrievalResult, VectorIndex};

pub const DEFAULT_TOP_K: usize = 3;

/// Finds the chunks most relevant to a question
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a VectorIndex,
    top_k: usize,
}

impl<'a> Retriever<'a> {
    #[inline]
    pub fn new(embedder: &'a dyn Embedder, index: &'a VectorIndex, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Embed the question and return the `top_k` nearest chunks
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        let vector = self.embedder.embed(question).await?;
        let result = self.index.query(&vector, self.top_k)?;

        debug!(
            "Retrieved {} chunks for question ({} requested)",
            result.len(),
            self.top_k
        );
        Ok(result)
    }
}

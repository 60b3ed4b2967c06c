
use async_trait::async_trait;
use tracing::debug;

use super::Embedder;
use crate::ollama::OllamaClient;
use crate::{RagError, Result};

/// Embedder backed by an Ollama embedding model
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new<S: Into<String>>(client: OllamaClient, model: S) -> Self {
        Self {
            client,
            model: model.into(),
            dimension: None,
        }
    }

    /// Reject responses whose vectors are not `dimension` long
    #[inline]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    fn check_dimension(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(expected) = self.dimension else {
            return Ok(());
        };
        match vectors.iter().find(|v| v.len() != expected) {
            Some(vector) => Err(RagError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("Model returned no embedding".to_string()))
    }

    #[inline]
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(RagError::Embedding("cannot embed empty text".to_string()));
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let client = self.client.clone();
        let model = self.model.clone();
        let owned = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || client.embed(&model, &owned))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        self.check_dimension(&vectors)?;

        Ok(vectors)
    }
}

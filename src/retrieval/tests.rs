use super::*;
use crate::RagError;
use crate::embeddings::HashingEmbedder;
use crate::embeddings::chunking::{ChunkingConfig, chunk_text};

async fn colors_index(embedder: &HashingEmbedder) -> VectorIndex {
    let mut chunks = chunk_text("sky.txt", "The sky is blue.", &ChunkingConfig::default());
    chunks.extend(chunk_text(
        "grass.txt",
        "Grass is green.",
        &ChunkingConfig::default(),
    ));
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_many(&texts).await.expect("should embed");
    VectorIndex::build(embedder.model_id(), chunks, vectors).expect("should build")
}

#[tokio::test]
async fn most_relevant_chunk_ranks_first() {
    let embedder = HashingEmbedder::new(384);
    let index = colors_index(&embedder).await;

    let result = Retriever::new(&embedder, &index, DEFAULT_TOP_K)
        .retrieve("What color is the sky?")
        .await
        .expect("should retrieve");

    assert_eq!(result.len(), 2);
    assert_eq!(result.hits[0].entry.source, "sky.txt");
}

#[tokio::test]
async fn top_k_bounds_results() {
    let embedder = HashingEmbedder::new(384);
    let index = colors_index(&embedder).await;

    let result = Retriever::new(&embedder, &index, 1)
        .retrieve("green grass")
        .await
        .expect("should retrieve");
    assert_eq!(result.len(), 1);
    assert_eq!(result.hits[0].entry.source, "grass.txt");
}

#[tokio::test]
async fn empty_index_yields_empty_result() {
    let embedder = HashingEmbedder::new(16);
    let index = VectorIndex::new(embedder.model_id());

    let result = Retriever::new(&embedder, &index, 3)
        .retrieve("anything")
        .await
        .expect("should not fail");
    assert!(result.is_empty());
}

#[tokio::test]
async fn dimension_mismatch_surfaces() {
    let built_with = HashingEmbedder::new(8);
    let index = colors_index(&built_with).await;
    let querying_with = HashingEmbedder::new(16);

    assert!(matches!(
        Retriever::new(&querying_with, &index, 3).retrieve("sky").await,
        Err(RagError::DimensionMismatch {
            expected: 8,
            actual: 16
        })
    ));
}

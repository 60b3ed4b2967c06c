// Flat vector index with exact cosine search, persisted as a single JSON file


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::embeddings::chunking::Chunk;
use crate::{RagError, Result};

pub const INDEX_FILE_NAME: &str = "index.json";
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// A chunk stored together with its embedding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// `<source>#<chunk_index>`
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    #[inline]
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: format!("{}#{}", chunk.source, chunk.chunk_index),
            source: chunk.source,
            chunk_index: chunk.chunk_index,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text,
            vector,
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Cosine similarity to the query, higher is better
    pub score: f32,
    pub entry: IndexEntry,
}

/// The top-k hits for a query, most relevant first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    #[inline]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Distinct source documents in ranking order
    #[inline]
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.hits
            .iter()
            .map(|hit| hit.entry.source.as_str())
            .filter(|source| seen.insert(*source))
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    embedding_model: String,
    dimension: Option<usize>,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// In-memory index of embedded chunks
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    embedding_model: String,
    dimension: Option<usize>,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty index for vectors produced by `embedding_model`
    #[inline]
    pub fn new<S: Into<String>>(embedding_model: S) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension: None,
            built_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Build an index from chunks and their embeddings, pairwise
    #[inline]
    pub fn build<S: Into<String>>(
        embedding_model: S,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let mut index = Self::new(embedding_model);
        index.add(
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
                .collect(),
        )?;
        Ok(index)
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Vector length shared by every entry, unknown until the first add
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of distinct source documents
    #[inline]
    pub fn document_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.source.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Append entries. Either every entry is added or none is.
    #[inline]
    pub fn add(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut dimension = self.dimension;
        for entry in &entries {
            if entry.vector.is_empty() {
                return Err(RagError::Index(format!(
                    "Entry {} has an empty vector",
                    entry.id
                )));
            }
            match dimension {
                Some(expected) if expected != entry.vector.len() => {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: entry.vector.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(entry.vector.len()),
            }
        }

        debug!("Adding {} entries to index", entries.len());
        self.dimension = dimension;
        self.entries.extend(entries);
        Ok(())
    }

    /// Return the `k` entries most similar to `vector`.
    ///
    /// # Arguments
    /// * `vector` - Query embedding, must match the index dimension
    /// * `k` - Maximum number of hits
    ///
    /// # Returns
    /// * `Result<RetrievalResult>` - Hits by descending cosine similarity;
    ///   equal scores keep insertion order. An empty index yields no hits.
    #[inline]
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        let Some(expected) = self.dimension.filter(|_| !self.entries.is_empty()) else {
            return Ok(RetrievalResult::default());
        };
        if vector.len() != expected {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let query_norm = norm(vector);
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(vector, query_norm, &entry.vector), entry))
            .collect();

        // `sort_by` is stable, which keeps ties in insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(RetrievalResult {
            hits: scored
                .into_iter()
                .map(|(score, entry)| RetrievedChunk {
                    score,
                    entry: entry.clone(),
                })
                .collect(),
        })
    }

    /// Path of the index file inside `dir`
    #[inline]
    pub fn file_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE_NAME)
    }

    #[inline]
    pub fn exists(dir: &Path) -> bool {
        Self::file_path(dir).is_file()
    }

    /// Write the index to `dir`, replacing any previous file atomically
    #[inline]
    pub fn persist(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| {
            RagError::Index(format!(
                "Failed to create index directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let staged = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| RagError::Index(format!("Failed to create temporary index file: {}", e)))?;

        let file = IndexFile {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            built_at: self.built_at,
            entries: self.entries.clone(),
        };

        let mut writer = BufWriter::new(staged.as_file());
        serde_json::to_writer(&mut writer, &file)
            .map_err(|e| RagError::Index(format!("Failed to serialize index: {}", e)))?;
        writer
            .flush()
            .map_err(|e| RagError::Index(format!("Failed to write index: {}", e)))?;
        drop(writer);

        staged
            .as_file()
            .sync_all()
            .map_err(|e| RagError::Index(format!("Failed to sync index: {}", e)))?;

        let path = Self::file_path(dir);
        staged.persist(&path).map_err(|e| {
            RagError::Index(format!("Failed to move index into {}: {}", path.display(), e))
        })?;

        info!(
            "Persisted index with {} entries to {}",
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Read a persisted index, validating its header against every entry
    #[inline]
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::file_path(dir);
        let file = fs::File::open(&path).map_err(|e| {
            RagError::Index(format!("Failed to open index {}: {}", path.display(), e))
        })?;

        let file: IndexFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            RagError::Index(format!("Index {} is corrupt: {}", path.display(), e))
        })?;

        if file.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::Index(format!(
                "Unsupported index format version {} (expected {})",
                file.format_version, INDEX_FORMAT_VERSION
            )));
        }

        match file.dimension {
            Some(expected) => {
                if let Some(entry) = file.entries.iter().find(|e| e.vector.len() != expected) {
                    return Err(RagError::Index(format!(
                        "Entry {} has dimension {} but the index header says {}",
                        entry.id,
                        entry.vector.len(),
                        expected
                    )));
                }
            }
            None if !file.entries.is_empty() => {
                return Err(RagError::Index(
                    "Index has entries but no dimension".to_string(),
                ));
            }
            None => {}
        }

        debug!(
            "Loaded index with {} entries from {}",
            file.entries.len(),
            path.display()
        );

        Ok(Self {
            embedding_model: file.embedding_model,
            dimension: file.dimension,
            built_at: file.built_at,
            entries: file.entries,
        })
    }

    /// Delete the persisted index in `dir`, if any
    #[inline]
    pub fn remove(dir: &Path) -> Result<()> {
        let path = Self::file_path(dir);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed persisted index {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove index {}: {}", path.display(), e);
                Err(RagError::Index(format!(
                    "Failed to remove index {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    let other_norm = norm(other);
    if query_norm == 0.0 || other_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(other).map(|(a, b)| a * b).sum();
    dot / (query_norm * other_norm)
}

// Pipeline: ties ingestion, retrieval and generation together behind a small
// state machine that can be shared across tasks


use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::{Config, EmbeddingProvider};
use crate::documents::{DocumentSource, SkippedDocument};
use crate::embeddings::chunking::{Chunk, Chunker, ChunkingConfig};
use crate::embeddings::{Embedder, HashingEmbedder, OllamaEmbedder};
use crate::generation::{GenerationStream, Generator, OllamaGenerator};
use crate::index::{RetrievalResult, VectorIndex};
use crate::ollama::OllamaClient;
use crate::prompt::PromptAssembler;
use crate::retrieval::Retriever;
use crate::{RagError, Result};

const CANCELLED_REASON: &str = "indexing was cancelled";

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Uninitialized,
    Indexing,
    Ready,
    Failed,
}

impl fmt::Display for PipelineStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Indexing => write!(f, "indexing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
enum PipelineState {
    Uninitialized,
    /// `previous` keeps serving questions while a rebuild runs
    Indexing {
        previous: Option<Arc<VectorIndex>>,
    },
    Ready(Arc<VectorIndex>),
    Failed {
        reason: String,
    },
}

impl PipelineState {
    fn status(&self) -> PipelineStatus {
        match self {
            Self::Uninitialized => PipelineStatus::Uninitialized,
            Self::Indexing { .. } => PipelineStatus::Indexing,
            Self::Ready(_) => PipelineStatus::Ready,
            Self::Failed { .. } => PipelineStatus::Failed,
        }
    }

    fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        match self {
            Self::Ready(index)
            | Self::Indexing {
                previous: Some(index),
            } => Some(Arc::clone(index)),
            _ => None,
        }
    }
}

/// Everything the pipeline needs besides its capabilities
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub documents: DocumentSource,
    pub index_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub prompt: PromptAssembler,
}

impl PipelineSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            documents: DocumentSource::new(config.documents_path()),
            index_dir: config.index_path(),
            chunking: config.chunking.clone(),
            top_k: config.retrieval.top_k,
            prompt: config.retrieval.prompt_assembler()?,
        })
    }
}

/// How an indexing call reached `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// The pipeline was already ready; nothing was done
    AlreadyReady,
    /// A persisted index was loaded from disk
    Loaded,
    /// Documents were chunked and embedded from scratch
    Built,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub origin: IndexOrigin,
    pub document_count: usize,
    pub chunk_count: usize,
    /// Documents that could not be extracted during a build
    pub skipped: Vec<SkippedDocument>,
}

impl IngestionReport {
    fn for_index(origin: IndexOrigin, index: &VectorIndex) -> Self {
        Self {
            origin,
            document_count: index.document_count(),
            chunk_count: index.len(),
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub status: PipelineStatus,
    pub document_count: usize,
    pub chunk_count: usize,
    pub model_identifier: String,
    pub embedding_model_identifier: String,
    /// When the index being served was built, `None` until one is loaded
    pub index_built_at: Option<DateTime<Utc>>,
}

/// A generated answer with the chunks it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: RetrievalResult,
}

/// Sources are known up front; the text arrives through `stream`
#[derive(Debug)]
pub struct StreamingAnswer {
    pub sources: RetrievalResult,
    pub stream: GenerationStream,
}

/// Marks the pipeline `Indexing` and guarantees it leaves that state.
///
/// If the owning future is dropped before `finish` the state becomes `Failed`.
struct Transition<'a> {
    state: &'a RwLock<PipelineState>,
    finished: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a RwLock<PipelineState>, previous: Option<Arc<VectorIndex>>) -> Self {
        *state.write().unwrap_or_else(PoisonError::into_inner) =
            PipelineState::Indexing { previous };
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self, next: PipelineState) {
        debug!("Pipeline transition finished: {}", next.status());
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.finished = true;
    }

    fn fail(self, reason: String) {
        warn!("Indexing failed: {}", reason);
        self.finish(PipelineState::Failed { reason });
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Indexing interrupted before completion");
            *self.state.write().unwrap_or_else(PoisonError::into_inner) = PipelineState::Failed {
                reason: CANCELLED_REASON.to_string(),
            };
        }
    }
}

/// The question-answering pipeline.
///
/// Cheap to share behind an `Arc`: questions only take the state lock long
/// enough to clone the current index snapshot, and at most one indexing
/// transition runs at a time.
pub struct Pipeline {
    settings: PipelineSettings,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    state: RwLock<PipelineState>,
    indexing: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Pipeline {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("embedder", &self.embedder.model_id())
            .field("generator", &self.generator.model_id())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[inline]
    pub fn new(
        settings: PipelineSettings,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            settings,
            embedder,
            generator,
            state: RwLock::new(PipelineState::Uninitialized),
            indexing: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a pipeline with the Ollama generator and the configured embedder
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let client = OllamaClient::new(&config.ollama)?;
        let embedder: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProvider::Ollama => Arc::new(
                OllamaEmbedder::new(client.clone(), &config.embedding.model)
                    .with_dimension(config.embedding.dimension),
            ),
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
        };
        let generator = OllamaGenerator::new(client, &config.generation.model)
            .with_idle_timeout(config.generation.stream_idle_timeout());

        Ok(Self::new(
            PipelineSettings::from_config(config)?,
            embedder,
            Arc::new(generator),
        ))
    }

    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    pub fn status(&self) -> PipelineStatus {
        self.read_state().status()
    }

    /// Why the last indexing attempt failed, while the pipeline is `Failed`
    #[inline]
    pub fn failure_reason(&self) -> Option<String> {
        let state = self.read_state();
        match &*state {
            PipelineState::Failed { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PipelineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The index questions are answered against, if any
    fn snapshot(&self) -> Result<Arc<VectorIndex>> {
        let state = self.read_state();
        state
            .snapshot()
            .ok_or_else(|| RagError::NotInitialized {
                status: state.status(),
            })
    }

    /// Bring the pipeline to `Ready`.
    ///
    /// Loads the persisted index when one exists, otherwise ingests every
    /// document. Calling this on a ready pipeline does nothing.
    #[inline]
    pub async fn initialize(&self) -> Result<IngestionReport> {
        let _indexing = self
            .indexing
            .try_lock()
            .map_err(|_| RagError::IndexingInProgress)?;

        if let Ok(index) = self.snapshot() {
            debug!("Pipeline already initialized");
            return Ok(IngestionReport::for_index(IndexOrigin::AlreadyReady, &index));
        }

        let transition = Transition::begin(&self.state, None);

        if VectorIndex::exists(&self.settings.index_dir) {
            return self.load_persisted(transition);
        }

        self.ingest(transition).await
    }

    /// Throw away the persisted index and rebuild from the documents.
    ///
    /// Questions keep being answered from the previous index until the new
    /// one replaces it.
    #[inline]
    pub async fn reingest(&self) -> Result<IngestionReport> {
        let _indexing = self
            .indexing
            .try_lock()
            .map_err(|_| RagError::IndexingInProgress)?;

        let previous = self.snapshot().ok();
        let transition = Transition::begin(&self.state, previous);

        info!("Re-ingesting documents from scratch");
        if let Err(e) = VectorIndex::remove(&self.settings.index_dir) {
            transition.fail(e.to_string());
            return Err(e);
        }

        self.ingest(transition).await
    }

    fn load_persisted(&self, transition: Transition<'_>) -> Result<IngestionReport> {
        let index = match VectorIndex::load(&self.settings.index_dir) {
            Ok(index) => index,
            Err(e) => {
                transition.fail(e.to_string());
                return Err(e);
            }
        };

        if index.embedding_model() != self.embedder.model_id() {
            let error = RagError::EmbeddingModelMismatch {
                index: index.embedding_model().to_string(),
                configured: self.embedder.model_id().to_string(),
            };
            transition.fail(error.to_string());
            return Err(error);
        }

        info!(
            "Loaded persisted index with {} chunks from {} documents",
            index.len(),
            index.document_count()
        );
        let report = IngestionReport::for_index(IndexOrigin::Loaded, &index);
        transition.finish(PipelineState::Ready(Arc::new(index)));
        Ok(report)
    }

    async fn ingest(&self, transition: Transition<'_>) -> Result<IngestionReport> {
        match self.build_index().await {
            Ok((index, skipped)) => {
                let report = IngestionReport {
                    skipped,
                    ..IngestionReport::for_index(IndexOrigin::Built, &index)
                };
                info!(
                    "Indexed {} chunks from {} documents ({} skipped)",
                    report.chunk_count,
                    report.document_count,
                    report.skipped.len()
                );
                transition.finish(PipelineState::Ready(Arc::new(index)));
                Ok(report)
            }
            Err(e @ RagError::NoDocuments { .. }) => {
                warn!("{}", e);
                transition.finish(PipelineState::Uninitialized);
                Err(e)
            }
            Err(e) => {
                transition.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn build_index(&self) -> Result<(VectorIndex, Vec<SkippedDocument>)> {
        let documents = self.settings.documents.clone();
        let report = tokio::task::spawn_blocking(move || documents.load_all())
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("Document loading task failed: {}", e)))?;

        let chunker = Chunker::new(self.settings.chunking.clone());
        let chunks: Vec<Chunk> = report
            .documents
            .iter()
            .flat_map(|document| chunker.split(document))
            .filter(|chunk| !chunk.text.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            return Err(RagError::NoDocuments {
                path: self.settings.documents.root().display().to_string(),
            });
        }

        debug!(
            "Embedding {} chunks from {} documents",
            chunks.len(),
            report.documents.len()
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_many(&texts).await?;
        let index = VectorIndex::build(self.embedder.model_id(), chunks, vectors)?;
        index.persist(&self.settings.index_dir)?;

        Ok((index, report.skipped))
    }

    fn validate_question(question: &str) -> Result<&str> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuestion);
        }
        Ok(question)
    }

    async fn retrieve(&self, question: &str) -> Result<(RetrievalResult, String)> {
        let index = self.snapshot()?;
        let sources = Retriever::new(self.embedder.as_ref(), &index, self.settings.top_k)
            .retrieve(question)
            .await?;
        let prompt = self.settings.prompt.assemble(&sources, question);
        Ok((sources, prompt))
    }

    /// Answer a question from the indexed documents
    #[inline]
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = Self::validate_question(question)?;
        let (sources, prompt) = self.retrieve(question).await?;

        let text = self.generator.generate(&prompt).await?;
        Ok(Answer { text, sources })
    }

    /// Like [`Pipeline::ask`], but the answer text is streamed
    #[inline]
    pub async fn ask_stream(&self, question: &str) -> Result<StreamingAnswer> {
        let question = Self::validate_question(question)?;
        let (sources, prompt) = self.retrieve(question).await?;

        let stream = self.generator.generate_stream(&prompt).await?;
        Ok(StreamingAnswer { sources, stream })
    }

    #[inline]
    pub fn stats(&self) -> PipelineStats {
        let (status, snapshot) = {
            let state = self.read_state();
            (state.status(), state.snapshot())
        };

        PipelineStats {
            status,
            document_count: snapshot.as_ref().map_or(0, |index| index.document_count()),
            chunk_count: snapshot.as_ref().map_or(0, |index| index.len()),
            model_identifier: self.generator.model_id().to_string(),
            embedding_model_identifier: self.embedder.model_id().to_string(),
            index_built_at: snapshot.as_ref().map(|index| index.built_at()),
        }
    }
}

// Text generation capability and the cancellable fragment stream it produces


use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ollama::{GenerateChunk, GenerateChunkDecoder, OllamaClient};
use crate::{RagError, Result};

/// Fragments buffered between a producer and a slow consumer
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

pub type FragmentSender = mpsc::Sender<Result<String>>;

/// Lazy, single-pass sequence of generated text fragments.
///
/// The producer waits once the bounded channel is full, so a consumer that
/// stops reading applies backpressure. Cancelling or dropping the stream
/// closes the channel and the producer stops, even while it is waiting on
/// the model.
#[derive(Debug)]
pub struct GenerationStream {
    receiver: mpsc::Receiver<Result<String>>,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl GenerationStream {
    /// Create a stream and the sender feeding it
    #[inline]
    pub fn channel(capacity: usize, idle_timeout: Option<Duration>) -> (FragmentSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            sender,
            Self {
                receiver,
                idle_timeout,
                finished: false,
            },
        )
    }

    /// A stream that yields `fragments` and then ends
    #[inline]
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let fragments: Vec<String> = fragments.into_iter().collect();
        let (sender, stream) = Self::channel(fragments.len(), None);
        for fragment in fragments {
            // Capacity covers every fragment, so this cannot fill up.
            if sender.try_send(Ok(fragment)).is_err() {
                break;
            }
        }
        stream
    }

    /// Wait for the next fragment.
    ///
    /// Returns `None` once the model has finished. An error ends the stream.
    #[inline]
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }

        let item = match self.idle_timeout {
            Some(idle) => {
                if let Ok(item) = tokio::time::timeout(idle, self.receiver.recv()).await {
                    item
                } else {
                    warn!("No fragment received within {:?}", idle);
                    self.cancel();
                    return Some(Err(RagError::Timeout {
                        operation: "waiting for the next generated fragment".to_string(),
                    }));
                }
            }
            None => self.receiver.recv().await,
        };

        match item {
            Some(Ok(fragment)) => Some(Ok(fragment)),
            Some(Err(e)) => {
                self.cancel();
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Stop consuming; the producer is told to stop and nothing more is yielded
    #[inline]
    pub fn cancel(&mut self) {
        if !self.finished {
            debug!("Generation stream cancelled");
        }
        self.finished = true;
        self.receiver.close();
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream into one string, failing on the first error
    #[inline]
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

/// Produces text from a prompt
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    /// Generate the complete answer
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Start generating and return the fragments as they arrive
    async fn generate_stream(&self, prompt: &str) -> Result<GenerationStream>;
}

/// Generator backed by an Ollama language model
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    idle_timeout: Option<Duration>,
}

impl OllamaGenerator {
    #[inline]
    pub fn new<S: Into<String>>(client: OllamaClient, model: S) -> Self {
        Self {
            client,
            model: model.into(),
            idle_timeout: None,
        }
    }

    /// Fail a stream that goes `idle` without producing a fragment
    #[inline]
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = self.client.clone();
        let model = self.model.clone();
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || client.generate(&model, &prompt))
            .await
            .map_err(|e| RagError::Generation(format!("Generation task failed: {}", e)))?
            .map_err(|e| RagError::Generation(format!("{:#}", e)))
    }

    #[inline]
    async fn generate_stream(&self, prompt: &str) -> Result<GenerationStream> {
        // Connection and HTTP errors surface here rather than as the first fragment.
        let response = self
            .client
            .generate_stream(&self.model, prompt)
            .await
            .map_err(|e| RagError::Generation(format!("{:#}", e)))?;

        let (sender, stream) = GenerationStream::channel(STREAM_CHANNEL_CAPACITY, self.idle_timeout);
        tokio::spawn(forward_fragments(response, self.model.clone(), sender));

        Ok(stream)
    }
}

/// Decode the NDJSON body and forward each fragment until the model is done.
///
/// Returns as soon as the consumer goes away, even mid-read; dropping the
/// body closes the connection to the model server.
async fn forward_fragments(response: reqwest::Response, model: String, sender: FragmentSender) {
    let mut body = response.bytes_stream();
    let mut decoder = GenerateChunkDecoder::default();

    loop {
        let next = tokio::select! {
            () = sender.closed() => {
                debug!("Consumer went away, closing generation stream");
                return;
            }
            next = body.next() => next,
        };

        let ended = next.is_none();
        let chunks = match next {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                let _ = sender
                    .send(Err(RagError::Generation(format!(
                        "Failed to read generation stream: {}",
                        e
                    ))))
                    .await;
                return;
            }
            None => decoder.finish().into_iter().collect(),
        };

        for chunk in chunks {
            if !forward_chunk(&sender, &model, chunk).await {
                return;
            }
        }

        if ended {
            break;
        }
    }

    let _ = sender
        .send(Err(RagError::Generation(
            "Stream ended before the model signalled completion".to_string(),
        )))
        .await;
}

/// Returns `false` once nothing more should be sent
async fn forward_chunk(
    sender: &FragmentSender,
    model: &str,
    chunk: anyhow::Result<GenerateChunk>,
) -> bool {
    match chunk {
        Ok(chunk) => {
            if !chunk.response.is_empty() && sender.send(Ok(chunk.response)).await.is_err() {
                debug!("Consumer went away, closing generation stream");
                return false;
            }
            if chunk.done {
                debug!("Model {} finished streaming", model);
                return false;
            }
            true
        }
        Err(e) => {
            let _ = sender
                .send(Err(RagError::Generation(format!("{:#}", e))))
                .await;
            false
        }
    }
}

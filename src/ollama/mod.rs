#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// HTTP client for the Ollama embedding and generation APIs.
///
/// Complete requests are blocking; streamed generation is async so that an
/// abandoned stream can drop its connection.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    batch_size: u32,
    timeout: Duration,
    agent: ureq::Agent,
    stream_client: reqwest::Client,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One object of a `/api/generate` response; streaming sends one per line
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;
        let timeout = config.timeout();

        Ok(Self {
            base_url,
            batch_size: config.batch_size.max(1),
            timeout,
            agent: Self::build_agent(timeout),
            stream_client: reqwest::Client::builder()
                .build()
                .context("Failed to build streaming HTTP client")?,
            retry_attempts: match config.retry_attempts {
                0 => DEFAULT_RETRY_ATTEMPTS,
                attempts => attempts,
            },
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self, models: &[&str]) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;

        for model in models {
            self.validate_model(model)
                .with_context(|| format!("Model validation failed for {}", model))?;
        }

        info!(
            "Health check passed for Ollama server at {} with models {:?}",
            self.base_url, models
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/version")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        Ok(())
    }

    /// Validate that a model is available, accepting names without a tag
    #[inline]
    pub fn validate_model(&self, model: &str) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        let wanted = model.strip_suffix(":latest").unwrap_or(model);
        if models
            .iter()
            .any(|m| m.name == model || m.name.strip_suffix(":latest") == Some(wanted))
        {
            debug!("Model {} is available", model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                model, available_models
            );
            Err(anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed `texts` in order, splitting the work into `batch_size` requests
    #[inline]
    pub fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let batch_embeddings = self
                .embed_single_batch(model, batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            embeddings.extend(batch_embeddings);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }

    fn embed_single_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// Generate a complete response for `prompt`
    #[inline]
    pub fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        let request_json = serde_json::to_string(&GenerateRequest {
            model,
            prompt,
            stream: false,
        })
        .context("Failed to serialize generate request")?;

        debug!(
            "Generating with model {} (prompt length: {})",
            model,
            prompt.len()
        );

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate response")?;

        let chunk: GenerateChunk = serde_json::from_str(&response_text)
            .context("Failed to parse generate response")?;

        if let Some(message) = chunk.error {
            return Err(anyhow!("Model returned an error: {}", message));
        }

        Ok(chunk.response)
    }

    /// Start a streaming generation and return the response once its head arrives.
    ///
    /// Connecting and waiting for the head are bounded by the client timeout.
    /// The NDJSON body is left to the caller; dropping the response closes
    /// the connection.
    #[inline]
    pub async fn generate_stream(&self, model: &str, prompt: &str) -> Result<reqwest::Response> {
        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
        };

        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Streaming request attempt {}/{}",
                attempt, self.retry_attempts
            );

            let sent = tokio::time::timeout(
                self.timeout,
                self.stream_client.post(url.as_str()).json(&request).send(),
            )
            .await;

            let error = match sent {
                Err(_) => {
                    warn!("Streaming request timed out after {:?}", self.timeout);
                    return Err(anyhow!(
                        "Request timed out after {:?} waiting for the response",
                        self.timeout
                    ));
                }
                Ok(Ok(response)) if response.status().is_success() => return Ok(response),
                Ok(Ok(response)) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    anyhow!("Server error: HTTP {}", status)
                }
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow!("Client error: HTTP {}", status));
                }
                Ok(Err(e)) if e.is_connect() || e.is_request() => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        e, attempt, self.retry_attempts
                    );
                    anyhow!("Request error: {}", e)
                }
                Ok(Err(e)) => {
                    warn!("Non-retryable error: {}", e);
                    return Err(anyhow!("Non-retryable error: {}", e));
                }
            };

            last_error = Some(error);

            if attempt < self.retry_attempts {
                let delay = backoff_delay(attempt);
                debug!("Waiting {:?} before retry", delay);
                tokio::time::sleep(delay).await;
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }

    fn make_request_with_retry<T, F>(&self, mut request_fn: F) -> Result<T>
    where
        F: FnMut() -> Result<T, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        ureq::Error::Timeout(_) => {
                            warn!("Request timed out after {:?}", self.timeout);
                            return Err(anyhow!("Request timed out: {}", error));
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = backoff_delay(attempt);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(EXPONENTIAL_BACKOFF_BASE.pow(attempt.saturating_sub(1)) * 1000)
}

/// Splits a streamed `/api/generate` body into chunks, one per JSON line.
///
/// Bytes may arrive cut anywhere, including inside a line or a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct GenerateChunkDecoder {
    pending: Vec<u8>,
}

impl GenerateChunkDecoder {
    /// Feed the next piece of the body and return every line it completes
    #[inline]
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<GenerateChunk>> {
        self.pending.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(chunk) = parse_line(&line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Parse an unterminated last line once the body has ended
    #[inline]
    pub fn finish(&mut self) -> Option<Result<GenerateChunk>> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<Result<GenerateChunk>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let chunk = serde_json::from_str::<GenerateChunk>(line)
        .with_context(|| format!("Failed to parse stream line: {}", line));

    Some(match chunk {
        Ok(GenerateChunk {
            error: Some(message),
            ..
        }) => Err(anyhow!("Model returned an error: {}", message)),
        other => other,
    })
}

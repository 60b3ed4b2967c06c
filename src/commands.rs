use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

use crate::RagError;
use crate::config::{Config, EmbeddingProvider};
use crate::index::{RetrievalResult, VectorIndex};
use crate::ollama::OllamaClient;
use crate::pipeline::{IndexOrigin, IngestionReport, Pipeline, PipelineStatus};

/// Characters of chunk text shown under each source
const EXCERPT_CHARS: usize = 200;

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Build a pipeline from a loaded configuration
#[inline]
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    debug!(
        "Using documents from {} and index at {}",
        config.documents_path().display(),
        config.index_path().display()
    );
    Pipeline::from_config(config).context("Failed to set up pipeline")
}

/// Models a command needs from the server; answering also needs the generation model
fn required_models(config: &Config, answering: bool) -> Vec<String> {
    let mut models = Vec::new();
    if config.embedding.provider == EmbeddingProvider::Ollama {
        models.push(config.embedding.model.clone());
    }
    if answering {
        models.push(config.generation.model.clone());
    }
    models
}

/// Fail early when Ollama is unreachable or lacks a model the command needs
#[inline]
pub async fn check_models(config: &Config, answering: bool) -> Result<()> {
    let models = required_models(config, answering);
    if models.is_empty() {
        return Ok(());
    }

    let client = OllamaClient::new(&config.ollama).context("Failed to set up Ollama client")?;
    let server = client.base_url().to_string();

    let bar = spinner("Checking Ollama");
    let result = tokio::task::spawn_blocking(move || {
        let models: Vec<&str> = models.iter().map(String::as_str).collect();
        client.health_check(&models)
    })
    .await;
    bar.finish_and_clear();

    result.context("Health check task failed")?.with_context(|| {
        format!(
            "Ollama at {} is not ready (hint: start it with `ollama serve` and fetch models with `ollama pull`)",
            server
        )
    })
}

/// Make the pipeline ready, loading or building the index as needed
#[inline]
pub async fn initialize_index(pipeline: &Pipeline) -> Result<IngestionReport> {
    let bar = spinner("Preparing document index");
    let result = pipeline.initialize().await;
    bar.finish_and_clear();

    let report = result.map_err(explain)?;
    print_report(&report);
    Ok(report)
}

/// Rebuild the index from scratch
#[inline]
pub async fn reingest_documents(pipeline: &Pipeline) -> Result<IngestionReport> {
    let bar = spinner("Re-ingesting documents");
    let result = pipeline.reingest().await;
    bar.finish_and_clear();

    let report = result.map_err(explain)?;
    print_report(&report);
    Ok(report)
}

/// Answer one question, streaming the text when `stream` is set
#[inline]
pub async fn ask_question(pipeline: &Pipeline, question: &str, stream: bool) -> Result<()> {
    if stream {
        let mut answer = pipeline.ask_stream(question).await.map_err(explain)?;

        let mut stdout = std::io::stdout();
        while let Some(fragment) = answer.stream.next_fragment().await {
            write!(stdout, "{}", fragment.map_err(explain)?)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;

        print_sources(&answer.sources);
    } else {
        let bar = spinner("Thinking");
        let result = pipeline.ask(question).await;
        bar.finish_and_clear();

        let answer = result.map_err(explain)?;
        println!("{}", answer.text);
        print_sources(&answer.sources);
    }

    Ok(())
}

/// Interactive question loop until the user quits
#[inline]
pub async fn run_chat(pipeline: &Pipeline, stream: bool) -> Result<()> {
    eprintln!(
        "{}",
        style("💬 Ask questions about your documents").bold().cyan()
    );
    eprintln!(
        "Type {} to see index statistics or {} to leave.",
        style("stats").yellow(),
        style("quit").yellow()
    );
    eprintln!();

    loop {
        let line: String = Input::new()
            .with_prompt("Question")
            .allow_empty(true)
            .interact_text()?;

        match line.trim() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "stats" => show_stats(pipeline),
            question => {
                if let Err(e) = ask_question(pipeline, question, stream).await {
                    warn!("Question failed: {:#}", e);
                    eprintln!("{} {:#}", style("✗").red(), e);
                }
            }
        }
        eprintln!();
    }

    Ok(())
}

/// Print pipeline statistics, loading a persisted index first when present
#[inline]
pub async fn show_index_stats(pipeline: &Pipeline) -> Result<()> {
    if VectorIndex::exists(&pipeline.settings().index_dir) {
        if let Err(e) = pipeline.initialize().await {
            eprintln!(
                "{} Could not load index: {}",
                style("⚠").yellow(),
                e
            );
        }
    }
    show_stats(pipeline);
    Ok(())
}

fn show_stats(pipeline: &Pipeline) {
    let stats = pipeline.stats();

    eprintln!("{}", style("📊 Pipeline Status").bold().cyan());
    let status = match stats.status {
        PipelineStatus::Ready => style(stats.status.to_string()).green(),
        PipelineStatus::Indexing => style(stats.status.to_string()).yellow(),
        PipelineStatus::Uninitialized | PipelineStatus::Failed => {
            style(stats.status.to_string()).red()
        }
    };
    eprintln!("  Status: {}", status);
    if let Some(reason) = pipeline.failure_reason() {
        eprintln!("  Reason: {}", style(reason).red());
    }
    eprintln!("  Documents: {}", style(stats.document_count).cyan());
    eprintln!("  Chunks: {}", style(stats.chunk_count).cyan());
    eprintln!("  Generation model: {}", style(&stats.model_identifier).cyan());
    eprintln!(
        "  Embedding model: {}",
        style(&stats.embedding_model_identifier).cyan()
    );
    if let Some(built_at) = stats.index_built_at {
        eprintln!(
            "  Index built: {}",
            style(built_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
        );
    }
    eprintln!(
        "  Documents directory: {}",
        style(pipeline.settings().documents.root().display()).dim()
    );
}

fn print_report(report: &IngestionReport) {
    match report.origin {
        IndexOrigin::AlreadyReady => {}
        IndexOrigin::Loaded => eprintln!(
            "{} Loaded index: {} chunks from {} documents",
            style("✓").green(),
            report.chunk_count,
            report.document_count
        ),
        IndexOrigin::Built => eprintln!(
            "{} Indexed {} chunks from {} documents",
            style("✓").green(),
            report.chunk_count,
            report.document_count
        ),
    }

    for skipped in &report.skipped {
        eprintln!(
            "{} Skipped {}: {}",
            style("⚠").yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }
}

fn print_sources(sources: &RetrievalResult) {
    if sources.is_empty() {
        return;
    }

    eprintln!();
    eprintln!("{}", style("Relevant excerpts:").bold());
    for (rank, hit) in sources.hits.iter().enumerate() {
        eprintln!(
            "  [{}] {} {}",
            rank + 1,
            style(&hit.entry.source).cyan(),
            style(format!(
                "(chunk {}, score {:.3})",
                hit.entry.chunk_index, hit.score
            ))
            .dim()
        );
        eprintln!("      {}", style(excerpt(&hit.entry.text, EXCERPT_CHARS)).dim());
    }
}

/// The first `max_chars` characters of `text` on a single line
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut short: String = flat.chars().take(max_chars).collect();
    if short.len() < flat.len() {
        short.push('…');
    }
    short
}

/// Attach a hint for the errors a user can act on
fn explain(error: RagError) -> anyhow::Error {
    let hint = match &error {
        RagError::NoDocuments { .. } => Some("add .pdf or .txt files and run `init` again"),
        RagError::EmbeddingModelMismatch { .. } => Some("run `reingest` to rebuild the index"),
        RagError::NotInitialized { .. } => Some("run `init` first"),
        RagError::IndexingInProgress => Some("wait for the current indexing run to finish"),
        _ => None,
    };

    match hint {
        Some(hint) => anyhow::anyhow!("{} (hint: {})", error, hint),
        None => anyhow::Error::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_adds_hints_for_actionable_errors() {
        let error = explain(RagError::EmbeddingModelMismatch {
            index: "a".to_string(),
            configured: "b".to_string(),
        });
        let message = format!("{:#}", error);
        assert!(message.contains("reingest"));
        assert!(message.contains("'a'"));

        let error = explain(RagError::InvalidQuestion);
        assert_eq!(format!("{:#}", error), "Question cannot be empty");
    }

    #[test]
    fn excerpt_keeps_short_text_whole() {
        assert_eq!(excerpt("  The sky\n is blue.  ", 200), "The sky is blue.");
        assert_eq!(excerpt("", 200), "");
    }

    #[test]
    fn excerpt_cuts_long_text_at_the_limit() {
        let text = "word ".repeat(100);
        let short = excerpt(&text, EXCERPT_CHARS);

        assert_eq!(short.chars().count(), EXCERPT_CHARS + 1);
        assert!(short.ends_with('…'));
        assert!(text.starts_with(short.trim_end_matches('…')));
    }

    #[test]
    fn excerpt_counts_characters_not_bytes() {
        let text = "é".repeat(300);
        let short = excerpt(&text, EXCERPT_CHARS);

        assert_eq!(short, format!("{}…", "é".repeat(EXCERPT_CHARS)));
        assert_eq!(excerpt("ééé", 3), "ééé");
    }

    #[test]
    fn commands_only_need_the_models_they_use() {
        let mut config = Config::default();
        config.embedding.model = "all-minilm".to_string();
        config.generation.model = "llama3.2:3b".to_string();

        assert_eq!(required_models(&config, false), vec!["all-minilm"]);
        assert_eq!(
            required_models(&config, true),
            vec!["all-minilm", "llama3.2:3b"]
        );

        config.embedding.provider = EmbeddingProvider::Hashing;
        assert!(required_models(&config, false).is_empty());
        assert_eq!(required_models(&config, true), vec!["llama3.2:3b"]);
    }

    #[tokio::test]
    async fn nothing_to_check_without_server_models() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.ollama.port = 9;

        assert!(check_models(&config, false).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_is_reported_with_its_address() {
        let mut config = Config::default();
        config.ollama.port = 9;
        config.ollama.retry_attempts = 1;
        config.ollama.timeout_secs = 1;

        let error = check_models(&config, true)
            .await
            .expect_err("nothing listens on the discard port");
        let message = format!("{:#}", error);
        assert!(message.contains(":9"), "{}", message);
        assert!(message.contains("ollama pull"), "{}", message);
    }

    #[test]
    fn errors_are_not_wrapped_as_other() {
        let error = explain(RagError::NoDocuments {
            path: "documents".to_string(),
        });
        assert!(!format!("{:?}", error).contains("Other error"));
    }
}

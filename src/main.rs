use anyhow::Result;
use clap::{Parser, Subcommand};
use local_rag::commands::{
    ask_question, build_pipeline, check_models, initialize_index, reingest_documents, run_chat,
    show_index_stats,
};
use local_rag::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "local-rag")]
#[command(about = "Ask questions about local PDF and text documents using Ollama")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml; relative data paths resolve against it
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, models and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build the document index, or load it if it already exists
    Init,
    /// Ask a single question
    Ask {
        /// The question to answer
        question: String,
        /// Print the answer only once it is complete
        #[arg(long)]
        no_stream: bool,
    },
    /// Ask questions interactively
    Chat {
        /// Print answers only once they are complete
        #[arg(long)]
        no_stream: bool,
    },
    /// Delete the index and rebuild it from the documents
    Reingest,
    /// Show index and model statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&cli.config_dir)?;
        } else {
            run_interactive_config(&cli.config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&cli.config_dir)?;
    let pipeline = build_pipeline(&config)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Init => {
            check_models(&config, false).await?;
            initialize_index(&pipeline).await?;
        }
        Commands::Ask {
            question,
            no_stream,
        } => {
            check_models(&config, true).await?;
            initialize_index(&pipeline).await?;
            ask_question(&pipeline, &question, config.generation.stream && !no_stream).await?;
        }
        Commands::Chat { no_stream } => {
            check_models(&config, true).await?;
            initialize_index(&pipeline).await?;
            run_chat(&pipeline, config.generation.stream && !no_stream).await?;
        }
        Commands::Reingest => {
            check_models(&config, false).await?;
            reingest_documents(&pipeline).await?;
        }
        Commands::Stats => {
            show_index_stats(&pipeline).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use local_rag::config::EmbeddingProvider;
    use tempfile::TempDir;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["local-rag", "init"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Init));
            assert_eq!(parsed.config_dir, PathBuf::from("."));
        }
    }

    #[test]
    fn ask_command_with_question() {
        let cli = Cli::try_parse_from(["local-rag", "ask", "What color is the sky?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask {
                question,
                no_stream,
            } = parsed.command
            {
                assert_eq!(question, "What color is the sky?");
                assert!(!no_stream);
            } else {
                panic!("expected ask command");
            }
        }
    }

    #[test]
    fn ask_command_no_stream() {
        let cli = Cli::try_parse_from(["local-rag", "ask", "Why?", "--no-stream"])
            .expect("should parse");
        assert!(matches!(
            cli.command,
            Commands::Ask {
                no_stream: true,
                ..
            }
        ));
    }

    #[test]
    fn ask_requires_question() {
        let cli = Cli::try_parse_from(["local-rag", "ask"]);
        assert!(cli.is_err());

        if let Err(error) = cli {
            assert_eq!(error.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["local-rag", "stats", "--config-dir", "/srv/rag"])
            .expect("should parse");
        assert_eq!(cli.config_dir, PathBuf::from("/srv/rag"));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["local-rag", "config", "--show"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Config { show: true }));

        let cli = Cli::try_parse_from(["local-rag", "config"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Config { show: false }));
    }

    #[test]
    fn remaining_subcommands() {
        let cli = Cli::try_parse_from(["local-rag", "reingest"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Reingest));

        let cli = Cli::try_parse_from(["local-rag", "chat"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Chat { no_stream: false }));
    }

    #[test]
    fn unknown_subcommand() {
        let cli = Cli::try_parse_from(["local-rag", "serve"]);
        assert!(cli.is_err());

        if let Err(error) = cli {
            assert_eq!(error.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn no_subcommand() {
        let cli = Cli::try_parse_from(["local-rag"]);
        assert!(cli.is_err());
    }

    #[tokio::test]
    async fn failures_keep_their_own_message() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut config = Config {
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.save().expect("should save config");
        std::fs::create_dir_all(config.documents_path()).expect("documents dir");

        let cli = Cli::try_parse_from(["local-rag", "init"])
            .map(|cli| Cli {
                config_dir: temp_dir.path().to_path_buf(),
                ..cli
            })
            .expect("should parse");
        let error = run(cli).await.expect_err("no documents to index");

        let reported = format!("{:?}", error);
        assert!(!reported.contains("Other error"), "{}", reported);
        assert!(reported.contains("hint: add .pdf or .txt files"), "{}", reported);
    }
}

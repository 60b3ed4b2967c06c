// Configuration management module
// TOML settings for the model server, chunking, retrieval and storage paths

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    CONFIG_FILE_NAME, Config, ConfigError, EmbeddingConfig, EmbeddingProvider, GenerationConfig,
    OllamaConfig, PathsConfig, RetrievalConfig,
};

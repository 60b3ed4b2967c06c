use super::*;
use crate::embeddings::chunking::ChunkBoundary;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.batch_size, 16);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.model, "all-minilm:latest");
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.generation.model, "llama3.2:3b");
    assert!(config.generation.stream);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.overlap, 200);
    assert_eq!(config.chunking.boundary, ChunkBoundary::Character);
    assert_eq!(config.retrieval.top_k, 3);
    assert!(config.retrieval.prompt_template.is_none());
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.generation.model = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.dimension = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));

    let mut invalid_config = config;
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.chunk_size = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunkSize(0))
    ));

    config.chunking.chunk_size = 100;
    config.chunking.overlap = 100;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(100, 100))
    ));

    config.chunking.overlap = 99;
    assert!(config.validate().is_ok());
}

#[test]
fn hashing_provider_needs_no_model() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::Hashing;
    config.embedding.model = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn prompt_template_validation() {
    let mut config = Config::default();
    config.retrieval.prompt_template = Some("Answer {question} using {context}".to_string());
    assert!(config.validate().is_ok());

    config.retrieval.prompt_template = Some("No placeholders at all".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidPromptTemplate(_))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;

    let url = config
        .ollama
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [embedding]
        provider = "hashing"
        dimension = 64

        [chunking]
        chunk_size = 500
        boundary = "word"
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.embedding.provider, EmbeddingProvider::Hashing);
    assert_eq!(parsed.embedding.dimension, 64);
    assert_eq!(parsed.embedding.model, "all-minilm:latest");
    assert_eq!(parsed.chunking.chunk_size, 500);
    assert_eq!(parsed.chunking.overlap, 200);
    assert_eq!(parsed.chunking.boundary, ChunkBoundary::Word);
    assert_eq!(parsed.ollama, OllamaConfig::default());
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [ollama
        host = "localhost"
        port = "invalid_port"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn setter_validation() {
    let mut ollama = OllamaConfig::default();

    assert!(ollama.set_protocol("https".to_string()).is_ok());
    assert!(ollama.set_host("example.com".to_string()).is_ok());
    assert!(ollama.set_port(8080).is_ok());
    assert!(ollama.set_batch_size(128).is_ok());

    assert!(ollama.set_protocol("ftp".to_string()).is_err());
    assert!(ollama.set_protocol("HTTP".to_string()).is_err());
    assert!(ollama.set_port(0).is_err());
    assert!(ollama.set_batch_size(0).is_err());
    assert!(ollama.set_batch_size(1001).is_err());

    let mut embedding = EmbeddingConfig::default();
    assert!(embedding.set_model("nomic-embed-text".to_string()).is_ok());
    assert!(embedding.set_model(String::new()).is_err());
    assert!(embedding.set_dimension(768).is_ok());
    assert!(embedding.set_dimension(0).is_err());

    let mut generation = GenerationConfig::default();
    assert!(generation.set_model("mistral".to_string()).is_ok());
    assert!(generation.set_model(" ".to_string()).is_err());
}

#[test]
fn load_missing_config_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.documents_path(), temp_dir.path().join("documents"));
    assert_eq!(config.index_path(), temp_dir.path().join("index"));
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.ollama.host = "gpu-box".to_string();
    config.retrieval.top_k = 5;
    config.paths.index_dir = PathBuf::from("/var/lib/rag-index");

    config.save().expect("should save");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.index_path(), PathBuf::from("/var/lib/rag-index"));
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[chunking]\nchunk_size = 10\noverlap = 20\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn config_error_converts_to_rag_error() {
    let error: crate::RagError = ConfigError::InvalidTopK(0).into();
    assert!(matches!(error, crate::RagError::Config(_)));
}

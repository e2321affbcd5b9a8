use super::*;
use crate::ingest::chunking::ChunkingStrategy;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.protocol, "http");
    assert_eq!(config.embedding.host, "localhost");
    assert_eq!(config.embedding.port, 11434);
    assert_eq!(config.embedding.model, "all-minilm");
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.llm.model, "gpt-3.5-turbo-16k");
    assert_eq!(config.llm.summary_model, "gpt-3.5-turbo");
    assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.retrieval.preview_chars, 300);
    assert_eq!(config.chunking.strategy, ChunkingStrategy::Headings);
    assert_eq!(config.chunking.size, 1000);
    assert_eq!(config.chunking.overlap, 200);
    assert_eq!(config.server.port, 5000);
    assert_eq!(config.server.session_timeout_minutes, 30);
    assert_eq!(config.chat.stream_gate, StreamGateMode::None);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embedding.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.temperature = 3.0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.base_url = "not a url".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chat.answer_separator = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.server.session_timeout_minutes = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.overlap = config.chunking.size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(1000, 1000))
    ));

    let mut config = Config::default();
    config.chunking.subsection_marker = config.chunking.section_marker.clone();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateHeadingMarkers(_))
    ));

    let mut config = Config::default();
    config.chunking.question_pattern = "(unclosed".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidQuestionPattern(_, _))
    ));
}

#[test]
fn embedding_url_generation() {
    let config = Config::default();
    let url = config
        .embedding_url()
        .expect("should generate embedding_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
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
[retrieval]
top_k = 5

[chat]
stream_gate = "separator"
"#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.retrieval.top_k, 5);
    assert_eq!(parsed.retrieval.preview_chars, 300);
    assert_eq!(parsed.chat.stream_gate, StreamGateMode::Separator);
    assert_eq!(parsed.embedding, EmbeddingConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig {
        protocol: "http".to_string(),
        host: "localhost".to_string(),
        port: 11434,
        model: "test-model".to_string(),
        dimension: 384,
        batch_size: 32,
    };

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_dimension(768).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_dimension(8).is_err());
    assert!(config.set_batch_size(0).is_err());

    let mut llm = LlmConfig::default();
    assert!(llm.set_temperature(1.2).is_ok());
    assert!(llm.set_temperature(-0.1).is_err());
    assert!(llm.set_base_url("http://localhost:8080/v1".to_string()).is_ok());
    assert!(llm.set_base_url("nope".to_string()).is_err());
    assert!(llm.set_summary_model(" ".to_string()).is_err());
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should fall back to defaults");

    assert!(config.validate().is_ok());
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.embedding.host, "localhost");
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    config.retrieval.top_k = 7;
    config.server.session_store = SessionStoreKind::Sqlite;
    config.save().expect("should save config");

    let reloaded = Config::load(temp_dir.path()).expect("should reload config");
    assert_eq!(reloaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retrieval]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn corpus_paths_resolve_against_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };

    assert_eq!(
        config.metadata_path(),
        temp_dir.path().join("chunks-metadata.json")
    );
    assert_eq!(
        config.index_path(),
        temp_dir.path().join("vector-db").join("knowledge.index")
    );

    let absolute = temp_dir.path().join("elsewhere").join("kb.txt");
    config.corpus.source_path = absolute.clone();
    assert_eq!(config.corpus_source_path(), absolute);
}

#[test]
fn durations() {
    let config = Config::default();
    assert_eq!(config.session_timeout(), Duration::from_secs(30 * 60));
    assert_eq!(config.cookie_max_age(), Duration::from_secs(2 * 60 * 60));
    assert_eq!(config.llm.timeout(), Duration::from_secs(60));
}

#[test]
fn protocol_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(config.set_protocol("http".to_string()).is_ok());
    assert!(config.set_protocol("https".to_string()).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol(String::new()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err()); // case sensitive
}

#[test]
#[serial_test::serial]
fn api_key_reads_configured_variable() {
    let config = LlmConfig {
        api_key_env: "RAGCHAT_TEST_API_KEY".to_string(),
        ..LlmConfig::default()
    };

    // SAFETY: serialized with every other test that touches the environment
    unsafe { std::env::set_var("RAGCHAT_TEST_API_KEY", "sk-test") };
    assert_eq!(config.api_key().as_deref(), Some("sk-test"));

    // SAFETY: as above
    unsafe { std::env::set_var("RAGCHAT_TEST_API_KEY", "   ") };
    assert_eq!(config.api_key(), None);

    // SAFETY: as above
    unsafe { std::env::remove_var("RAGCHAT_TEST_API_KEY") };
    assert_eq!(config.api_key(), None);
}

use std::fs;

use tempfile::TempDir;

use super::load_existing_config as load_existing_config_impl;

#[test]
fn load_existing_config_defaults_when_missing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert!(!config.embedding.host.is_empty());
    assert!(config.embedding.port > 0);
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn load_existing_config_reads_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[embedding]\nmodel = \"nomic-embed-text\"\ndimension = 768\n",
    )
    .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.embedding.dimension, 768);
}

#[test]
fn load_existing_config_falls_back_on_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join("config.toml"), "not = [valid").expect("should write config");

    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.retrieval.top_k, 3);
}

#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, LlmConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 RAG Chat Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Embedding Service").bold().yellow());
    eprintln!("Configure the Ollama instance used to embed the knowledge base.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Language Model").bold().yellow());
    eprintln!("Configure the OpenAI-compatible chat completion endpoint.");
    eprintln!();

    configure_llm(&mut config.llm)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_embedding_connection(&config.embedding)? {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting.");
    }

    if config.llm.api_key().is_none() {
        eprintln!(
            "{}",
            style(format!(
                "⚠ Warning: environment variable {} is not set",
                config.llm.api_key_env
            ))
            .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.embedding.host).cyan());
    eprintln!("  Port: {}", style(config.embedding.port).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    match config.embedding_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Language Model Settings:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.llm.base_url).cyan());
    eprintln!("  Chat Model: {}", style(&config.llm.model).cyan());
    eprintln!("  Summary Model: {}", style(&config.llm.summary_model).cyan());
    eprintln!("  Temperature: {}", style(config.llm.temperature).cyan());
    let key_state = if config.llm.api_key().is_some() {
        style("set").green()
    } else {
        style("missing").red()
    };
    eprintln!("  API Key ({}): {}", config.llm.api_key_env, key_state);

    eprintln!();
    eprintln!("{}", style("Conversation Settings:").bold().yellow());
    eprintln!("  Chunking: {:?}", config.chunking.strategy);
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Checkpoint Threshold: {}",
        style(config.memory.checkpoint_threshold).cyan()
    );
    eprintln!("  Stream Gate: {:?}", config.chat.stream_gate);

    eprintln!();
    eprintln!("{}", style("Server Settings:").bold().yellow());
    eprintln!(
        "  Listen: {}",
        style(format!("{}:{}", config.server.host, config.server.port)).cyan()
    );
    eprintln!(
        "  Session Timeout: {} minutes",
        style(config.server.session_timeout_minutes).cyan()
    );
    eprintln!("  Session Store: {:?}", config.server.session_store);

    eprintln!();
    eprintln!("{}", style("Corpus:").bold().yellow());
    eprintln!("  Source: {}", config.corpus_source_path().display());
    eprintln!("  Index: {}", config.index_path().display());
    eprintln!("  Metadata: {}", config.metadata_path().display());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == embedding.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(embedding.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = EmbeddingConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..EmbeddingConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(embedding.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: usize = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    embedding.set_protocol(protocol)?;
    embedding.set_host(host)?;
    embedding.set_port(port)?;
    embedding.set_model(model)?;
    embedding.set_dimension(dimension)?;

    Ok(())
}

fn configure_llm(llm: &mut LlmConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(llm.base_url.clone())
        .validate_with(|input: &String| -> Result<(), String> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|e| format!("Invalid URL: {e}"))
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(llm.model.clone())
        .interact_text()?;

    let summary_model: String = Input::new()
        .with_prompt("Summary model")
        .default(llm.summary_model.clone())
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(llm.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    llm.set_base_url(base_url)?;
    llm.set_model(model)?;
    llm.set_summary_model(summary_model)?;
    llm.set_temperature(temperature)?;

    Ok(())
}

fn test_embedding_connection(embedding: &EmbeddingConfig) -> Result<bool> {
    let url = format!(
        "{}://{}:{}/api/version",
        embedding.protocol, embedding.host, embedding.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => Ok(true),
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => Ok(true),
        Err(_) => Ok(false),
    }
}

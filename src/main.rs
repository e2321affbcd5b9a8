use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ragchat::commands::{run_ingest, run_reindex, search, serve, show_status};
use ragchat::config::{Config, get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Retrieval-augmented chat over a local knowledge base")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the corpus files
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding service and language model
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Chunk, embed and index the knowledge base
    Ingest,
    /// Regenerate the index from the existing metadata file
    Reindex,
    /// Query the index and print the closest passages
    Search {
        /// Question to search for
        query: String,
        /// Number of passages to return
        #[arg(short, default_value_t = 2)]
        k: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the HTTP chat server
    Serve,
    /// Show the state of the corpus and external services
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest => {
            run_ingest(&Config::load(&config_dir)?).await?;
        }
        Commands::Reindex => {
            run_reindex(&Config::load(&config_dir)?).await?;
        }
        Commands::Search { query, k, json } => {
            search(&Config::load(&config_dir)?, &query, k, json).await?;
        }
        Commands::Serve => {
            serve(Config::load(&config_dir)?).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn serve_command() {
        let cli = Cli::try_parse_from(["ragchat", "serve"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Serve));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn search_defaults_to_two_results() {
        let cli = Cli::try_parse_from(["ragchat", "search", "How are leads qualified?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search { query, k, json } = parsed.command {
                assert_eq!(query, "How are leads qualified?");
                assert_eq!(k, 2);
                assert!(!json);
            } else {
                panic!("expected search command");
            }
        }
    }

    #[test]
    fn search_with_k() {
        let cli = Cli::try_parse_from(["ragchat", "search", "refunds", "-k", "5", "--json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search { k, json, .. } = parsed.command {
                assert_eq!(k, 5);
                assert!(json);
            }
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["ragchat", "ingest", "--config-dir", "/tmp/ragchat"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Ingest));
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/ragchat")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["ragchat", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragchat", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragchat", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}

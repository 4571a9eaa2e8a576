//! Command-line front end for a NoteVault index.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use notevault_lib::index::DEFAULT_TAG_LIMIT;
use notevault_lib::search::DEFAULT_SEARCH_LIMIT;
use notevault_lib::{NoteId, Vault, VaultConfig, VaultError};

/// Live markdown vault index with backlinks and search
#[derive(Parser, Debug)]
#[command(name = "notevault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file (settings at top level or under "vault")
    #[arg(short, long, global = true, conflicts_with = "vault")]
    config: Option<PathBuf>,

    /// Vault directory, using default settings
    #[arg(short, long, global = true)]
    vault: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Vault statistics
    Stats,

    /// Relevance-ranked search
    Search {
        query: String,

        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },

    /// Show one note by id or file path
    Note { id: String },

    /// Notes carrying a tag
    Tag {
        tag: String,

        #[arg(short, long, default_value_t = DEFAULT_TAG_LIMIT)]
        limit: usize,
    },

    /// Orphaned, large, untagged and duplicate-title notes
    Cleanup,

    /// Keep the index live until Ctrl-C
    Watch,
}

fn load_config(cli: &Cli, watch: bool) -> Result<VaultConfig, VaultError> {
    let mut config = match (&cli.config, &cli.vault) {
        (Some(path), _) => VaultConfig::from_file(path)?,
        (None, Some(dir)) => VaultConfig::new(dir),
        (None, None) => {
            return Err(VaultError::Config(
                "either --config or --vault is required".to_string(),
            ))
        }
    };
    config.watch_for_changes = watch;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let watch = matches!(cli.command, Commands::Watch);
    let vault = Vault::open(load_config(&cli, watch)?).await?;

    match &cli.command {
        Commands::Stats => print_json(&vault.get_vault_stats())?,
        Commands::Search { query, limit } => print_json(&vault.search_notes(query, *limit))?,
        Commands::Note { id } => {
            let note = vault
                .get_note(&NoteId::from(id.as_str()))
                .or_else(|| vault.get_note(&NoteId::from_path(Path::new(id))))
                .ok_or_else(|| VaultError::NotFound(id.clone()))?;
            print_json(&note)?
        }
        Commands::Tag { tag, limit } => print_json(&vault.get_notes_by_tag(tag, *limit))?,
        Commands::Cleanup => print_json(&vault.suggest_cleanup())?,
        Commands::Watch => {
            log::info!("Watching {:?}, press Ctrl-C to stop", vault.root());
            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down");
        }
    }

    vault.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

//! croclink - 전송 히스토리/설정 관리 CLI
//!
//! 사용법:
//!   croclink history list [--limit N]
//!   croclink history stats
//!   croclink history export [--output FILE]
//!   croclink history import FILE
//!   croclink history delete ID
//!   croclink history clear --yes
//!   croclink config show
//!
//! 로그 레벨은 `RUST_LOG` (기본 warn, `-v` 면 debug).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use croclink::config::default_config_path;
use croclink::{format_size, Config, HistoryStore, JsonFileBackend};

#[derive(Parser)]
#[command(author, version, about = "Croclink transfer history and configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// History file path (overrides configuration)
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List records, most recent first
    List {
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show status counts and storage usage
    Stats,
    /// Export records as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace all records with an exported JSON file
    Import {
        file: PathBuf,
    },
    /// Delete one record
    Delete {
        id: String,
    },
    /// Delete all records
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("설정 로드 실패: {}", config_path.display()))?;
    if let Some(history) = &cli.history {
        config.history_path = Some(history.clone());
    }

    match cli.command {
        Commands::History { action } => run_history(&config, action),
        Commands::Config { action } => run_config(&config, &config_path, action),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "croclink=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_history(config: &Config, action: HistoryAction) -> anyhow::Result<()> {
    let path = config.history_file();
    let store = HistoryStore::open(JsonFileBackend::new(&path), config.history_max_records);

    match action {
        HistoryAction::List { limit } => {
            let records = match limit {
                Some(limit) => store.get_recent(limit),
                None => store.get_all(),
            };
            if records.is_empty() {
                println!("(no records)");
            }
            for r in records {
                println!(
                    "{}  {:<7}  {:<11}  {:<30}  {:>10}  {:>3} file(s)  {:>5}s  {}",
                    r.created_at.format("%Y-%m-%d %H:%M:%S"),
                    r.direction,
                    r.status,
                    r.file_name,
                    r.file_size,
                    r.file_count,
                    r.duration_secs,
                    r.id,
                );
            }
        }
        HistoryAction::Stats => {
            let stats = store.stats();
            let info = store.storage_info();
            println!("file:        {}", path.display());
            println!("total:       {} / {}", stats.total, store.max_records());
            println!("completed:   {}", stats.completed);
            println!("failed:      {}", stats.failed);
            println!("cancelled:   {}", stats.cancelled);
            println!("in progress: {}", stats.in_progress);
            println!("size:        {}", format_size(info.total_bytes));
        }
        HistoryAction::Export { output } => {
            let json = store.export()?;
            match output {
                Some(file) => {
                    std::fs::write(&file, json)
                        .with_context(|| format!("쓰기 실패: {}", file.display()))?;
                    info!("exported {} records to {}", store.len(), file.display());
                }
                None => println!("{}", json),
            }
        }
        HistoryAction::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("읽기 실패: {}", file.display()))?;
            let count = store.import(&json)?;
            println!("imported {} records", count);
        }
        HistoryAction::Delete { id } => {
            store.delete(&id)?;
            println!("deleted {}", id);
        }
        HistoryAction::Clear { yes } => {
            if !yes {
                bail!("refusing to clear {} records without --yes", store.len());
            }
            store.clear()?;
            println!("history cleared");
        }
    }

    Ok(())
}

fn run_config(config: &Config, path: &Path, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(config)?);
            println!("# history file: {}", config.history_file().display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force)", path.display());
            }
            Config::default().save_to_file(path)?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

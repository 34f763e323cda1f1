//! CLI command definitions, routing, and tracing setup.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tabdrome_core::{BrowserEvent, ClientBridge, Pipeline};
use tabdrome_digger::{CachedInvestigation, HtmlSnapshotInvestigator};
use tabdrome_shared::{AppConfig, config_file_path, init_config, load_config, load_config_from};
use tabdrome_storage::Storage;
use tokio::sync::mpsc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Tabdrome: arrange browser tabs by what their pages say about themselves.
#[derive(Parser)]
#[command(
    name = "tabdrome",
    version,
    about = "Synchronize, enrich and arrange browser tabs into a tree.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Replay recorded browser events and print every delivered tree.
    Replay {
        /// JSON Lines file, one browser event per line.
        events: PathBuf,

        /// JSON object mapping page URLs to HTML snapshots, used to answer
        /// round-trip enrichments.
        #[arg(long)]
        pages: Option<PathBuf>,

        /// Config file to use instead of ~/.tabdrome/tabdrome.toml.
        #[arg(long, env = "TABDROME_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Inspect the persisted investigation cache.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Print cached results as JSON Lines, read-only.
    List {
        /// Only rows for this origin, e.g. https://developer.mozilla.org.
        #[arg(long)]
        origin: Option<String>,

        /// Config file to use instead of ~/.tabdrome/tabdrome.toml.
        #[arg(long, env = "TABDROME_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Print the config file location.
    Path,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout carries
/// only trees.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tabdrome=info",
        1 => "tabdrome=debug",
        _ => "tabdrome=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Replay {
            events,
            pages,
            config,
        } => cmd_replay(&events, pages.as_deref(), config.as_deref()).await,
        Command::Cache { action } => match action {
            CacheAction::List { origin, config } => {
                cmd_cache_list(origin.as_deref(), config.as_deref()).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
            ConfigAction::Path => cmd_config_path(),
        },
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

fn read_events(path: &Path) -> Result<Vec<BrowserEvent>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| eyre!("{}:{}: invalid event: {e}", path.display(), n + 1))
        })
        .collect()
}

fn read_pages(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} is not a URL → HTML object", path.display()))
}

fn load_app_config(config: Option<&Path>) -> Result<AppConfig> {
    let app = match config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(app)
}

async fn cmd_replay(events_path: &Path, pages: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let app = load_app_config(config)?;
    let events = read_events(events_path)?;
    let pages = match pages {
        Some(path) => read_pages(path)?,
        None => {
            warn!("no --pages given, round-trip enrichments will come back empty");
            HashMap::new()
        }
    };
    info!(events = events.len(), pages = pages.len(), "replaying");

    let bridge = Arc::new(ClientBridge::new());
    let mut trees = bridge.subscribe();
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(message) = trees.recv().await {
            let line = serde_json::to_string(&message)?;
            writeln!(stdout.lock(), "{line}")?;
        }
        Ok::<_, color_eyre::Report>(())
    });

    let investigator = Arc::new(HtmlSnapshotInvestigator::with_pages(pages));
    let pipeline = Pipeline::from_app_config(&app, investigator, bridge.clone()).await?;

    let (tx, rx) = mpsc::channel(256);
    let feeder = tokio::spawn(async move {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let stats = pipeline.run(rx).await?;
    feeder.await?;
    drop(bridge);
    printer.await??;

    info!(
        events = stats.events,
        flushes = stats.flushes,
        deliveries = stats.deliveries,
        investigations = stats.investigations_finished,
        persisted = stats.cache_entries_persisted,
        "replay complete"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

fn write_cache_rows(
    entries: &[CachedInvestigation],
    origin: Option<&str>,
    out: &mut impl Write,
) -> Result<usize> {
    let mut written = 0;
    for entry in entries.iter().filter(|e| origin.is_none_or(|o| e.origin == o)) {
        writeln!(out, "{}", serde_json::to_string(entry)?)?;
        written += 1;
    }
    Ok(written)
}

async fn cmd_cache_list(origin: Option<&str>, config: Option<&Path>) -> Result<()> {
    let app = load_app_config(config)?;
    let db_path = app
        .storage
        .db_path
        .ok_or_else(|| eyre!("no [storage] db_path configured, the cache lives in memory only"))?;
    let path = Path::new(&db_path);
    if !path.exists() {
        info!(path = %path.display(), "no investigation cache written yet");
        return Ok(());
    }

    let storage = Storage::open_readonly(path).await?;
    let entries = storage.load_investigations().await?;
    let written = write_cache_rows(&entries, origin, &mut std::io::stdout().lock())?;
    info!(rows = written, total = entries.len(), "cache listed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_path() -> Result<()> {
    println!("{}", config_file_path()?.display());
    Ok(())
}

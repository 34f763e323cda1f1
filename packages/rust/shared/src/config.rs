//! Application configuration for Tabdrome.
//!
//! User config lives at `~/.tabdrome/tabdrome.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabdromeError};
use crate::types::EnrichmentSpec;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tabdrome.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tabdrome";

// ---------------------------------------------------------------------------
// Config structs (matching tabdrome.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline batching and arranger wiring.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Investigator round-trip settings.
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Investigation cache persistence.
    #[serde(default)]
    pub storage: StorageSection,

    /// Enrichments, grouped by origin at load time.
    #[serde(default = "default_enrichments")]
    pub enrichments: Vec<EnrichmentSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            coordinator: CoordinatorSection::default(),
            storage: StorageSection::default(),
            enrichments: default_enrichments(),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Delay used to coalesce bursts of tab events into one flush.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Write-behind delay for investigation cache persistence.
    #[serde(default = "default_persist_delay_ms")]
    pub persist_delay_ms: u64,

    /// Arranger names in registration (tie-break) order.
    #[serde(default = "default_arrangers")]
    pub arrangers: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
            persist_delay_ms: default_persist_delay_ms(),
            arrangers: default_arrangers(),
        }
    }
}

fn default_flush_delay_ms() -> u64 {
    10
}
fn default_persist_delay_ms() -> u64 {
    5_000
}
fn default_arrangers() -> Vec<String> {
    vec!["site-hierarchy".into(), "session".into()]
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Requests older than this are rejected with a timeout.
    #[serde(default = "default_eviction_age_ms")]
    pub eviction_age_ms: u64,

    /// Period of the eviction sweep. Keep it around half of the age.
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            eviction_age_ms: default_eviction_age_ms(),
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

fn default_eviction_age_ms() -> u64 {
    5_000
}
fn default_eviction_interval_ms() -> u64 {
    2_000
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// libSQL database file for the investigation cache. Unset keeps the
    /// cache in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

/// Built-in enrichments: RDFa breadcrumbs on MDN.
pub fn default_enrichments() -> Vec<EnrichmentSpec> {
    const NS_PRED: &str = r#"xmlns\:v="http://rdf.data-vocabulary.org/#""#;
    vec![EnrichmentSpec {
        enrichment_id: "rdfa-breadcrumbs".into(),
        origin: "https://developer.mozilla.org".into(),
        provides: "breadcrumbs".into(),
        engine: "round-trip".into(),
        cache_key_spec: Some(vec!["url.sans_hash".into()]),
        constraint_spec: [("url".to_string(), "url.href".to_string())].into(),
        spec: serde_json::json!({
            "container_selector": format!("ol[{NS_PRED}],ul[{NS_PRED}]"),
            "item_selector": r#"[typeof="v:Breadcrumb"]"#,
            "values": {
                "url": {
                    "selector": r#"[rel="v:url"]"#,
                    "extract": "href",
                    "fallback": "constant"
                },
                "label": {
                    "selector": r#"[property="v:title"]"#,
                    "extract": "text",
                    "fallback": "use-self"
                }
            }
        }),
    }]
}

// ---------------------------------------------------------------------------
// Runtime config (derived from AppConfig + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub flush_delay: Duration,
    pub persist_delay: Duration,
    pub arrangers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            flush_delay: Duration::from_millis(config.pipeline.flush_delay_ms),
            persist_delay: Duration::from_millis(config.pipeline.persist_delay_ms),
            arrangers: config.pipeline.arrangers.clone(),
        }
    }
}

/// Runtime coordinator configuration.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub eviction_age: Duration,
    pub eviction_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            eviction_age: Duration::from_millis(config.coordinator.eviction_age_ms),
            eviction_interval: Duration::from_millis(config.coordinator.eviction_interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tabdrome/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TabdromeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tabdrome/tabdrome.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TabdromeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        TabdromeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TabdromeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TabdromeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TabdromeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn validate(config: &AppConfig) -> Result<()> {
    let c = &config.coordinator;
    if c.eviction_interval_ms == 0 || c.eviction_age_ms == 0 {
        return Err(TabdromeError::config(
            "coordinator eviction_age_ms and eviction_interval_ms must be non-zero",
        ));
    }
    if c.eviction_interval_ms > c.eviction_age_ms {
        tracing::warn!(
            interval_ms = c.eviction_interval_ms,
            age_ms = c.eviction_age_ms,
            "eviction interval exceeds eviction age; requests may linger well past the age"
        );
    }
    if config.pipeline.arrangers.is_empty() {
        return Err(TabdromeError::config("at least one arranger must be configured"));
    }
    Ok(())
}

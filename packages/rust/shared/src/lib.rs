//! Shared types, error model, and configuration for Tabdrome.
//!
//! This crate is the foundation depended on by all other Tabdrome crates.
//! It provides:
//! - [`TabdromeError`] — the unified error type
//! - Domain types ([`NormalizedTab`], [`ParsedUrl`], [`RawTab`], [`EnrichmentSpec`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], [`CoordinatorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CoordinatorConfig, CoordinatorSection, PipelineConfig, PipelineSection,
    StorageSection, config_dir, config_file_path, default_enrichments, init_config, load_config,
    load_config_from,
};
pub use error::{Result, TabdromeError};
pub use types::{
    EnrichmentSpec, NormalizedTab, ParsedUrl, RawTab, Serial, Suid, TabId, WindowId,
};

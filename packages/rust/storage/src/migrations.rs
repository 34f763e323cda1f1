//! SQL migration definitions for the Tabdrome database.
//!
//! Migrations are applied in order on database open.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: investigation_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Enrichment results keyed the way the in-memory cache keys them
CREATE TABLE IF NOT EXISTS investigation_cache (
    origin        TEXT NOT NULL,
    enrichment_id TEXT NOT NULL,
    cache_key     TEXT NOT NULL,
    value_json    TEXT NOT NULL,
    stored_at     TEXT NOT NULL,
    PRIMARY KEY (origin, enrichment_id, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_investigation_cache_origin ON investigation_cache(origin);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding persisted
//! investigation results, so enrichments survive a restart without another
//! round trip.
//!
//! **Access rules:**
//! - the pipeline: read-write (sole writer) via [`Storage::open`]
//! - `tabdrome cache list`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use tabdrome_digger::CachedInvestigation;
use tabdrome_shared::{Result, TabdromeError};

fn storage_err(e: impl std::fmt::Display) -> TabdromeError {
    TabdromeError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TabdromeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TabdromeError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TabdromeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Investigation cache
    // -----------------------------------------------------------------------

    /// Insert or replace one cached result.
    pub async fn upsert_investigation(&self, entry: &CachedInvestigation) -> Result<()> {
        self.check_writable()?;
        let value_json = serde_json::to_string(&entry.value).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO investigation_cache (origin, enrichment_id, cache_key, value_json, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(origin, enrichment_id, cache_key) DO UPDATE SET
                    value_json = excluded.value_json,
                    stored_at = excluded.stored_at",
                params![
                    entry.origin.as_str(),
                    entry.enrichment_id.as_str(),
                    entry.cache_key.as_str(),
                    value_json,
                    now
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Persist a batch of results. Returns how many rows were written.
    pub async fn upsert_investigations(&self, entries: &[CachedInvestigation]) -> Result<usize> {
        for entry in entries {
            self.upsert_investigation(entry).await?;
        }
        if !entries.is_empty() {
            tracing::debug!(count = entries.len(), "persisted investigation results");
        }
        Ok(entries.len())
    }

    /// Every persisted result. Rows whose JSON no longer parses are skipped.
    pub async fn load_investigations(&self) -> Result<Vec<CachedInvestigation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT origin, enrichment_id, cache_key, value_json FROM investigation_cache
                 ORDER BY origin, enrichment_id, cache_key",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let origin = row.get::<String>(0).map_err(storage_err)?;
            let enrichment_id = row.get::<String>(1).map_err(storage_err)?;
            let cache_key = row.get::<String>(2).map_err(storage_err)?;
            let value_json = row.get::<String>(3).map_err(storage_err)?;
            match serde_json::from_str(&value_json) {
                Ok(value) => results.push(CachedInvestigation {
                    origin,
                    enrichment_id,
                    cache_key,
                    value,
                }),
                Err(e) => {
                    tracing::warn!(%origin, %enrichment_id, %cache_key, error = %e, "skipping corrupt cache row");
                }
            }
        }
        Ok(results)
    }

    /// Drop every result cached for an enrichment, e.g. after its spec changed.
    pub async fn invalidate_enrichment(&self, origin: &str, enrichment_id: &str) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM investigation_cache WHERE origin = ?1 AND enrichment_id = ?2",
                params![origin, enrichment_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tabdrome_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_path()).await.expect("open test db")
    }

    fn entry(cache_key: &str, value: serde_json::Value) -> CachedInvestigation {
        CachedInvestigation {
            origin: "https://developer.mozilla.org".into(),
            enrichment_id: "rdfa-breadcrumbs".into(),
            cache_key: cache_key.into(),
            value,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
        assert!(storage.load_investigations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let path = temp_path();
        let first = Storage::open(&path).await.unwrap();
        first.upsert_investigation(&entry("k", json!(1))).await.unwrap();
        drop(first);
        let second = Storage::open(&path).await.expect("reopen");
        assert_eq!(second.get_schema_version().await, 1);
        assert_eq!(second.load_investigations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_value() {
        let storage = test_storage().await;
        storage
            .upsert_investigations(&[entry("a", json!([{"label": "Web"}])), entry("b", json!("x"))])
            .await
            .unwrap();
        storage.upsert_investigation(&entry("a", json!([]))).await.unwrap();

        let loaded = storage.load_investigations().await.unwrap();
        assert_eq!(loaded, vec![entry("a", json!([])), entry("b", json!("x"))]);
    }

    #[tokio::test]
    async fn invalidate_drops_only_that_enrichment() {
        let storage = test_storage().await;
        storage.upsert_investigation(&entry("a", json!(1))).await.unwrap();
        let other = CachedInvestigation {
            enrichment_id: "other".into(),
            ..entry("a", json!(2))
        };
        storage.upsert_investigation(&other).await.unwrap();

        let removed = storage
            .invalidate_enrichment("https://developer.mozilla.org", "rdfa-breadcrumbs")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.load_investigations().await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let path = temp_path();
        Storage::open(&path).await.unwrap();
        let ro = Storage::open_readonly(&path).await.unwrap();
        let err = ro.upsert_investigation(&entry("k", json!(1))).await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.load_investigations().await.unwrap().is_empty());
    }
}

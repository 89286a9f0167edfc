//! Local key/value storage using SQLite
//!
//! Stands in for browser-local storage: the session credential, notification
//! preferences and per-lead chat session ids all live here as string values.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Local storage handle
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open the local storage database named in the config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Open (creating if needed) a local storage database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Opening local storage at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Non-persistent store, used when no data directory is available
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A second connection would see a different empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing local storage schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM local_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Insert or overwrite a value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_storage (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_storage WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Keys starting with `prefix`, sorted
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM local_storage WHERE key LIKE ? ESCAPE '\\' ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Read a JSON value; a corrupt entry reads as absent
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable local storage entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM local_storage")
            .execute(&self.pool)
            .await?;
        info!("Cleared {} local storage entries", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn setup_test_store() -> (LocalStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(&tmp.path().join("test.db")).await.unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let (store, _tmp) = setup_test_store().await;

        assert_eq!(store.get("orbita_token").await.unwrap(), None);

        store.set("orbita_token", "abc").await.unwrap();
        store.set("orbita_token", "def").await.unwrap();
        assert_eq!(store.get("orbita_token").await.unwrap().as_deref(), Some("def"));

        store.remove("orbita_token").await.unwrap();
        assert_eq!(store.get("orbita_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("local.db");

        {
            let store = LocalStore::open(&path).await.unwrap();
            store.set("k", "v").await.unwrap();
        }

        let store = LocalStore::open(&path).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_json_values() {
        let store = LocalStore::in_memory().await.unwrap();

        let mut prefs = BTreeMap::new();
        prefs.insert("nuevo_lead".to_string(), false);
        store.set_json("orbita_notif_prefs", &prefs).await.unwrap();

        let loaded: BTreeMap<String, bool> =
            store.get_json("orbita_notif_prefs").await.unwrap().unwrap();
        assert_eq!(loaded, prefs);

        store.set("broken", "{not json").await.unwrap();
        let broken: Option<BTreeMap<String, bool>> = store.get_json("broken").await.unwrap();
        assert!(broken.is_none());
    }

    #[tokio::test]
    async fn test_prefix_listing() {
        let store = LocalStore::in_memory().await.unwrap();
        store.set("orbita_session_L2", "b").await.unwrap();
        store.set("orbita_session_L1", "a").await.unwrap();
        store.set("orbita_token", "t").await.unwrap();
        store.set("orbitaXsessionY", "x").await.unwrap();

        let keys = store.keys_with_prefix("orbita_session_").await.unwrap();
        assert_eq!(keys, vec!["orbita_session_L1", "orbita_session_L2"]);

        assert_eq!(store.clear().await.unwrap(), 4);
    }
}

//! Durable key-value store addressed by `(kind, name)`.
//!
//! The SQLite backend is what the bot runs against; `MemoryStore` is for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

pub type Pool = SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub kind: &'static str,
    pub name: String,
}

impl Key {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &Key) -> Result<Option<String>>;

    async fn put(&self, key: &Key, value: &str) -> Result<()>;

    /// Write only if nothing is stored under `key`. Returns whether this call
    /// inserted the value.
    async fn put_if_absent(&self, key: &Key, value: &str) -> Result<bool>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// All `(name, value)` pairs stored under `kind`, ordered by name.
    async fn list(&self, kind: &'static str) -> Result<Vec<(String, String)>>;
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (or create) the ledger database at `database_url` in WAL mode
    /// and apply migrations.
    #[instrument(skip_all)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = prepare_sqlite_url(database_url);
        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("failed to open ledger database {}", url))?;
        // Markers and tokens must survive a crash between invocations.
        for pragma in ["PRAGMA journal_mode=WAL;", "PRAGMA synchronous=FULL;"] {
            sqlx::query(pragma).execute(&pool).await?;
        }
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip_all, fields(kind = key.kind, name = %key.name))]
    async fn get(&self, key: &Key) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM entities WHERE kind = ? AND name = ?",
        )
        .bind(key.kind)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    #[instrument(skip_all, fields(kind = key.kind, name = %key.name))]
    async fn put(&self, key: &Key, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO entities (kind, name, value) VALUES (?, ?, ?) \
             ON CONFLICT(kind, name) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key.kind)
        .bind(&key.name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(kind = key.kind, name = %key.name))]
    async fn put_if_absent(&self, key: &Key, value: &str) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO entities (kind, name, value) VALUES (?, ?, ?) \
             ON CONFLICT(kind, name) DO NOTHING",
        )
        .bind(key.kind)
        .bind(&key.name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(kind = key.kind, name = %key.name))]
    async fn delete(&self, key: &Key) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND name = ?")
            .bind(key.kind)
            .bind(&key.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(kind = kind))]
    async fn list(&self, kind: &'static str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT name, value FROM entities WHERE kind = ? ORDER BY name")
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("name"), r.get::<String, _>("value")))
            .collect())
    }
}

/// Process-local store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<Key, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &Key, value: &str) -> Result<()> {
        self.entries.lock().await.insert(key.clone(), value.to_string());
        Ok(())
    }

    async fn put_if_absent(&self, key: &Key, value: &str) -> Result<bool> {
        let mut guard = self.entries.lock().await;
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.clone(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, kind: &'static str) -> Result<Vec<(String, String)>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(k, v)| (k.name.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqliteStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn exercise(store: &dyn Store) {
        let key = Key::new("Thing", "a");
        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(&key, "1").await.unwrap();
        store.put(&key, "2").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("2"));

        assert!(!store.put_if_absent(&key, "3").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("2"));
        assert!(store.put_if_absent(&Key::new("Thing", "b"), "x").await.unwrap());
        store.put(&Key::new("Other", "a"), "y").await.unwrap();

        let listed = store.list("Thing").await.unwrap();
        assert_eq!(
            listed,
            vec![("a".to_string(), "2".to_string()), ("b".to_string(), "x".to_string())]
        );

        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
        assert_eq!(store.list("Other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sqlite_store_semantics() {
        let store = memory_pool().await;
        exercise(&store).await;
    }

    #[tokio::test]
    async fn memory_store_semantics() {
        let store = MemoryStore::new();
        exercise(&store).await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn connect_creates_file_and_keeps_data_across_reopen() {
        let td = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", td.path().join("data/ledger.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.put(&Key::new("Thing", "a"), "1").await.unwrap();
        store.pool.close().await;

        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(
            reopened.get(&Key::new("Thing", "a")).await.unwrap().as_deref(),
            Some("1")
        );
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode;")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn prepare_sqlite_url_passes_memory_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn prepare_sqlite_url_adds_create_mode() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested/db.sqlite");
        let url = format!("sqlite://{}", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());
    }
}

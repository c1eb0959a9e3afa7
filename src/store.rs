//! Durable local cache for project state.
//!
//! A single SQLite key-value table, one row per key, JSON payloads. Keys are
//! namespaced per project identifier (`project-state:{id}`,
//! `project-meta:{id}`) so concurrent sessions for different projects never
//! interfere. Storage is best-effort: a full database is reported as a typed
//! [`StoreError::QuotaExceeded`] the caller can absorb, and a corrupted
//! payload reads back as absent rather than as a hard failure.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage is out of space. The in-memory state remains
    /// authoritative for the rest of the session.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key for the serialized [`crate::model::ProjectState`] of `project_id`.
pub fn state_key(project_id: &str) -> String {
    format!("project-state:{project_id}")
}

/// Key for the serialized [`crate::model::SyncMetadata`] of `project_id`.
pub fn meta_key(project_id: &str) -> String {
    format!("project-meta:{project_id}")
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("waypoint.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true)
                .log_slow_statements(
                    log::LevelFilter::Warn,
                    std::time::Duration::from_millis(250),
                );

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Serialize `value` under `key`, replacing any previous row.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        let result = sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_quota_error(&e) => Err(StoreError::QuotaExceeded),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and deserialize the value under `key`.
    ///
    /// An absent row and a corrupt payload both come back as `Ok(None)`; the
    /// caller falls back to defaults either way.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some((payload,)) = row else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, err = %e, "discarding corrupt cached payload");
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// SQLITE_FULL surfaces as "database or disk is full" (error code 13).
fn is_quota_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("13") || db.message().contains("disk is full")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectState, SyncMetadata};

    async fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn round_trips_project_state() {
        let (_dir, store) = open_temp().await;
        let state = ProjectState::with_defaults("p1");
        store.put(&state_key("p1"), &state).await.unwrap();
        let back: Option<ProjectState> = store.get(&state_key("p1")).await.unwrap();
        assert_eq!(back, Some(state));
    }

    #[tokio::test]
    async fn absent_key_reads_none() {
        let (_dir, store) = open_temp().await;
        let back: Option<SyncMetadata> = store.get(&meta_key("nope")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_reads_as_absent() {
        let (_dir, store) = open_temp().await;
        store.put(&state_key("p1"), &"not a project state").await.unwrap();
        let back: Option<ProjectState> = store.get(&state_key("p1")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn put_replaces_previous_value() {
        let (_dir, store) = open_temp().await;
        let mut state = ProjectState::with_defaults("p1");
        store.put(&state_key("p1"), &state).await.unwrap();
        state.ethical_acknowledged = true;
        store.put(&state_key("p1"), &state).await.unwrap();
        let back: Option<ProjectState> = store.get(&state_key("p1")).await.unwrap();
        assert!(back.unwrap().ethical_acknowledged);
    }

    #[tokio::test]
    async fn keys_are_namespaced_per_project() {
        let (_dir, store) = open_temp().await;
        let a = ProjectState::with_defaults("a");
        let b = ProjectState::with_defaults("b");
        store.put(&state_key("a"), &a).await.unwrap();
        store.put(&state_key("b"), &b).await.unwrap();
        let back: ProjectState = store.get(&state_key("a")).await.unwrap().unwrap();
        assert_eq!(back.project_id, "a");
    }

    #[derive(Debug)]
    struct StubDbError {
        code: Option<&'static str>,
        message: &'static str,
    }

    impl std::fmt::Display for StubDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for StubDbError {}

    impl sqlx::error::DatabaseError for StubDbError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            self.code.map(std::borrow::Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(code: Option<&'static str>, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(StubDbError { code, message }))
    }

    #[test]
    fn sqlite_full_counts_as_quota() {
        assert!(is_quota_error(&db_error(Some("13"), "database or disk is full")));
        // Some drivers report the condition by message only.
        assert!(is_quota_error(&db_error(None, "database or disk is full")));
    }

    #[test]
    fn other_database_errors_are_not_quota() {
        assert!(!is_quota_error(&db_error(Some("1"), "SQL logic error")));
        assert!(!is_quota_error(&sqlx::Error::RowNotFound));
    }
}

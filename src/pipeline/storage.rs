/// SQLite persistence layer for pipelines and run history
///
/// Handles CRUD for pipeline rows, run histories and run logs. Pipeline content,
/// history snapshots and logs are stored as JSON text; indexed columns carry the
/// fields the orchestrator queries on.

use crate::pipeline::types::{HistoryEntity, HistoryLogEntity, PipelineEntity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite,
};
use std::path::Path;

/// Generic persistence collaborator used by the orchestration core
///
/// Every write is an upsert keyed by id, so replaying a write is harmless.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn find_pipelines_by_ids(&self, ids: &[String]) -> Result<Vec<PipelineEntity>>;

    /// Ids of pipelines that are not disabled, ordered by id, one page at a time
    async fn find_enabled_pipeline_ids(&self, offset: i64, limit: i64) -> Result<Vec<String>>;

    async fn get_pipeline(&self, id: &str) -> Result<Option<PipelineEntity>>;

    /// Insert or update the authored fields; status fields and creation time are
    /// only taken from `pipeline` when the row is new
    async fn save_pipeline(&self, pipeline: &PipelineEntity) -> Result<()>;

    /// Write only the orchestrator-owned status fields
    async fn update_pipeline_status(&self, id: &str, status: &str, last_history_time: i64) -> Result<()>;

    async fn delete_pipelines(&self, ids: &[String]) -> Result<u64>;

    async fn save_history(&self, history: &HistoryEntity) -> Result<()>;

    async fn save_history_log(&self, log: &HistoryLogEntity) -> Result<()>;

    async fn get_history(&self, id: &str) -> Result<Option<HistoryEntity>>;

    async fn get_history_log(&self, id: &str) -> Result<Option<HistoryLogEntity>>;

    /// Most recent runs first
    async fn list_histories(&self, pipeline_id: &str) -> Result<Vec<HistoryEntity>>;
}

/// SQLite-backed repository
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Wrap an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a database file and initialize the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        tracing::info!("🗄️ Opening pipeline database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to open database {}", db_path.display()))?;

        let repository = Self::new(pool);
        repository.init_schema().await?;
        Ok(repository)
    }

    /// Private in-memory database, used by tests
    pub async fn in_memory() -> Result<Self> {
        // A single connection that is never recycled, or the database vanishes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let repository = Self::new(pool);
        repository.init_schema().await?;
        Ok(repository)
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                content TEXT NOT NULL,
                status TEXT,
                last_history_time INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS histories (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history_logs (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_disabled ON pipelines(disabled)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_histories_pipeline ON histories(pipeline_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl PipelineRepository for SqliteRepository {
    async fn find_pipelines_by_ids(&self, ids: &[String]) -> Result<Vec<PipelineEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, user_id, title, disabled, content, status, last_history_time, \
             created_at, updated_at FROM pipelines WHERE id IN (",
        );
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(pipeline_from_row).collect())
    }

    async fn find_enabled_pipeline_ids(&self, offset: i64, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM pipelines WHERE disabled = 0 ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn get_pipeline(&self, id: &str) -> Result<Option<PipelineEntity>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, disabled, content, status, last_history_time, \
             created_at, updated_at FROM pipelines WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(pipeline_from_row))
    }

    async fn save_pipeline(&self, pipeline: &PipelineEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, user_id, title, disabled, content, status,
                                   last_history_time, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                disabled = excluded.disabled,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.user_id)
        .bind(&pipeline.title)
        .bind(pipeline.disabled)
        .bind(&pipeline.content)
        .bind(&pipeline.status)
        .bind(pipeline.last_history_time)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_pipeline_status(&self, id: &str, status: &str, last_history_time: i64) -> Result<()> {
        sqlx::query("UPDATE pipelines SET status = ?, last_history_time = ? WHERE id = ?")
            .bind(status)
            .bind(last_history_time)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_pipelines(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM pipelines WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn save_history(&self, history: &HistoryEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO histories (id, pipeline_id, user_id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&history.id)
        .bind(&history.pipeline_id)
        .bind(&history.user_id)
        .bind(&history.content)
        .bind(history.created_at)
        .bind(history.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_history_log(&self, log: &HistoryLogEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history_logs (id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&log.id)
        .bind(&log.content)
        .bind(log.created_at)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<Option<HistoryEntity>> {
        let row = sqlx::query(
            "SELECT id, pipeline_id, user_id, content, created_at, updated_at FROM histories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(history_from_row))
    }

    async fn get_history_log(&self, id: &str) -> Result<Option<HistoryLogEntity>> {
        let row = sqlx::query("SELECT id, content, created_at, updated_at FROM history_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| HistoryLogEntity {
            id: row.get("id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn list_histories(&self, pipeline_id: &str) -> Result<Vec<HistoryEntity>> {
        let rows = sqlx::query(
            "SELECT id, pipeline_id, user_id, content, created_at, updated_at FROM histories \
             WHERE pipeline_id = ? ORDER BY created_at DESC, id",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(history_from_row).collect())
    }
}

fn pipeline_from_row(row: &SqliteRow) -> PipelineEntity {
    PipelineEntity {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        disabled: row.get("disabled"),
        content: row.get("content"),
        status: row.get("status"),
        last_history_time: row.get("last_history_time"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn history_from_row(row: &SqliteRow) -> HistoryEntity {
    HistoryEntity {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, disabled: bool) -> PipelineEntity {
        PipelineEntity {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: format!("pipeline {}", id),
            disabled,
            content: format!(r#"{{"id":"{}"}}"#, id),
            status: None,
            last_history_time: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn pages_enabled_pipeline_ids() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        for (id, disabled) in [("a", false), ("b", true), ("c", false), ("d", false)] {
            repo.save_pipeline(&entity(id, disabled)).await.unwrap();
        }

        assert_eq!(repo.find_enabled_pipeline_ids(0, 2).await.unwrap(), vec!["a", "c"]);
        assert_eq!(repo.find_enabled_pipeline_ids(2, 2).await.unwrap(), vec!["d"]);
        assert!(repo.find_enabled_pipeline_ids(4, 2).await.unwrap().is_empty());

        let found = repo
            .find_pipelines_by_ids(&["d".to_string(), "a".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["a", "d"]);
    }

    #[tokio::test]
    async fn status_update_only_touches_status_fields() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.save_pipeline(&entity("p", false)).await.unwrap();

        repo.update_pipeline_status("p", "running", 99).await.unwrap();

        let stored = repo.get_pipeline("p").await.unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("running"));
        assert_eq!(stored.last_history_time, Some(99));
        assert_eq!(stored.title, "pipeline p");

        // re-saving the authored fields leaves run status alone
        let mut resaved = entity("p", true);
        resaved.title = "renamed".into();
        resaved.created_at = 50;
        repo.save_pipeline(&resaved).await.unwrap();

        let stored = repo.get_pipeline("p").await.unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("running"));
        assert_eq!(stored.last_history_time, Some(99));
        assert_eq!(stored.created_at, 1);
        assert_eq!(stored.title, "renamed");
        assert!(stored.disabled);

        assert_eq!(repo.delete_pipelines(&["p".to_string()]).await.unwrap(), 1);
        assert!(repo.get_pipeline("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_writes_are_upserts_on_run_id() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let mut history = HistoryEntity {
            id: "run-1".into(),
            pipeline_id: "p".into(),
            user_id: "u1".into(),
            content: "{}".into(),
            created_at: 5,
            updated_at: 5,
        };
        repo.save_history(&history).await.unwrap();

        history.content = r#"{"status":"success"}"#.into();
        history.updated_at = 6;
        repo.save_history(&history).await.unwrap();

        let histories = repo.list_histories("p").await.unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].content, r#"{"status":"success"}"#);
        assert_eq!(histories[0].created_at, 5);

        let log = HistoryLogEntity { id: "run-1".into(), content: "[]".into(), created_at: 5, updated_at: 5 };
        repo.save_history_log(&log).await.unwrap();
        repo.save_history_log(&log).await.unwrap();
        assert_eq!(repo.get_history_log("run-1").await.unwrap(), Some(log));
    }
}

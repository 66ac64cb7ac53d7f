//! SQLite-backed [`JobStateStore`] for the `local` provider.
//!
//! One row per job in the `jobs` table. Transitions are written with
//! `UPDATE … WHERE job_id = ? AND status = ?`, so a writer that lost a race
//! affects zero rows and reports [`JobStoreError::InvalidTransition`]
//! against the status it actually found.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{check_transition, timeline_for, JobStateStore, Transition};
use crate::error::JobStoreError;
use crate::models::{AsyncJob, JobStatus, Timeline};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

fn backend_err(e: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Backend(e.to_string())
}

impl SqliteJobStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, JobStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend_err)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(backend_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend_err)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `jobs` table. Idempotent.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                user_id TEXT,
                status TEXT NOT NULL,
                timeline_json TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_document_id ON jobs(document_id)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_job(row: &SqliteRow) -> Result<AsyncJob, JobStoreError> {
    let status: String = row.try_get("status").map_err(backend_err)?;
    let timeline_json: Option<String> = row.try_get("timeline_json").map_err(backend_err)?;
    let timeline = match timeline_json {
        Some(json) => Some(serde_json::from_str::<Timeline>(&json).map_err(backend_err)?),
        None => None,
    };

    Ok(AsyncJob {
        job_id: row.try_get("job_id").map_err(backend_err)?,
        document_id: row.try_get("document_id").map_err(backend_err)?,
        user_id: row.try_get("user_id").map_err(backend_err)?,
        status: JobStatus::from_str(&status).map_err(JobStoreError::Backend)?,
        created_at: millis_to_datetime(row.try_get("created_at").map_err(backend_err)?),
        updated_at: millis_to_datetime(row.try_get("updated_at").map_err(backend_err)?),
        timeline,
        error: row.try_get("error").map_err(backend_err)?,
    })
}

#[async_trait]
impl JobStateStore for SqliteJobStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn create_job(
        &self,
        document_id: &str,
        user_id: Option<&str>,
    ) -> Result<AsyncJob, JobStoreError> {
        let job = AsyncJob::new(document_id, user_id);

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, document_id, user_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.document_id)
        .bind(&job.user_id)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        // Read back so callers see the stored (millisecond) timestamps.
        self.get_job(&job.job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job.job_id.clone()))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<AsyncJob>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, document_id, user_id, status, timeline_json, error,
                   created_at, updated_at
            FROM jobs WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn apply_transition(
        &self,
        job_id: &str,
        transition: Transition<'_>,
    ) -> Result<AsyncJob, JobStoreError> {
        let current = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

        check_transition(job_id, current.status, transition.to)?;

        let timeline_json = timeline_for(&current, &transition)
            .map(|t| serde_json::to_string(&t))
            .transpose()
            .map_err(backend_err)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                timeline_json = COALESCE(?, timeline_json),
                error = COALESCE(?, error),
                updated_at = ?
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(transition.to.as_str())
        .bind(timeline_json)
        .bind(transition.error)
        .bind(Utc::now().timestamp_millis())
        .bind(job_id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        let updated = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: updated.status,
                to: transition.to,
            });
        }

        Ok(updated)
    }
}

//! Durable job queue storage
//!
//! Every pending or running job is a row here, so the dispatch loop can resume
//! after a restart with no loss of pending work. State values: `queued`,
//! `running`, `failed`. Completed jobs are removed.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// A persisted job in the queue
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJobRecord {
    pub id: i64,
    pub job_id: String,
    pub kind: String,
    pub priority: i64,
    pub category: String,
    pub concurrency_tag: String,
    pub max_concurrent: i64,
    pub guards: String,
    pub payload: String,
    pub attempts: i64,
    pub state: String,
    pub available_at: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Input for persisting a new job
#[derive(Debug, Clone)]
pub struct NewQueuedJob {
    pub job_id: String,
    pub kind: String,
    pub priority: i64,
    pub category: String,
    pub concurrency_tag: String,
    pub max_concurrent: i64,
    pub guards: String,
    pub payload: String,
}

/// Job queue repository for database operations
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a job unless a non-terminal job with the same `job_id` exists.
    ///
    /// Returns the active record and whether this call inserted it. The
    /// partial unique index on `(job_id) WHERE state IN ('queued','running')`
    /// makes the idempotency check atomic. The read-back can race the
    /// pre-existing job completing and deleting its row, in which case the
    /// insert is simply tried again.
    pub async fn insert_if_absent(&self, job: NewQueuedJob) -> Result<(QueuedJobRecord, bool)> {
        for _ in 0..3 {
            let now = OffsetDateTime::now_utc();

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO queued_jobs (
                    job_id, kind, priority, category, concurrency_tag, max_concurrent,
                    guards, payload, attempts, state, available_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 'queued', $9, $10)
                "#,
            )
            .bind(&job.job_id)
            .bind(&job.kind)
            .bind(job.priority)
            .bind(&job.category)
            .bind(&job.concurrency_tag)
            .bind(job.max_concurrent)
            .bind(&job.guards)
            .bind(&job.payload)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let inserted = result.rows_affected() > 0;

            if let Some(record) = self.get_active(&job.job_id).await? {
                return Ok((record, inserted));
            }
        }

        Err(anyhow::anyhow!("Job {} vanished after insert", job.job_id))
    }

    /// Get the non-terminal job with this `job_id`, if any
    pub async fn get_active(&self, job_id: &str) -> Result<Option<QueuedJobRecord>> {
        let record = sqlx::query_as::<_, QueuedJobRecord>(
            "SELECT * FROM queued_jobs WHERE job_id = $1 AND state IN ('queued', 'running')",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a job row by primary key
    pub async fn get_by_id(&self, id: i64) -> Result<Option<QueuedJobRecord>> {
        let record = sqlx::query_as::<_, QueuedJobRecord>("SELECT * FROM queued_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// List queued jobs whose backoff deadline has elapsed, in dispatch order
    /// (priority ascending, submission order as the tie-break)
    pub async fn list_dispatchable(&self, now: OffsetDateTime) -> Result<Vec<QueuedJobRecord>> {
        let records = sqlx::query_as::<_, QueuedJobRecord>(
            r#"
            SELECT * FROM queued_jobs
            WHERE state = 'queued' AND available_at <= $1
            ORDER BY priority ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Count running jobs per concurrency tag
    pub async fn running_counts(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT concurrency_tag, COUNT(*) FROM queued_jobs WHERE state = 'running' GROUP BY concurrency_tag",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Transition a queued job to running. Returns false if the row was
    /// claimed or removed by another worker in the meantime.
    pub async fn mark_running(&self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE queued_jobs SET state = 'running' WHERE id = $1 AND state = 'queued'")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a completed job
    pub async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM queued_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Return a job to the queue without consuming an attempt (guard deferral)
    pub async fn mark_deferred(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE queued_jobs SET state = 'queued' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a failed attempt and return the job to the queue after a backoff
    pub async fn mark_retry(
        &self,
        id: i64,
        error: &str,
        available_at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queued_jobs
            SET state = 'queued', attempts = attempts + 1, last_error = $2, available_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(available_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Terminal failure: the job is kept for the administrative view
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE queued_jobs SET state = 'failed', attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Re-queue jobs left running by a previous process (startup recovery)
    pub async fn requeue_running(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE queued_jobs SET state = 'queued' WHERE state = 'running'")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Remove all queued jobs in a category (running jobs finish)
    pub async fn clear_category(&self, category: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM queued_jobs WHERE state = 'queued' AND category = $1")
                .bind(category)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Count jobs in a given state
    pub async fn count_in_state(&self, state: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM queued_jobs WHERE state = $1")
                .bind(state)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// List terminally failed jobs for the administrative view
    pub async fn list_failed(&self) -> Result<Vec<QueuedJobRecord>> {
        let records = sqlx::query_as::<_, QueuedJobRecord>(
            "SELECT * FROM queued_jobs WHERE state = 'failed' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

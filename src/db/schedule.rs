//! Scheduled update marker database operations
//!
//! Records the last time a periodic remote sync ran, throttling re-runs
//! independently of job retries or ban state.

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// Marker for the last run of a periodic remote sync
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledUpdateRecord {
    pub id: i64,
    pub update_type: String,
    pub last_run_at: OffsetDateTime,
    pub details: Option<String>,
}

/// Scheduled update repository for database operations
pub struct ScheduledUpdateRepository {
    pool: SqlitePool,
}

impl ScheduledUpdateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, update_type: &str) -> Result<Option<ScheduledUpdateRecord>> {
        let record = sqlx::query_as::<_, ScheduledUpdateRecord>(
            "SELECT * FROM scheduled_updates WHERE update_type = $1",
        )
        .bind(update_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Record a completed run
    pub async fn mark_run(
        &self,
        update_type: &str,
        details: Option<&str>,
    ) -> Result<ScheduledUpdateRecord> {
        let record = sqlx::query_as::<_, ScheduledUpdateRecord>(
            r#"
            INSERT INTO scheduled_updates (update_type, last_run_at, details)
            VALUES ($1, $2, $3)
            ON CONFLICT (update_type)
            DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                details = EXCLUDED.details
            RETURNING *
            "#,
        )
        .bind(update_type)
        .bind(OffsetDateTime::now_utc())
        .bind(details)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Whether enough hours have passed since the last run.
    /// No marker means the sync has never run and is due.
    pub async fn is_due(&self, update_type: &str, min_hours: i64) -> Result<bool> {
        match self.get(update_type).await? {
            None => Ok(true),
            Some(record) => {
                let age = OffsetDateTime::now_utc() - record.last_run_at;
                Ok(age > time::Duration::hours(min_hours))
            }
        }
    }
}

//! Cross-reference and episode cache database operations
//!
//! Cross-references link a video to an episode with a coverage percentage.
//! Episode rows are an opaque metadata cache filled from successful remote
//! lookups; navigation is by identity, never by embedded object graphs.

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// A persisted video-to-episode link
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrossReferenceRecord {
    pub id: i64,
    pub video_id: i64,
    pub episode_id: i64,
    pub percentage: i64,
    pub created_at: OffsetDateTime,
}

/// A video-to-episode link prior to persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossReference {
    pub episode_id: i64,
    /// Coverage of the episode contributed by this video, 1-100.
    /// Single-episode files carry 100; multi-episode files partition coverage.
    pub percentage: i64,
}

/// Cross-reference repository for database operations
pub struct CrossReferenceRepository {
    pool: SqlitePool,
}

impl CrossReferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_by_video(&self, video_id: i64) -> Result<Vec<CrossReferenceRecord>> {
        let records = sqlx::query_as::<_, CrossReferenceRecord>(
            "SELECT * FROM cross_references WHERE video_id = $1 ORDER BY episode_id",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Video ids currently cross-referenced to an episode, oldest first
    pub async fn video_ids_for_episode(&self, episode_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT video_id FROM cross_references WHERE episode_id = $1 ORDER BY video_id",
        )
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Replace the cross-reference set for a video.
    ///
    /// Returns true when the persisted set actually changed.
    pub async fn replace_for_video(
        &self,
        video_id: i64,
        refs: &[CrossReference],
    ) -> Result<bool> {
        let existing: Vec<CrossReference> = self
            .list_by_video(video_id)
            .await?
            .into_iter()
            .map(|r| CrossReference {
                episode_id: r.episode_id,
                percentage: r.percentage,
            })
            .collect();

        if existing == refs {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cross_references WHERE video_id = $1")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;

        let now = OffsetDateTime::now_utc();
        for xref in refs {
            sqlx::query(
                r#"
                INSERT INTO cross_references (video_id, episode_id, percentage, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(video_id)
            .bind(xref.episode_id)
            .bind(xref.percentage)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

/// Cached episode metadata from the remote authority
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EpisodeCacheRecord {
    pub episode_id: i64,
    pub anime_id: i64,
    pub anime_title: String,
    pub episode_number: i64,
    pub title: Option<String>,
    pub updated_at: OffsetDateTime,
}

/// Input for upserting episode metadata
#[derive(Debug, Clone)]
pub struct UpsertEpisode {
    pub episode_id: i64,
    pub anime_id: i64,
    pub anime_title: String,
    pub episode_number: i64,
    pub title: Option<String>,
}

/// Episode metadata cache repository
pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, episode: UpsertEpisode) -> Result<EpisodeCacheRecord> {
        let record = sqlx::query_as::<_, EpisodeCacheRecord>(
            r#"
            INSERT INTO episodes (episode_id, anime_id, anime_title, episode_number, title, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (episode_id)
            DO UPDATE SET
                anime_id = EXCLUDED.anime_id,
                anime_title = EXCLUDED.anime_title,
                episode_number = EXCLUDED.episode_number,
                title = EXCLUDED.title,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(episode.episode_id)
        .bind(episode.anime_id)
        .bind(&episode.anime_title)
        .bind(episode.episode_number)
        .bind(&episode.title)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get(&self, episode_id: i64) -> Result<Option<EpisodeCacheRecord>> {
        let record =
            sqlx::query_as::<_, EpisodeCacheRecord>("SELECT * FROM episodes WHERE episode_id = $1")
                .bind(episode_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }
}

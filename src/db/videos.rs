//! Video, folder and location database operations
//!
//! A video is identified by its content hash; locations are the physical
//! files backing it. A video with zero locations is garbage and is purged.

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// A content-identified video in the collection
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub content_hash: String,
    pub size_bytes: i64,
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub resolution: Option<String>,
    pub source: Option<String>,
    pub imported_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Input for creating or updating a video
#[derive(Debug, Clone, Default)]
pub struct CreateVideo {
    pub content_hash: String,
    pub size_bytes: i64,
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub resolution: Option<String>,
    pub source: Option<String>,
}

/// Video repository for database operations
pub struct VideoRepository {
    pool: SqlitePool,
}

impl VideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a video by content hash. Existing digest columns are only
    /// filled in, never blanked by a sparser submission.
    pub async fn upsert(&self, video: CreateVideo) -> Result<VideoRecord> {
        let record = sqlx::query_as::<_, VideoRecord>(
            r#"
            INSERT INTO videos (content_hash, size_bytes, crc32, md5, sha1, resolution, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (content_hash)
            DO UPDATE SET
                size_bytes = EXCLUDED.size_bytes,
                crc32 = COALESCE(EXCLUDED.crc32, videos.crc32),
                md5 = COALESCE(EXCLUDED.md5, videos.md5),
                sha1 = COALESCE(EXCLUDED.sha1, videos.sha1),
                resolution = COALESCE(EXCLUDED.resolution, videos.resolution),
                source = COALESCE(EXCLUDED.source, videos.source)
            RETURNING *
            "#,
        )
        .bind(&video.content_hash)
        .bind(video.size_bytes)
        .bind(&video.crc32)
        .bind(&video.md5)
        .bind(&video.sha1)
        .bind(&video.resolution)
        .bind(&video.source)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<VideoRecord>> {
        let record = sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    pub async fn get_by_hash(&self, content_hash: &str) -> Result<Option<VideoRecord>> {
        let record =
            sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE content_hash = $1")
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// Set the import timestamp once a video has been successfully identified
    pub async fn set_imported_at(&self, id: i64, imported_at: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE videos SET imported_at = $2 WHERE id = $1")
            .bind(id)
            .bind(imported_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete the video row if it no longer has any locations.
    /// Returns true when the row was purged.
    pub async fn purge_if_orphaned(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM videos
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM video_locations WHERE video_id = $1)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// An import or library folder
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FolderRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub is_drop_source: bool,
    pub is_drop_destination: bool,
    pub created_at: OffsetDateTime,
}

/// Folder repository for database operations
pub struct FolderRepository {
    pool: SqlitePool,
}

impl FolderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find or create a folder by path
    pub async fn ensure(
        &self,
        path: &str,
        name: &str,
        is_drop_source: bool,
        is_drop_destination: bool,
    ) -> Result<FolderRecord> {
        let record = sqlx::query_as::<_, FolderRecord>(
            r#"
            INSERT INTO folders (path, name, is_drop_source, is_drop_destination, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (path)
            DO UPDATE SET
                name = EXCLUDED.name,
                is_drop_source = EXCLUDED.is_drop_source,
                is_drop_destination = EXCLUDED.is_drop_destination
            RETURNING *
            "#,
        )
        .bind(path)
        .bind(name)
        .bind(is_drop_source)
        .bind(is_drop_destination)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<FolderRecord>> {
        let record = sqlx::query_as::<_, FolderRecord>("SELECT * FROM folders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// The destination folder files are relocated into
    pub async fn drop_destination(&self) -> Result<Option<FolderRecord>> {
        let record = sqlx::query_as::<_, FolderRecord>(
            "SELECT * FROM folders WHERE is_drop_destination = 1 ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

/// One physical file path backing a video
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocationRecord {
    pub id: i64,
    pub video_id: i64,
    pub folder_id: i64,
    pub relative_path: String,
    pub created_at: OffsetDateTime,
}

/// Location repository for database operations
pub struct LocationRepository {
    pool: SqlitePool,
}

impl LocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a location. The `(folder_id, relative_path)` pair is unique;
    /// if the path now backs a different video the row is repointed.
    pub async fn upsert(
        &self,
        video_id: i64,
        folder_id: i64,
        relative_path: &str,
    ) -> Result<LocationRecord> {
        let record = sqlx::query_as::<_, LocationRecord>(
            r#"
            INSERT INTO video_locations (video_id, folder_id, relative_path, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (folder_id, relative_path)
            DO UPDATE SET video_id = EXCLUDED.video_id
            RETURNING *
            "#,
        )
        .bind(video_id)
        .bind(folder_id)
        .bind(relative_path)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<LocationRecord>> {
        let record =
            sqlx::query_as::<_, LocationRecord>("SELECT * FROM video_locations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    pub async fn list_by_video(&self, video_id: i64) -> Result<Vec<LocationRecord>> {
        let records = sqlx::query_as::<_, LocationRecord>(
            "SELECT * FROM video_locations WHERE video_id = $1 ORDER BY id",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Move a location to a new folder/path after a physical relocation
    pub async fn update_placement(
        &self,
        id: i64,
        folder_id: i64,
        relative_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE video_locations SET folder_id = $2, relative_path = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(folder_id)
        .bind(relative_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM video_locations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

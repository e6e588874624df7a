//! Hash adoption cache database operations
//!
//! Maps `(file_name, size)` to previously computed digests so re-discovering
//! a known file never re-hashes it.

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// A cached digest set for a file name and size
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HashCacheRecord {
    pub id: i64,
    pub file_name: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub updated_at: OffsetDateTime,
}

/// Input for upserting a cache entry
#[derive(Debug, Clone)]
pub struct UpsertHashCache {
    pub file_name: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

/// Hash cache repository for database operations
pub struct HashCacheRepository {
    pool: SqlitePool,
}

impl HashCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, entry: UpsertHashCache) -> Result<HashCacheRecord> {
        let record = sqlx::query_as::<_, HashCacheRecord>(
            r#"
            INSERT INTO hash_cache (file_name, size_bytes, content_hash, crc32, md5, sha1, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (file_name, size_bytes)
            DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                crc32 = COALESCE(EXCLUDED.crc32, hash_cache.crc32),
                md5 = COALESCE(EXCLUDED.md5, hash_cache.md5),
                sha1 = COALESCE(EXCLUDED.sha1, hash_cache.sha1),
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&entry.file_name)
        .bind(entry.size_bytes)
        .bind(&entry.content_hash)
        .bind(&entry.crc32)
        .bind(&entry.md5)
        .bind(&entry.sha1)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Look up cached digests for this exact file name and size
    pub async fn lookup(&self, file_name: &str, size_bytes: i64) -> Result<Option<HashCacheRecord>> {
        let record = sqlx::query_as::<_, HashCacheRecord>(
            "SELECT * FROM hash_cache WHERE file_name = $1 AND size_bytes = $2",
        )
        .bind(file_name)
        .bind(size_bytes)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

//! Database connection and operations

pub mod cross_refs;
pub mod hash_cache;
pub mod jobs;
pub mod schedule;
pub mod videos;

use std::str::FromStr;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use cross_refs::{
    CrossReference, CrossReferenceRecord, CrossReferenceRepository, EpisodeCacheRecord,
    EpisodeRepository, UpsertEpisode,
};
pub use hash_cache::{HashCacheRecord, HashCacheRepository, UpsertHashCache};
pub use jobs::{JobRepository, NewQueuedJob, QueuedJobRecord};
pub use schedule::{ScheduledUpdateRecord, ScheduledUpdateRepository};
pub use videos::{
    CreateVideo, FolderRecord, FolderRepository, LocationRecord, LocationRepository, VideoRecord,
    VideoRepository,
};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    ///
    /// Accepts a plain file path or a sqlite:// URL (including `sqlite::memory:`).
    pub async fn connect(url: &str) -> Result<Self> {
        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            SqliteConnectOptions::new().filename(url)
        }
        .create_if_missing(true)
        .foreign_keys(true);

        // An in-memory database exists per connection; a pool larger than one
        // would hand out empty databases.
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            Self::get_max_connections()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a job queue repository
    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    /// Get a video repository
    pub fn videos(&self) -> VideoRepository {
        VideoRepository::new(self.pool.clone())
    }

    /// Get a folder repository
    pub fn folders(&self) -> FolderRepository {
        FolderRepository::new(self.pool.clone())
    }

    /// Get a video location repository
    pub fn locations(&self) -> LocationRepository {
        LocationRepository::new(self.pool.clone())
    }

    /// Get a cross-reference repository
    pub fn cross_refs(&self) -> CrossReferenceRepository {
        CrossReferenceRepository::new(self.pool.clone())
    }

    /// Get an episode metadata cache repository
    pub fn episodes(&self) -> EpisodeRepository {
        EpisodeRepository::new(self.pool.clone())
    }

    /// Get a hash adoption cache repository
    pub fn hash_cache(&self) -> HashCacheRepository {
        HashCacheRepository::new(self.pool.clone())
    }

    /// Get a scheduled update marker repository
    pub fn scheduled_updates(&self) -> ScheduledUpdateRepository {
        ScheduledUpdateRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database path (SQLite). Use DATABASE_PATH or DATABASE_URL with sqlite:// prefix
    pub database_url: String,

    /// Drop folder scanned for new files
    pub import_path: String,

    /// Destination library folder for relocated files
    pub library_path: String,

    /// Worker pool size for the dispatch loop
    pub worker_pool_size: usize,

    /// Delay between dispatch cycles in milliseconds
    pub dispatch_interval_ms: u64,

    /// Retry ceiling before a job is marked failed
    pub max_attempts: i64,

    /// Base delay for exponential retry backoff, in seconds
    pub retry_backoff_secs: u64,

    /// Maximum concurrent hash jobs
    pub hasher_max_concurrent: i64,

    /// Metadata service requests allowed per minute (token bucket refill)
    pub metadata_requests_per_minute: u32,

    /// Token bucket burst size for the metadata service
    pub metadata_burst: u32,

    /// Whether CRC32 is required alongside the content hash
    pub require_crc32: bool,

    /// Whether MD5 is required alongside the content hash
    pub require_md5: bool,

    /// Whether SHA1 is required alongside the content hash
    pub require_sha1: bool,

    /// Automatically relocate files after a successful identification
    pub auto_relocate: bool,

    /// Naming pattern for relocated files
    pub naming_pattern: String,

    /// How many copies of the same episode to keep
    pub max_files_to_keep: usize,

    /// Minimum resolution rank below which surplus duplicates are deleted
    pub min_keep_resolution: u32,

    /// Never delete a file that was part of the current identification run
    pub protect_current_import: bool,

    /// Hours between library rescans
    pub rescan_hours: i64,

    /// Hours between remote calendar syncs
    pub calendar_sync_hours: i64,

    /// Hours between remote my-list syncs
    pub mylist_sync_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/ayame.db".to_string());

        Ok(Self {
            database_url,

            import_path: env::var("IMPORT_PATH").unwrap_or_else(|_| "./data/import".to_string()),

            library_path: env::var("LIBRARY_PATH").unwrap_or_else(|_| "./data/anime".to_string()),

            worker_pool_size: env::var("WORKER_POOL_SIZE")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("Invalid WORKER_POOL_SIZE")?,

            dispatch_interval_ms: env::var("DISPATCH_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),

            max_attempts: env::var("JOB_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            retry_backoff_secs: env::var("JOB_RETRY_BACKOFF_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),

            hasher_max_concurrent: env::var("HASHER_MAX_CONCURRENT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),

            metadata_requests_per_minute: env::var("METADATA_REQUESTS_PER_MINUTE")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),

            metadata_burst: env::var("METADATA_BURST")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            require_crc32: env::var("REQUIRE_CRC32")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            require_md5: env::var("REQUIRE_MD5")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            require_sha1: env::var("REQUIRE_SHA1")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            auto_relocate: env::var("AUTO_RELOCATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            naming_pattern: env::var("NAMING_PATTERN").unwrap_or_else(|_| {
                "{anime}/{anime} - {episode} - {title}.{ext}".to_string()
            }),

            max_files_to_keep: env::var("MAX_FILES_TO_KEEP")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),

            min_keep_resolution: env::var("MIN_KEEP_RESOLUTION")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),

            protect_current_import: env::var("PROTECT_CURRENT_IMPORT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            rescan_hours: env::var("RESCAN_HOURS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),

            calendar_sync_hours: env::var("CALENDAR_SYNC_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            mylist_sync_hours: env::var("MYLIST_SYNC_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
        })
    }
}

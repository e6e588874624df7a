//! Metadata client adapter
//!
//! Narrow interface over the remote metadata authority. The adapter owns
//! protocol failure classification: callers see typed errors and never
//! inspect protocol responses. Ban state is reported into the guard
//! registry by whoever catches a `Banned` error; the adapter itself stays
//! stateless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// One episode a file maps to, with coverage percentage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMatch {
    pub episode_id: i64,
    pub anime_id: i64,
    pub anime_title: String,
    pub episode_number: i64,
    pub episode_title: Option<String>,
    /// Coverage of the episode contributed by this file, 1-100
    pub percentage: i64,
}

/// Successful identification of a file by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Remote file id, when the authority assigns one
    pub remote_file_id: Option<i64>,
    /// Episodes the file maps to; one entry for single-episode files,
    /// several for multi-episode files
    pub episodes: Vec<EpisodeMatch>,
}

/// Failure classification for remote metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The authority recognised the request but has no match for the file
    #[error("file is unknown to the metadata service")]
    UnknownFile,

    /// The authority has banned this client until the given time
    #[error("banned by the metadata service until {until}")]
    Banned { until: OffsetDateTime },

    /// The authority asked us to slow down without banning
    #[error("throttled by the metadata service")]
    Throttled,

    /// Connectivity or protocol-level failure worth retrying
    #[error("metadata service request failed: {0}")]
    Transient(String),
}

/// Adapter over the remote metadata authority
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Identify a file by its content hash and size
    async fn lookup(
        &self,
        content_hash: &str,
        size_bytes: i64,
    ) -> Result<MatchResult, MetadataError>;

    /// Run one periodic remote sync (calendar, owned-collection state).
    /// Returns a short human-readable summary for the run marker.
    async fn sync(&self, sync_kind: &str) -> Result<String, MetadataError>;
}

/// Stand-in used until a real backend adapter is wired. Every lookup
/// reports the file as unknown; syncs succeed without doing anything.
#[derive(Debug, Default)]
pub struct OfflineMetadataClient;

#[async_trait]
impl MetadataClient for OfflineMetadataClient {
    async fn lookup(
        &self,
        _content_hash: &str,
        _size_bytes: i64,
    ) -> Result<MatchResult, MetadataError> {
        Err(MetadataError::UnknownFile)
    }

    async fn sync(&self, _sync_kind: &str) -> Result<String, MetadataError> {
        Ok("offline; nothing synchronised".to_string())
    }
}

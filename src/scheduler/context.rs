//! Job execution context
//!
//! Every collaborator a job may need is injected here explicitly; jobs never
//! reach for globals. The context also carries the submitter jobs use to
//! chain follow-up work and the per-video lock registry that serialises
//! file mutation against duplicate deletion.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::config::Config;
use crate::db::Database;
use crate::services::filesystem::FileSystem;
use crate::services::hasher::FileHasher;
use crate::services::metadata::MetadataClient;
use crate::services::notifications::NotificationService;
use crate::services::renamer::RenameEvaluator;

use super::descriptor::{JobDescriptor, JobHandle};
use super::guards::GuardRegistry;

/// Pipeline behaviour knobs derived from application configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub require_crc32: bool,
    pub require_md5: bool,
    pub require_sha1: bool,
    pub auto_relocate: bool,
    pub hasher_max_concurrent: i64,
    pub max_files_to_keep: usize,
    pub min_keep_resolution: u32,
    pub protect_current_import: bool,
    pub calendar_sync_hours: i64,
    pub mylist_sync_hours: i64,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            require_crc32: config.require_crc32,
            require_md5: config.require_md5,
            require_sha1: config.require_sha1,
            auto_relocate: config.auto_relocate,
            hasher_max_concurrent: config.hasher_max_concurrent,
            max_files_to_keep: config.max_files_to_keep,
            min_keep_resolution: config.min_keep_resolution,
            protect_current_import: config.protect_current_import,
            calendar_sync_hours: config.calendar_sync_hours,
            mylist_sync_hours: config.mylist_sync_hours,
        }
    }
}

/// Handle jobs use to submit follow-up work.
///
/// Submission is a durable row insert; the dispatch loop picks it up on the
/// next cycle, so there is no direct coupling back to the scheduler.
#[derive(Clone)]
pub struct JobSubmitter {
    db: Database,
}

impl JobSubmitter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent on `job_id`: re-submitting while a non-terminal job exists
    /// returns the existing job's handle.
    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobHandle> {
        let job_id = descriptor.job_id.clone();
        let (record, inserted) = self.db.jobs().insert_if_absent(descriptor.into_new_row()).await?;

        if inserted {
            debug!(job_id = %job_id, kind = %record.kind, "Job submitted");
        } else {
            debug!(job_id = %job_id, "Duplicate submission collapsed into existing job");
        }

        Ok(JobHandle {
            id: record.id,
            job_id,
            newly_submitted: inserted,
        })
    }
}

/// Per-video async locks serialising relocation against duplicate deletion
#[derive(Default)]
pub struct VideoLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl VideoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a video for the duration of a file mutation.
    /// Entries nobody holds any more are pruned on the way in, so the
    /// registry does not grow with every video ever touched.
    pub async fn lock(&self, video_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|id, lock| *id == video_id || Arc::strong_count(lock) > 1);
            locks
                .entry(video_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}


/// Everything a job body may touch, injected explicitly
pub struct JobContext {
    pub db: Database,
    pub settings: PipelineSettings,
    pub metadata: Arc<dyn MetadataClient>,
    pub hasher: Arc<dyn FileHasher>,
    pub fs: Arc<dyn FileSystem>,
    pub renamer: Arc<dyn RenameEvaluator>,
    pub notifications: Arc<NotificationService>,
    pub guards: Arc<GuardRegistry>,
    pub submitter: JobSubmitter,
    pub video_locks: Arc<VideoLocks>,
}

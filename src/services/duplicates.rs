//! Duplicate copy resolution
//!
//! When an episode accumulates more copies than the configured keep count,
//! the surplus is removed. Planning is a pure function over the candidate
//! set so the same library state always yields the same decision; applying
//! the plan takes each video's mutation lock so deletion never races a
//! relocation of the same file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::db::Database;
use crate::scheduler::VideoLocks;
use crate::services::filesystem::FileSystem;
use crate::services::notifications::{NotificationService, PipelineEvent};
use crate::services::quality::QualityProfile;

/// One copy of an episode under consideration
#[derive(Debug, Clone)]
pub struct CopyCandidate {
    pub video_id: i64,
    pub quality: QualityProfile,
    /// Deterministic tie-break when qualities are equal
    pub content_hash: String,
    /// Part of the identification run that triggered resolution
    pub current_import: bool,
}

/// Retention settings for duplicate resolution
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_files_to_keep: usize,
    /// Surplus copies at or above this vertical resolution are kept anyway;
    /// zero disables the floor and all surplus copies are removable
    pub min_keep_resolution: u32,
    pub protect_current_import: bool,
}

/// Plan: which candidate videos to keep and which to remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<i64>,
    pub remove: Vec<i64>,
}

/// Rank candidates and decide which surplus copies to remove.
///
/// Candidates are ordered best-first by quality with the content hash as a
/// total tie-break, so the plan is deterministic for a given library state.
pub fn plan_retention(mut candidates: Vec<CopyCandidate>, policy: RetentionPolicy) -> RetentionPlan {
    candidates.sort_by(|a, b| {
        b.quality
            .rank()
            .cmp(&a.quality.rank())
            .then_with(|| a.content_hash.cmp(&b.content_hash))
    });

    let mut keep = Vec::new();
    let mut remove = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        if index < policy.max_files_to_keep.max(1) {
            keep.push(candidate.video_id);
            continue;
        }

        let above_floor = policy.min_keep_resolution > 0
            && candidate.quality.resolution.unwrap_or(0) >= policy.min_keep_resolution;
        let protected = policy.protect_current_import && candidate.current_import;

        if above_floor || protected {
            keep.push(candidate.video_id);
        } else {
            remove.push(candidate.video_id);
        }
    }

    RetentionPlan { keep, remove }
}

/// Applies retention plans to the library
pub struct DuplicateResolver {
    db: Database,
    fs: Arc<dyn FileSystem>,
    locks: Arc<VideoLocks>,
    notifications: Arc<NotificationService>,
    policy: RetentionPolicy,
}

impl DuplicateResolver {
    pub fn new(
        db: Database,
        fs: Arc<dyn FileSystem>,
        locks: Arc<VideoLocks>,
        notifications: Arc<NotificationService>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            db,
            fs,
            locks,
            notifications,
            policy,
        }
    }

    /// Resolve duplicates for one episode after `current_video_id` was
    /// identified against it. Returns how many copies were removed.
    pub async fn resolve_episode(&self, episode_id: i64, current_video_id: i64) -> Result<usize> {
        let video_ids = self.db.cross_refs().video_ids_for_episode(episode_id).await?;
        if video_ids.len() <= self.policy.max_files_to_keep.max(1) {
            return Ok(0);
        }

        let mut candidates = Vec::with_capacity(video_ids.len());
        for video_id in video_ids {
            let Some(video) = self.db.videos().get_by_id(video_id).await? else {
                continue;
            };
            candidates.push(CopyCandidate {
                video_id,
                quality: QualityProfile::from_stored(
                    video.resolution.as_deref(),
                    video.source.as_deref(),
                ),
                content_hash: video.content_hash,
                current_import: video_id == current_video_id,
            });
        }

        let plan = plan_retention(candidates, self.policy);
        debug!(episode_id, keep = ?plan.keep, remove = ?plan.remove, "Duplicate retention planned");

        let mut removed = 0;
        for video_id in plan.remove {
            self.remove_video_files(video_id).await?;
            removed += 1;
        }

        if removed > 0 {
            info!(episode_id, removed, "Surplus duplicate copies removed");
        }
        Ok(removed)
    }

    /// Delete every physical file backing a video, then its rows.
    /// Holds the video's mutation lock for the whole removal.
    async fn remove_video_files(&self, video_id: i64) -> Result<()> {
        let _guard = self.locks.lock(video_id).await;

        for location in self.db.locations().list_by_video(video_id).await? {
            let Some(folder) = self.db.folders().get_by_id(location.folder_id).await? else {
                continue;
            };
            let path = PathBuf::from(&folder.path).join(&location.relative_path);

            if self.fs.exists(&path).await {
                self.fs
                    .delete_file(&path)
                    .await
                    .with_context(|| format!("Failed to delete duplicate {}", path.display()))?;
            }
            self.db.locations().delete(location.id).await?;

            self.notifications.publish(PipelineEvent::DuplicateRemoved {
                video_id,
                path: path.display().to_string(),
            });
        }

        self.db.videos().purge_if_orphaned(video_id).await?;
        Ok(())
    }
}

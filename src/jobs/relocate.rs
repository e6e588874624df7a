//! Relocation stage
//!
//! Moves an identified file into the library under the configured naming
//! pattern and repoints its location row. Holds the video's mutation lock
//! for the physical move, and is a no-op when the file already sits at its
//! computed destination.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::scheduler::{ExecutionInfo, JobContext, JobRunner, Outcome};
use crate::services::notifications::PipelineEvent;
use crate::services::renamer::RenameInput;

use super::RelocatePayload;

pub struct RelocateJob {
    payload: RelocatePayload,
}

impl RelocateJob {
    pub fn new(payload: RelocatePayload) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl JobRunner for RelocateJob {
    async fn run(&self, ctx: &JobContext, _exec: ExecutionInfo) -> Result<Outcome> {
        let _guard = ctx.video_locks.lock(self.payload.video_id).await;

        let Some(location) = ctx.db.locations().get_by_id(self.payload.location_id).await? else {
            // Removed as a surplus duplicate while this job waited
            debug!(location_id = self.payload.location_id, "Location gone; relocation skipped");
            return Ok(Outcome::Done);
        };

        let refs = ctx.db.cross_refs().list_by_video(location.video_id).await?;
        let Some(primary) = refs.first() else {
            return Ok(Outcome::Fatal("video has no episode links".to_string()));
        };
        let episode = ctx
            .db
            .episodes()
            .get(primary.episode_id)
            .await?
            .ok_or_else(|| anyhow!("episode {} missing from cache", primary.episode_id))?;

        let Some(destination_folder) = ctx.db.folders().drop_destination().await? else {
            return Ok(Outcome::Fatal("no destination folder configured".to_string()));
        };

        let extension = Path::new(&location.relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mkv")
            .to_string();
        let mut relative_dest = ctx.renamer.destination(&RenameInput {
            anime_title: episode.anime_title,
            episode_number: episode.episode_number,
            episode_title: episode.title,
            extension,
        })?;

        let source_folder = ctx
            .db
            .folders()
            .get_by_id(location.folder_id)
            .await?
            .ok_or_else(|| anyhow!("folder {} does not exist", location.folder_id))?;
        let source = PathBuf::from(&source_folder.path).join(&location.relative_path);
        let mut target = PathBuf::from(&destination_folder.path).join(&relative_dest);

        if target == source {
            return Ok(Outcome::Done);
        }

        // A different file already at the target: disambiguate with a short
        // content hash suffix rather than overwriting
        if ctx.fs.exists(&target).await && ctx.fs.exists(&source).await {
            let video = ctx
                .db
                .videos()
                .get_by_id(location.video_id)
                .await?
                .ok_or_else(|| anyhow!("video {} does not exist", location.video_id))?;
            relative_dest = suffix_with_hash(&relative_dest, &video.content_hash);
            target = PathBuf::from(&destination_folder.path).join(&relative_dest);
        }

        if !ctx.fs.exists(&source).await {
            if ctx.fs.exists(&target).await {
                // Moved by a previous attempt that died before the row update
                debug!(target = %target.display(), "File already at destination");
            } else {
                return Ok(Outcome::Fatal(format!(
                    "nothing to relocate: {} is gone",
                    source.display()
                )));
            }
        } else {
            ctx.fs.move_file(&source, &target).await?;
        }

        let relative = relative_dest.to_string_lossy().replace('\\', "/");
        ctx.db
            .locations()
            .update_placement(location.id, destination_folder.id, &relative)
            .await?;

        info!(
            video_id = location.video_id,
            destination = %target.display(),
            "File relocated into the library"
        );
        ctx.notifications.publish(PipelineEvent::FileRelocated {
            video_id: location.video_id,
            location_id: location.id,
            destination: target.display().to_string(),
        });

        Ok(Outcome::Done)
    }
}

fn suffix_with_hash(relative_dest: &Path, content_hash: &str) -> PathBuf {
    let short = &content_hash[..content_hash.len().min(8)];
    let stem = relative_dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let file_name = match relative_dest.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem} [{short}].{ext}"),
        None => format!("{stem} [{short}]"),
    };
    relative_dest.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_suffix_lands_before_the_extension() {
        let dest = PathBuf::from("Show/Show - 01 - Title.mkv");
        let suffixed = suffix_with_hash(&dest, "b94d27b9934d3e08");
        assert_eq!(suffixed, PathBuf::from("Show/Show - 01 - Title [b94d27b9].mkv"));
    }
}

//! File discovery stage
//!
//! Checks the hash adoption cache before committing to a full read of the
//! file. A cache hit that satisfies the digest requirements skips hashing
//! entirely and goes straight to identification.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::db::CreateVideo;
use crate::scheduler::{ExecutionInfo, JobContext, JobRunner, Outcome};
use crate::services::hasher::DigestRequest;
use crate::services::quality;

use super::{DiscoverPayload, hash_descriptor, identify_descriptor};

pub struct DiscoverJob {
    payload: DiscoverPayload,
}

impl DiscoverJob {
    pub fn new(payload: DiscoverPayload) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl JobRunner for DiscoverJob {
    async fn run(&self, ctx: &JobContext, _exec: ExecutionInfo) -> Result<Outcome> {
        let folder = ctx
            .db
            .folders()
            .get_by_id(self.payload.folder_id)
            .await?
            .ok_or_else(|| anyhow!("folder {} does not exist", self.payload.folder_id))?;

        let path = PathBuf::from(&folder.path).join(&self.payload.relative_path);

        // A file that vanished between scan and discovery is simply gone
        if !ctx.fs.exists(&path).await {
            debug!(path = %path.display(), "File vanished before discovery");
            return Ok(Outcome::Done);
        }
        let size_bytes = ctx.fs.size(&path).await?;

        let file_name = file_name_of(&self.payload.relative_path);
        let required = DigestRequest {
            crc32: ctx.settings.require_crc32,
            md5: ctx.settings.require_md5,
            sha1: ctx.settings.require_sha1,
        };

        if let Some(cached) = ctx.db.hash_cache().lookup(file_name, size_bytes).await? {
            let satisfied = (!required.crc32 || cached.crc32.is_some())
                && (!required.md5 || cached.md5.is_some())
                && (!required.sha1 || cached.sha1.is_some());

            if satisfied {
                info!(
                    file = file_name,
                    content_hash = %cached.content_hash,
                    "Digests adopted from cache; skipping hash stage"
                );

                let video = ctx
                    .db
                    .videos()
                    .upsert(CreateVideo {
                        content_hash: cached.content_hash,
                        size_bytes,
                        crc32: cached.crc32,
                        md5: cached.md5,
                        sha1: cached.sha1,
                        resolution: quality::parse_resolution(file_name).map(|r| format!("{r}p")),
                        source: quality::parse_source(file_name).map(str::to_string),
                    })
                    .await?;
                let location = ctx
                    .db
                    .locations()
                    .upsert(video.id, folder.id, &self.payload.relative_path)
                    .await?;

                // Identification is only worth queueing while the video has
                // no episode links yet
                if ctx.db.cross_refs().list_by_video(video.id).await?.is_empty() {
                    ctx.submitter
                        .submit(identify_descriptor(video.id, location.id))
                        .await?;
                }
                return Ok(Outcome::Done);
            }
        }

        ctx.submitter
            .submit(hash_descriptor(
                folder.id,
                &self.payload.relative_path,
                ctx.settings.hasher_max_concurrent,
            ))
            .await?;
        Ok(Outcome::Done)
    }
}

/// Final path component of a folder-relative path
pub(super) fn file_name_of(relative_path: &str) -> &str {
    Path::new(relative_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(relative_path)
}

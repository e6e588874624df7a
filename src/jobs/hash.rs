//! Digest computation stage
//!
//! One streaming pass produces the content hash plus whichever auxiliary
//! digests are required. Results feed the adoption cache so the same file
//! name and size is never hashed twice.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::info;

use crate::db::{CreateVideo, UpsertHashCache};
use crate::scheduler::{ExecutionInfo, JobContext, JobRunner, Outcome};
use crate::services::hasher::DigestRequest;
use crate::services::quality;

use super::discover::file_name_of;
use super::{HashPayload, identify_descriptor};

pub struct HashJob {
    payload: HashPayload,
}

impl HashJob {
    pub fn new(payload: HashPayload) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl JobRunner for HashJob {
    async fn run(&self, ctx: &JobContext, _exec: ExecutionInfo) -> Result<Outcome> {
        let folder = ctx
            .db
            .folders()
            .get_by_id(self.payload.folder_id)
            .await?
            .ok_or_else(|| anyhow!("folder {} does not exist", self.payload.folder_id))?;

        let path = PathBuf::from(&folder.path).join(&self.payload.relative_path);

        // Discovery saw this file; its absence now is likely a move in
        // progress, so retry rather than silently dropping it
        if !ctx.fs.exists(&path).await {
            return Ok(Outcome::Retry(format!(
                "file missing at hash time: {}",
                path.display()
            )));
        }

        let request = DigestRequest {
            crc32: ctx.settings.require_crc32,
            md5: ctx.settings.require_md5,
            sha1: ctx.settings.require_sha1,
        };
        let digests = ctx.hasher.digest(&path, request).await?;

        let file_name = file_name_of(&self.payload.relative_path);
        ctx.db
            .hash_cache()
            .upsert(UpsertHashCache {
                file_name: file_name.to_string(),
                size_bytes: digests.size_bytes,
                content_hash: digests.content_hash.clone(),
                crc32: digests.crc32.clone(),
                md5: digests.md5.clone(),
                sha1: digests.sha1.clone(),
            })
            .await?;

        let video = ctx
            .db
            .videos()
            .upsert(CreateVideo {
                content_hash: digests.content_hash.clone(),
                size_bytes: digests.size_bytes,
                crc32: digests.crc32,
                md5: digests.md5,
                sha1: digests.sha1,
                resolution: quality::parse_resolution(file_name).map(|r| format!("{r}p")),
                source: quality::parse_source(file_name).map(str::to_string),
            })
            .await?;
        let location = ctx
            .db
            .locations()
            .upsert(video.id, folder.id, &self.payload.relative_path)
            .await?;

        info!(
            file = file_name,
            video_id = video.id,
            content_hash = %digests.content_hash,
            "File hashed and registered"
        );

        ctx.submitter
            .submit(identify_descriptor(video.id, location.id))
            .await?;
        Ok(Outcome::Done)
    }
}

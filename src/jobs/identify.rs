//! Remote identification stage
//!
//! Consults the local cross-reference cache first; only an unknown video
//! goes out to the metadata authority. A successful match persists the
//! episode links, resolves surplus duplicates and chains the relocation.
//! Ban and throttle responses defer the job without consuming an attempt,
//! and a genuine "no match" is not an error: unreleased or obscure content
//! is simply left unidentified until a later rediscovery.

use anyhow::Result;
use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::db::{CrossReference, UpsertEpisode};
use crate::scheduler::{ExecutionInfo, GuardKind, JobContext, JobRunner, Outcome};
use crate::services::duplicates::{DuplicateResolver, RetentionPolicy};
use crate::services::metadata::{MatchResult, MetadataError};
use crate::services::notifications::PipelineEvent;

use super::{IdentifyPayload, relocate_descriptor};

pub struct IdentifyJob {
    payload: IdentifyPayload,
}

impl IdentifyJob {
    pub fn new(payload: IdentifyPayload) -> Self {
        Self { payload }
    }

    async fn submit_relocate(&self, ctx: &JobContext) -> Result<()> {
        // The video may have lost its location to a better copy in the
        // meantime; only an existing location is worth moving
        if ctx.settings.auto_relocate
            && ctx
                .db
                .locations()
                .get_by_id(self.payload.location_id)
                .await?
                .is_some()
        {
            ctx.submitter
                .submit(relocate_descriptor(
                    self.payload.video_id,
                    self.payload.location_id,
                ))
                .await?;
        }
        Ok(())
    }

    async fn apply_match(
        &self,
        ctx: &JobContext,
        matched: MatchResult,
        exec: ExecutionInfo,
    ) -> Result<Outcome> {
        let video_id = self.payload.video_id;

        for episode in &matched.episodes {
            ctx.db
                .episodes()
                .upsert(UpsertEpisode {
                    episode_id: episode.episode_id,
                    anime_id: episode.anime_id,
                    anime_title: episode.anime_title.clone(),
                    episode_number: episode.episode_number,
                    title: episode.episode_title.clone(),
                })
                .await?;
        }

        let refs: Vec<CrossReference> = matched
            .episodes
            .iter()
            .map(|e| CrossReference {
                episode_id: e.episode_id,
                percentage: e.percentage,
            })
            .collect();
        let changed = ctx.db.cross_refs().replace_for_video(video_id, &refs).await?;

        ctx.db
            .videos()
            .set_imported_at(video_id, OffsetDateTime::now_utc())
            .await?;

        info!(
            video_id,
            episodes = matched.episodes.len(),
            changed,
            "Video identified"
        );
        ctx.notifications.publish(PipelineEvent::FileMatched {
            video_id,
            location_id: self.payload.location_id,
            attempts: exec.attempt,
            cross_refs_changed: changed,
            banned_until: ctx.guards.ban_until(GuardKind::MetadataServer),
        });

        let resolver = DuplicateResolver::new(
            ctx.db.clone(),
            ctx.fs.clone(),
            ctx.video_locks.clone(),
            ctx.notifications.clone(),
            RetentionPolicy {
                max_files_to_keep: ctx.settings.max_files_to_keep,
                min_keep_resolution: ctx.settings.min_keep_resolution,
                protect_current_import: ctx.settings.protect_current_import,
            },
        );
        for episode in &matched.episodes {
            resolver.resolve_episode(episode.episode_id, video_id).await?;
        }

        self.submit_relocate(ctx).await?;
        Ok(Outcome::Done)
    }
}

#[async_trait]
impl JobRunner for IdentifyJob {
    async fn run(&self, ctx: &JobContext, exec: ExecutionInfo) -> Result<Outcome> {
        let Some(video) = ctx.db.videos().get_by_id(self.payload.video_id).await? else {
            // Deleted since submission; nothing left to identify
            return Ok(Outcome::Done);
        };

        // Already identified: nothing to ask the remote service
        if !ctx.db.cross_refs().list_by_video(video.id).await?.is_empty() {
            debug!(video_id = video.id, "Cross-references already present; skipping lookup");
            self.submit_relocate(ctx).await?;
            return Ok(Outcome::Done);
        }

        match ctx.metadata.lookup(&video.content_hash, video.size_bytes).await {
            Ok(matched) => self.apply_match(ctx, matched, exec).await,

            Err(MetadataError::UnknownFile) => {
                info!(
                    video_id = video.id,
                    attempt = exec.attempt,
                    "Metadata service does not know this file; leaving it unidentified"
                );
                ctx.notifications.publish(PipelineEvent::FileNotMatched {
                    video_id: video.id,
                    location_id: self.payload.location_id,
                    attempts: exec.attempt,
                    banned_until: ctx.guards.ban_until(GuardKind::MetadataServer),
                });
                Ok(Outcome::Done)
            }

            Err(MetadataError::Banned { until }) => {
                ctx.guards.report_ban(GuardKind::MetadataServer, until);
                ctx.notifications
                    .publish(PipelineEvent::ServiceBanned { until });
                Ok(Outcome::Defer)
            }

            Err(MetadataError::Throttled) => Ok(Outcome::Defer),

            Err(MetadataError::Transient(reason)) => Ok(Outcome::Retry(reason)),
        }
    }
}

//! Periodic remote synchronisation
//!
//! Each sync kind carries its own run marker; a sync that ran recently
//! enough completes immediately without touching the remote service, so
//! retries and restarts never double-run a sync.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::scheduler::{ExecutionInfo, GuardKind, JobContext, JobRunner, Outcome};
use crate::services::metadata::MetadataError;
use crate::services::notifications::PipelineEvent;

use super::{RemoteSyncPayload, SYNC_CALENDAR, SYNC_MYLIST};

pub struct RemoteSyncJob {
    payload: RemoteSyncPayload,
}

impl RemoteSyncJob {
    pub fn new(payload: RemoteSyncPayload) -> Self {
        Self { payload }
    }

    fn min_hours(&self, ctx: &JobContext) -> i64 {
        match self.payload.sync_kind.as_str() {
            SYNC_CALENDAR => ctx.settings.calendar_sync_hours,
            SYNC_MYLIST => ctx.settings.mylist_sync_hours,
            _ => 24,
        }
    }
}

#[async_trait]
impl JobRunner for RemoteSyncJob {
    async fn run(&self, ctx: &JobContext, _exec: ExecutionInfo) -> Result<Outcome> {
        let kind = self.payload.sync_kind.as_str();

        // Force overrides the schedule marker, never the ban guard
        if !self.payload.force
            && !ctx
                .db
                .scheduled_updates()
                .is_due(kind, self.min_hours(ctx))
                .await?
        {
            info!(sync = kind, "Sync ran recently; skipping");
            return Ok(Outcome::Done);
        }

        match ctx.metadata.sync(kind).await {
            Ok(summary) => {
                ctx.db
                    .scheduled_updates()
                    .mark_run(kind, Some(&summary))
                    .await?;
                info!(sync = kind, summary = %summary, "Remote sync complete");
                Ok(Outcome::Done)
            }
            Err(MetadataError::Banned { until }) => {
                ctx.guards.report_ban(GuardKind::MetadataServer, until);
                ctx.notifications
                    .publish(PipelineEvent::ServiceBanned { until });
                Ok(Outcome::Defer)
            }
            Err(MetadataError::Throttled) => Ok(Outcome::Defer),
            Err(e) => {
                warn!(sync = kind, error = %e, "Remote sync failed");
                Ok(Outcome::Retry(e.to_string()))
            }
        }
    }
}

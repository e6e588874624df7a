//! Identification pipeline jobs
//!
//! Each job is one pipeline stage: discover, hash, identify, relocate, plus
//! the periodic remote syncs. Stages chain by durable submission, so a crash
//! between stages loses nothing. Job ids are deterministic functions of the
//! job's key parameters, which is what makes re-submission collapse.

pub mod discover;
pub mod hash;
pub mod identify;
pub mod relocate;
pub mod remote_sync;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::scheduler::{GuardKind, JobCategory, JobDescriptor, JobFactory, JobRunner};

pub use discover::DiscoverJob;
pub use hash::HashJob;
pub use identify::IdentifyJob;
pub use relocate::RelocateJob;
pub use remote_sync::RemoteSyncJob;

pub const KIND_DISCOVER: &str = "discover-file";
pub const KIND_HASH: &str = "hash-file";
pub const KIND_IDENTIFY: &str = "identify-file";
pub const KIND_RELOCATE: &str = "relocate-file";
pub const KIND_REMOTE_SYNC: &str = "remote-sync";

/// Remote sync kinds for the schedule category
pub const SYNC_CALENDAR: &str = "calendar";
pub const SYNC_MYLIST: &str = "mylist";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPayload {
    pub folder_id: i64,
    pub relative_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashPayload {
    pub folder_id: i64,
    pub relative_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub video_id: i64,
    pub location_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocatePayload {
    pub video_id: i64,
    pub location_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSyncPayload {
    pub sync_kind: String,
    /// Skip the schedule-marker check (never skips the ban guard)
    #[serde(default)]
    pub force: bool,
}

/// Discovery of one file in an import folder
pub fn discover_descriptor(folder_id: i64, relative_path: &str) -> JobDescriptor {
    JobDescriptor {
        job_id: format!("{KIND_DISCOVER}:{folder_id}:{relative_path}"),
        kind: KIND_DISCOVER.to_string(),
        priority: 40,
        category: JobCategory::General,
        concurrency_tag: "discover".to_string(),
        max_concurrent: 4,
        guards: Vec::new(),
        payload: serde_json::json!(DiscoverPayload {
            folder_id,
            relative_path: relative_path.to_string(),
        }),
    }
}

/// Digest computation for one file; bounded by the hasher pool
pub fn hash_descriptor(folder_id: i64, relative_path: &str, max_concurrent: i64) -> JobDescriptor {
    JobDescriptor {
        job_id: format!("{KIND_HASH}:{folder_id}:{relative_path}"),
        kind: KIND_HASH.to_string(),
        priority: 30,
        category: JobCategory::Hasher,
        concurrency_tag: "hasher".to_string(),
        max_concurrent,
        guards: Vec::new(),
        payload: serde_json::json!(HashPayload {
            folder_id,
            relative_path: relative_path.to_string(),
        }),
    }
}

/// Remote identification of one video. Serialised on the metadata tag and
/// guarded against bans and the request rate limit.
pub fn identify_descriptor(video_id: i64, location_id: i64) -> JobDescriptor {
    JobDescriptor {
        job_id: format!("{KIND_IDENTIFY}:{video_id}"),
        kind: KIND_IDENTIFY.to_string(),
        priority: 10,
        category: JobCategory::General,
        concurrency_tag: "metadata".to_string(),
        max_concurrent: 1,
        guards: vec![GuardKind::MetadataServer, GuardKind::MetadataRateLimit],
        payload: serde_json::json!(IdentifyPayload {
            video_id,
            location_id,
        }),
    }
}

/// Physical move of one identified file into the library. Serialised per
/// video so it cannot race duplicate deletion.
pub fn relocate_descriptor(video_id: i64, location_id: i64) -> JobDescriptor {
    JobDescriptor {
        job_id: format!("{KIND_RELOCATE}:{location_id}"),
        kind: KIND_RELOCATE.to_string(),
        priority: 20,
        category: JobCategory::General,
        concurrency_tag: format!("video:{video_id}"),
        max_concurrent: 1,
        guards: Vec::new(),
        payload: serde_json::json!(RelocatePayload {
            video_id,
            location_id,
        }),
    }
}

/// One periodic remote sync run
pub fn remote_sync_descriptor(sync_kind: &str) -> JobDescriptor {
    sync_descriptor(sync_kind, false)
}

/// A sync run that ignores the schedule marker (the ban guard still applies)
pub fn forced_remote_sync_descriptor(sync_kind: &str) -> JobDescriptor {
    sync_descriptor(sync_kind, true)
}

fn sync_descriptor(sync_kind: &str, force: bool) -> JobDescriptor {
    let suffix = if force { ":forced" } else { "" };
    JobDescriptor {
        job_id: format!("{KIND_REMOTE_SYNC}:{sync_kind}{suffix}"),
        kind: KIND_REMOTE_SYNC.to_string(),
        priority: 50,
        category: JobCategory::Schedule,
        concurrency_tag: "metadata".to_string(),
        max_concurrent: 1,
        guards: vec![GuardKind::MetadataServer, GuardKind::MetadataRateLimit],
        payload: serde_json::json!(RemoteSyncPayload {
            sync_kind: sync_kind.to_string(),
            force,
        }),
    }
}

/// Factory for the closed set of pipeline job kinds
#[derive(Debug, Default)]
pub struct PipelineJobFactory;

impl JobFactory for PipelineJobFactory {
    fn build(&self, kind: &str, payload: &JsonValue) -> Result<Box<dyn JobRunner>> {
        match kind {
            KIND_DISCOVER => {
                let payload: DiscoverPayload = serde_json::from_value(payload.clone())?;
                Ok(Box::new(DiscoverJob::new(payload)))
            }
            KIND_HASH => {
                let payload: HashPayload = serde_json::from_value(payload.clone())?;
                Ok(Box::new(HashJob::new(payload)))
            }
            KIND_IDENTIFY => {
                let payload: IdentifyPayload = serde_json::from_value(payload.clone())?;
                Ok(Box::new(IdentifyJob::new(payload)))
            }
            KIND_RELOCATE => {
                let payload: RelocatePayload = serde_json::from_value(payload.clone())?;
                Ok(Box::new(RelocateJob::new(payload)))
            }
            KIND_REMOTE_SYNC => {
                let payload: RemoteSyncPayload = serde_json::from_value(payload.clone())?;
                Ok(Box::new(RemoteSyncJob::new(payload)))
            }
            other => Err(anyhow!("unknown job kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_deterministic() {
        let a = discover_descriptor(1, "season 1/ep01.mkv");
        let b = discover_descriptor(1, "season 1/ep01.mkv");
        assert_eq!(a.job_id, b.job_id);

        let c = discover_descriptor(2, "season 1/ep01.mkv");
        assert_ne!(a.job_id, c.job_id);
    }

    #[test]
    fn identify_jobs_carry_the_metadata_guards() {
        let descriptor = identify_descriptor(7, 3);
        assert_eq!(descriptor.concurrency_tag, "metadata");
        assert_eq!(descriptor.max_concurrent, 1);
        assert_eq!(
            descriptor.guards,
            vec![GuardKind::MetadataServer, GuardKind::MetadataRateLimit]
        );
    }

    #[test]
    fn factory_rejects_unknown_kinds() {
        let factory = PipelineJobFactory;
        assert!(factory.build("defragment-library", &serde_json::json!({})).is_err());
    }

    #[test]
    fn factory_builds_every_pipeline_kind() {
        let factory = PipelineJobFactory;
        for descriptor in [
            discover_descriptor(1, "a.mkv"),
            hash_descriptor(1, "a.mkv", 2),
            identify_descriptor(1, 1),
            relocate_descriptor(1, 1),
            remote_sync_descriptor(SYNC_CALENDAR),
        ] {
            factory
                .build(&descriptor.kind, &descriptor.payload)
                .unwrap_or_else(|e| panic!("{} should build: {e}", descriptor.kind));
        }
    }
}

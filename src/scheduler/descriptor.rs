//! Job descriptors and execution outcomes
//!
//! A descriptor is an immutable, serializable unit of work. Job kinds form a
//! closed set mapped through an explicit factory; there is no runtime type
//! discovery.

use serde_json::Value as JsonValue;

use crate::db::NewQueuedJob;

/// Independently pausable bucket of job types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCategory {
    /// CPU/IO heavy digest work
    Hasher,
    /// Identification, relocation and everything else
    General,
    /// Periodic remote syncs
    Schedule,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Hasher => "hasher",
            JobCategory::General => "general",
            JobCategory::Schedule => "schedule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hasher" => Some(JobCategory::Hasher),
            "general" => Some(JobCategory::General),
            "schedule" => Some(JobCategory::Schedule),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateful gates a job must pass before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// The remote metadata service has banned us; everything touching it waits
    MetadataServer,
    /// Token bucket protecting the metadata service from request bursts
    MetadataRateLimit,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::MetadataServer => "metadata-server",
            GuardKind::MetadataRateLimit => "metadata-rate-limit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metadata-server" => Some(GuardKind::MetadataServer),
            "metadata-rate-limit" => Some(GuardKind::MetadataRateLimit),
            _ => None,
        }
    }

    /// Parse a comma-separated guard list as stored on a job row
    pub fn parse_list(s: &str) -> Vec<GuardKind> {
        s.split(',')
            .filter(|part| !part.is_empty())
            .filter_map(GuardKind::parse)
            .collect()
    }

    pub fn join_list(guards: &[GuardKind]) -> String {
        guards
            .iter()
            .map(|g| g.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// An immutable, serializable unit of work
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Deterministic identity derived from job kind + key parameters;
    /// duplicate submissions of the same id collapse into one pending job
    pub job_id: String,
    /// Registered job kind tag
    pub kind: String,
    /// Lower is scheduled sooner
    pub priority: i64,
    pub category: JobCategory,
    /// Jobs sharing a tag never exceed `max_concurrent` running instances
    pub concurrency_tag: String,
    pub max_concurrent: i64,
    pub guards: Vec<GuardKind>,
    /// Typed parameters, serialized
    pub payload: JsonValue,
}

impl JobDescriptor {
    pub(crate) fn into_new_row(self) -> NewQueuedJob {
        NewQueuedJob {
            job_id: self.job_id,
            kind: self.kind,
            priority: self.priority,
            category: self.category.as_str().to_string(),
            concurrency_tag: self.concurrency_tag,
            max_concurrent: self.max_concurrent,
            guards: GuardKind::join_list(&self.guards),
            payload: self.payload.to_string(),
        }
    }
}

/// Handle returned from a submission
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Row id of the active job (submission order)
    pub id: i64,
    pub job_id: String,
    /// False when an equivalent non-terminal job already existed
    pub newly_submitted: bool,
}

/// Result of executing a job once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Unit of work complete; the job is removed
    Done,
    /// Blocked by external throttling; back to the queue without
    /// consuming an attempt
    Defer,
    /// Transient failure; re-queued with backoff until the attempt ceiling
    Retry(String),
    /// Permanent failure; terminal, no retry
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_list_round_trip() {
        let guards = vec![GuardKind::MetadataServer, GuardKind::MetadataRateLimit];
        let joined = GuardKind::join_list(&guards);
        assert_eq!(joined, "metadata-server,metadata-rate-limit");
        assert_eq!(GuardKind::parse_list(&joined), guards);
    }

    #[test]
    fn guard_list_ignores_unknown_entries() {
        assert_eq!(
            GuardKind::parse_list("metadata-server,bogus,"),
            vec![GuardKind::MetadataServer]
        );
        assert!(GuardKind::parse_list("").is_empty());
    }

    #[test]
    fn category_round_trip() {
        for cat in [JobCategory::Hasher, JobCategory::General, JobCategory::Schedule] {
            assert_eq!(JobCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(JobCategory::parse("images"), None);
    }
}

//! Guard registry: ban and rate-limit avoidance
//!
//! Guards are stateful gates consulted before every dispatch of a guarded
//! job. While the metadata service has banned us, nothing guarded dispatches,
//! so the service never sees traffic during a ban and no individual job needs
//! ban-specific logic. The registry owns guard state exclusively; the
//! metadata client adapter reports observed bans into it.

use std::collections::HashMap;
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::descriptor::GuardKind;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Observable state of a single guard kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    Open,
    Banned { until: OffsetDateTime },
}

/// Result of a pre-dispatch guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Ready,
    Blocked {
        kind: GuardKind,
        until: Option<OffsetDateTime>,
    },
}

/// Registry of guard state, consulted by the dispatch loop
pub struct GuardRegistry {
    states: Mutex<HashMap<GuardKind, GuardStatus>>,
    metadata_limiter: DirectLimiter,
}

impl GuardRegistry {
    /// Create a registry with the given metadata-service token bucket
    /// (refill per minute plus burst capacity)
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            states: Mutex::new(HashMap::new()),
            metadata_limiter: RateLimiter::direct(quota),
        }
    }

    /// Record a ban reported by the metadata client adapter
    pub fn report_ban(&self, kind: GuardKind, until: OffsetDateTime) {
        warn!(guard = kind.as_str(), until = %until, "Guard banned; withholding guarded jobs");
        self.states.lock().insert(kind, GuardStatus::Banned { until });
    }

    /// Administratively reopen a guard
    pub fn clear(&self, kind: GuardKind) {
        info!(guard = kind.as_str(), "Guard cleared");
        self.states.lock().insert(kind, GuardStatus::Open);
    }

    /// Current status of a guard. An elapsed ban reopens lazily here; the
    /// dispatch loop re-evaluates guards every cycle, so no job action is
    /// needed for recovery.
    pub fn status(&self, kind: GuardKind) -> GuardStatus {
        let mut states = self.states.lock();
        match states.get(&kind).copied() {
            Some(GuardStatus::Banned { until }) if OffsetDateTime::now_utc() >= until => {
                info!(guard = kind.as_str(), "Ban window elapsed; guard reopened");
                states.insert(kind, GuardStatus::Open);
                GuardStatus::Open
            }
            Some(status) => status,
            None => GuardStatus::Open,
        }
    }

    /// The active metadata ban window, if any (for notifications)
    pub fn ban_until(&self, kind: GuardKind) -> Option<OffsetDateTime> {
        match self.status(kind) {
            GuardStatus::Banned { until } => Some(until),
            GuardStatus::Open => None,
        }
    }

    /// The first banned guard among `guards`, if any. Does not touch the
    /// token bucket, so it is safe to call for a job that may not dispatch.
    pub fn blocked_by_ban(&self, guards: &[GuardKind]) -> Option<(GuardKind, OffsetDateTime)> {
        guards.iter().find_map(|kind| match self.status(*kind) {
            GuardStatus::Banned { until } => Some((*kind, until)),
            GuardStatus::Open => None,
        })
    }

    /// Check every guard a job requires, consuming one rate-limit token only
    /// when the job will actually dispatch. Ban checks run first so an empty
    /// bucket is never drained for a job a ban would withhold anyway.
    pub fn check_and_consume(&self, guards: &[GuardKind]) -> GuardDecision {
        if let Some((kind, until)) = self.blocked_by_ban(guards) {
            return GuardDecision::Blocked {
                kind,
                until: Some(until),
            };
        }

        for kind in guards {
            if *kind == GuardKind::MetadataRateLimit && self.metadata_limiter.check().is_err() {
                return GuardDecision::Blocked {
                    kind: *kind,
                    until: None,
                };
            }
        }

        GuardDecision::Ready
    }
}

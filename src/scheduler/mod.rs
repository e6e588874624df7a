//! Durable job scheduler
//!
//! Jobs are persisted rows; the dispatch loop repeatedly selects the highest
//! priority queued job whose category is not paused, whose concurrency tag has
//! headroom and whose guards are open, then runs it on a bounded worker pool.
//! Guard-blocked jobs are simply skipped for the cycle, which is how ban
//! avoidance becomes invisible backpressure rather than failure.

pub mod context;
pub mod descriptor;
pub mod guards;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{Database, QueuedJobRecord};

pub use context::{JobContext, JobSubmitter, PipelineSettings, VideoLocks};
pub use descriptor::{GuardKind, JobCategory, JobDescriptor, JobHandle, Outcome};
pub use guards::{GuardDecision, GuardRegistry, GuardStatus};

/// Which attempt this execution is, against the configured ceiling
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInfo {
    /// 1-based attempt number for this execution
    pub attempt: i64,
    pub max_attempts: i64,
}

impl ExecutionInfo {
    /// Whether a `Retry` outcome from this attempt would be terminal
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A single executable job body
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute one unit of work. Must be safe to call more than once for the
    /// same logical unit: implementations re-check persisted state before
    /// redoing expensive work. An `Err` is treated as `Retry` at the
    /// dispatch boundary.
    async fn run(&self, ctx: &JobContext, exec: ExecutionInfo) -> Result<Outcome>;
}

/// Closed factory mapping job kind tags to runners
pub trait JobFactory: Send + Sync {
    fn build(&self, kind: &str, payload: &JsonValue) -> Result<Box<dyn JobRunner>>;
}

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Retry ceiling; a job whose attempts reach this is terminally failed
    pub max_attempts: i64,
    /// Base delay for exponential retry backoff
    pub retry_backoff: Duration,
    /// Worker pool bound
    pub worker_pool_size: usize,
    /// Delay between dispatch cycles
    pub dispatch_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_secs(60),
            worker_pool_size: 8,
            dispatch_interval: Duration::from_millis(500),
        }
    }
}

/// Durable job scheduler and dispatch loop
pub struct Scheduler {
    db: Database,
    ctx: Arc<JobContext>,
    factory: Arc<dyn JobFactory>,
    guards: Arc<GuardRegistry>,
    config: SchedulerConfig,
    submitter: JobSubmitter,
    paused: Mutex<HashSet<JobCategory>>,
    pool: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        ctx: Arc<JobContext>,
        factory: Arc<dyn JobFactory>,
        guards: Arc<GuardRegistry>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size));
        let submitter = JobSubmitter::new(db.clone());

        Arc::new(Self {
            db,
            ctx,
            factory,
            guards,
            config,
            submitter,
            paused: Mutex::new(HashSet::new()),
            pool,
        })
    }

    /// Submit a job. Idempotent on the descriptor's `job_id`.
    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobHandle> {
        self.submitter.submit(descriptor).await
    }

    /// Submit several jobs, returning a handle per descriptor
    pub async fn submit_batch(&self, descriptors: Vec<JobDescriptor>) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            handles.push(self.submitter.submit(descriptor).await?);
        }
        Ok(handles)
    }

    /// Stop dispatching a category. Running jobs finish; queued jobs wait.
    pub fn pause(&self, category: JobCategory) {
        info!(category = %category, "Category paused");
        self.paused.lock().insert(category);
    }

    /// Resume dispatching a category
    pub fn resume(&self, category: JobCategory) {
        info!(category = %category, "Category resumed");
        self.paused.lock().remove(&category);
    }

    pub fn is_paused(&self, category: JobCategory) -> bool {
        self.paused.lock().contains(&category)
    }

    /// Remove all queued jobs in a category; running jobs finish
    pub async fn clear(&self, category: JobCategory) -> Result<u64> {
        let removed = self.db.jobs().clear_category(category.as_str()).await?;
        info!(category = %category, removed, "Category cleared");
        Ok(removed)
    }

    /// Re-queue jobs a previous process left running (startup recovery).
    /// Job bodies are safe to re-run, so this is the whole crash story.
    pub async fn recover(&self) -> Result<()> {
        let requeued = self.db.jobs().requeue_running().await?;
        if requeued > 0 {
            info!(requeued, "Re-queued jobs left running by a previous process");
        }
        Ok(())
    }

    /// Run one dispatch cycle; returns how many jobs were started.
    ///
    /// Eligibility per job: category not paused, backoff deadline elapsed,
    /// concurrency tag below its limit, all guards open. Anything else is
    /// skipped this cycle and reconsidered on the next.
    pub async fn dispatch_once(self: &Arc<Self>) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let mut tag_counts: HashMap<String, i64> = self.db.jobs().running_counts().await?;
        let candidates = self.db.jobs().list_dispatchable(now).await?;
        let mut dispatched = 0;

        for job in candidates {
            let category = match JobCategory::parse(&job.category) {
                Some(category) => category,
                None => {
                    warn!(job_id = %job.job_id, category = %job.category, "Unknown category; failing job");
                    self.db.jobs().mark_failed(job.id, "unknown category").await?;
                    continue;
                }
            };

            if self.is_paused(category) {
                continue;
            }

            let running = tag_counts.get(&job.concurrency_tag).copied().unwrap_or(0);
            if running >= job.max_concurrent {
                continue;
            }

            let guards = GuardKind::parse_list(&job.guards);
            if let Some((kind, until)) = self.guards.blocked_by_ban(&guards) {
                debug!(
                    job_id = %job.job_id,
                    guard = kind.as_str(),
                    until = %until,
                    "Guard closed; job withheld this cycle"
                );
                continue;
            }

            let permit = match self.pool.clone().try_acquire_owned() {
                Ok(permit) => permit,
                // Worker pool saturated; stop dispatching until a slot frees
                Err(_) => break,
            };

            if !self.db.jobs().mark_running(job.id).await? {
                continue;
            }

            // Spend a rate-limit token only once the job holds both a worker
            // slot and the row claim; a saturated pool must not drain the
            // bucket for jobs it cannot start
            if let GuardDecision::Blocked { kind, .. } = self.guards.check_and_consume(&guards) {
                debug!(
                    job_id = %job.job_id,
                    guard = kind.as_str(),
                    "Rate limit reached; job returned to the queue"
                );
                self.db.jobs().mark_deferred(job.id).await?;
                continue;
            }

            *tag_counts.entry(job.concurrency_tag.clone()).or_insert(0) += 1;
            dispatched += 1;
            self.spawn_job(job, permit);
        }

        Ok(dispatched)
    }

    /// Start the dispatch loop
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(
                pool = scheduler.config.worker_pool_size,
                interval_ms = scheduler.config.dispatch_interval.as_millis() as u64,
                "Scheduler dispatch loop started"
            );

            let mut interval = tokio::time::interval(scheduler.config.dispatch_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = scheduler.dispatch_once().await {
                    error!(error = %e, "Dispatch cycle failed");
                }
            }
        })
    }

    /// Drive dispatch cycles until no queued or running work remains, up to
    /// `max_cycles`. Returns true when the queue drained. Used by callers
    /// that want to process a backlog to completion.
    pub async fn run_until_idle(self: &Arc<Self>, max_cycles: usize) -> Result<bool> {
        for _ in 0..max_cycles {
            self.dispatch_once().await?;
            tokio::time::sleep(Duration::from_millis(10)).await;

            let queued = self.db.jobs().count_in_state("queued").await?;
            let running = self.db.jobs().count_in_state("running").await?;
            if queued == 0 && running == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn spawn_job(self: &Arc<Self>, job: QueuedJobRecord, permit: OwnedSemaphorePermit) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = scheduler.execute_contained(&job).await;
            if let Err(e) = scheduler.settle(&job, outcome).await {
                error!(job_id = %job.job_id, error = %e, "Failed to persist job outcome");
            }
        });
    }

    /// Execute a job with panics contained at the dispatch boundary, so the
    /// dispatch loop never halts on a misbehaving job body.
    async fn execute_contained(&self, job: &QueuedJobRecord) -> Outcome {
        let payload: JsonValue = match serde_json::from_str(&job.payload) {
            Ok(payload) => payload,
            Err(e) => return Outcome::Fatal(format!("malformed payload: {e}")),
        };

        let runner = match self.factory.build(&job.kind, &payload) {
            Ok(runner) => runner,
            Err(e) => return Outcome::Fatal(format!("cannot build job: {e:#}")),
        };

        let exec = ExecutionInfo {
            attempt: job.attempts + 1,
            max_attempts: self.config.max_attempts,
        };
        debug!(job_id = %job.job_id, kind = %job.kind, attempt = exec.attempt, "Executing job");

        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move { runner.run(&ctx, exec).await });

        match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Outcome::Retry(format!("{e:#}")),
            Err(join_error) => Outcome::Retry(format!("job panicked: {join_error}")),
        }
    }

    async fn settle(&self, job: &QueuedJobRecord, outcome: Outcome) -> Result<()> {
        let jobs = self.db.jobs();

        match outcome {
            Outcome::Done => {
                debug!(job_id = %job.job_id, "Job done");
                jobs.remove(job.id).await?;
            }
            Outcome::Defer => {
                debug!(job_id = %job.job_id, "Job deferred back to the queue");
                jobs.mark_deferred(job.id).await?;
            }
            Outcome::Fatal(reason) => {
                warn!(job_id = %job.job_id, reason = %reason, "Job failed terminally");
                jobs.mark_failed(job.id, &reason).await?;
            }
            Outcome::Retry(reason) => {
                let attempts = job.attempts + 1;
                if attempts >= self.config.max_attempts {
                    warn!(
                        job_id = %job.job_id,
                        attempts,
                        reason = %reason,
                        "Retry ceiling reached; job failed terminally"
                    );
                    jobs.mark_failed(job.id, &reason).await?;
                } else {
                    let delay = self.backoff_delay(attempts);
                    debug!(
                        job_id = %job.job_id,
                        attempts,
                        delay_secs = delay.whole_seconds(),
                        reason = %reason,
                        "Job re-queued for retry"
                    );
                    jobs.mark_retry(job.id, &reason, OffsetDateTime::now_utc() + delay)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Exponential backoff from the configured base, capped at one hour
    fn backoff_delay(&self, attempts: i64) -> time::Duration {
        let base = self.config.retry_backoff.as_secs();
        let exponent = attempts.saturating_sub(1).min(10) as u32;
        let secs = base.saturating_mul(1u64 << exponent).min(3600);
        time::Duration::seconds(secs as i64)
    }
}

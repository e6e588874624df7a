//! Shared harness for integration tests: in-memory database, temp-dir
//! filesystem and a scriptable metadata client.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

use ayame::db::{Database, FolderRecord};
use ayame::jobs::PipelineJobFactory;
use ayame::scheduler::{
    GuardRegistry, JobContext, JobFactory, JobSubmitter, PipelineSettings, Scheduler,
    SchedulerConfig, VideoLocks,
};
use ayame::services::hasher::{DigestRequest, DigestSet, FileHasher, StreamingHasher};
use ayame::services::metadata::{MatchResult, MetadataClient, MetadataError};
use ayame::services::{NotificationService, PatternRenamer, TokioFileSystem};

/// One scripted response from the fake metadata service
#[derive(Debug, Clone)]
pub enum LookupScript {
    Match(MatchResult),
    Unknown,
    Banned(OffsetDateTime),
    Throttled,
    Transient(String),
}

/// Scriptable metadata client. Responses are consumed front to back and the
/// last entry repeats once the script runs out.
pub struct FakeMetadataClient {
    script: Mutex<Vec<LookupScript>>,
    pub lookups: AtomicUsize,
    pub syncs: AtomicUsize,
}

impl FakeMetadataClient {
    pub fn new(script: Vec<LookupScript>) -> Self {
        Self {
            script: Mutex::new(script),
            lookups: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, entry: LookupScript) {
        self.script.lock().push(entry);
    }

    /// Replace the remaining script wholesale
    pub fn set_script(&self, entries: Vec<LookupScript>) {
        *self.script.lock() = entries;
    }

    fn next(&self) -> LookupScript {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script
                .first()
                .cloned()
                .unwrap_or(LookupScript::Transient("empty script".to_string()))
        }
    }
}

#[async_trait]
impl MetadataClient for FakeMetadataClient {
    async fn lookup(
        &self,
        _content_hash: &str,
        _size_bytes: i64,
    ) -> Result<MatchResult, MetadataError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            LookupScript::Match(result) => Ok(result),
            LookupScript::Unknown => Err(MetadataError::UnknownFile),
            LookupScript::Banned(until) => Err(MetadataError::Banned { until }),
            LookupScript::Throttled => Err(MetadataError::Throttled),
            LookupScript::Transient(reason) => Err(MetadataError::Transient(reason)),
        }
    }

    async fn sync(&self, sync_kind: &str) -> Result<String, MetadataError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{sync_kind} synchronised"))
    }
}

/// Hasher decorator counting how many files were actually digested
pub struct CountingHasher {
    inner: StreamingHasher,
    pub digests: AtomicUsize,
}

impl CountingHasher {
    pub fn new() -> Self {
        Self {
            inner: StreamingHasher,
            digests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FileHasher for CountingHasher {
    async fn digest(&self, path: &Path, request: DigestRequest) -> Result<DigestSet> {
        self.digests.fetch_add(1, Ordering::SeqCst);
        self.inner.digest(path, request).await
    }
}

pub struct Harness {
    pub db: Database,
    pub scheduler: Arc<Scheduler>,
    pub metadata: Arc<FakeMetadataClient>,
    pub hasher: Arc<CountingHasher>,
    pub guards: Arc<GuardRegistry>,
    pub notifications: Arc<NotificationService>,
    pub import: FolderRecord,
    pub library: FolderRecord,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn import_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.import.path)
    }

    pub fn library_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.library.path)
    }

    /// Write a file into the import folder and return its relative path
    pub async fn drop_file(&self, relative_path: &str, content: &[u8]) -> String {
        let path = self.import_path().join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&path, content).await.unwrap();
        relative_path.to_string()
    }
}

pub fn default_settings() -> PipelineSettings {
    PipelineSettings {
        require_crc32: false,
        require_md5: false,
        require_sha1: false,
        auto_relocate: true,
        hasher_max_concurrent: 2,
        max_files_to_keep: 1,
        min_keep_resolution: 0,
        protect_current_import: true,
        calendar_sync_hours: 24,
        mylist_sync_hours: 24,
    }
}

/// Fast scheduler settings for tests: zero backoff so retries are
/// immediately dispatchable
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_attempts: 3,
        retry_backoff: Duration::from_secs(0),
        worker_pool_size: 8,
        dispatch_interval: Duration::from_millis(20),
    }
}

pub async fn build_harness(
    script: Vec<LookupScript>,
    settings: PipelineSettings,
    config: SchedulerConfig,
) -> Harness {
    build_harness_with_factory(script, settings, config, Arc::new(PipelineJobFactory)).await
}

pub async fn build_harness_with_factory(
    script: Vec<LookupScript>,
    settings: PipelineSettings,
    config: SchedulerConfig,
    factory: Arc<dyn JobFactory>,
) -> Harness {
    let guards = Arc::new(GuardRegistry::new(600, 600));
    build_harness_with_guards(script, settings, config, factory, guards).await
}

pub async fn build_harness_with_guards(
    script: Vec<LookupScript>,
    settings: PipelineSettings,
    config: SchedulerConfig,
    factory: Arc<dyn JobFactory>,
    guards: Arc<GuardRegistry>,
) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let import_dir = dir.path().join("import");
    let library_dir = dir.path().join("library");
    tokio::fs::create_dir_all(&import_dir).await.unwrap();
    tokio::fs::create_dir_all(&library_dir).await.unwrap();

    let import = db
        .folders()
        .ensure(import_dir.to_str().unwrap(), "import", true, false)
        .await
        .unwrap();
    let library = db
        .folders()
        .ensure(library_dir.to_str().unwrap(), "library", false, true)
        .await
        .unwrap();

    let metadata = Arc::new(FakeMetadataClient::new(script));
    let hasher = Arc::new(CountingHasher::new());
    let notifications = Arc::new(NotificationService::new());

    let ctx = Arc::new(JobContext {
        db: db.clone(),
        settings,
        metadata: metadata.clone(),
        hasher: hasher.clone(),
        fs: Arc::new(TokioFileSystem),
        renamer: Arc::new(PatternRenamer::new(
            "{anime}/{anime} - {episode} - {title}.{ext}",
        )),
        notifications: notifications.clone(),
        guards: guards.clone(),
        submitter: JobSubmitter::new(db.clone()),
        video_locks: Arc::new(VideoLocks::new()),
    });

    let scheduler = Scheduler::new(db.clone(), ctx, factory, guards.clone(), config);

    Harness {
        db,
        scheduler,
        metadata,
        hasher,
        guards,
        notifications,
        import,
        library,
        dir,
    }
}

/// A one-episode match result for scripting the fake client
pub fn single_episode_match(episode_id: i64, anime_title: &str, episode_number: i64) -> MatchResult {
    MatchResult {
        remote_file_id: Some(episode_id * 1000),
        episodes: vec![ayame::services::metadata::EpisodeMatch {
            episode_id,
            anime_id: 1,
            anime_title: anime_title.to_string(),
            episode_number,
            episode_title: Some(format!("Episode {episode_number}")),
            percentage: 100,
        }],
    }
}

//! Ayame - anime collection backend
//!
//! Wires the durable job scheduler and the file identification pipeline,
//! seeds the initial import scan and keeps the periodic remote syncs queued.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ayame::config::Config;
use ayame::db::Database;
use ayame::jobs::{self, PipelineJobFactory};
use ayame::scheduler::{
    GuardRegistry, JobContext, JobSubmitter, PipelineSettings, Scheduler, SchedulerConfig,
    VideoLocks,
};
use ayame::services::{
    ImportScanner, NotificationService, OfflineMetadataClient, PatternRenamer, StreamingHasher,
    TokioFileSystem,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ayame=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Ayame");

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    tracing::info!("Database connected and migrated");

    let import_folder = db
        .folders()
        .ensure(&config.import_path, "import", true, false)
        .await?;
    let library_folder = db
        .folders()
        .ensure(&config.library_path, "library", false, true)
        .await?;
    tracing::info!(
        import = %import_folder.path,
        library = %library_folder.path,
        "Folders registered"
    );

    let guards = Arc::new(GuardRegistry::new(
        config.metadata_requests_per_minute,
        config.metadata_burst,
    ));
    let notifications = Arc::new(NotificationService::new());

    let ctx = Arc::new(JobContext {
        db: db.clone(),
        settings: PipelineSettings::from_config(&config),
        metadata: Arc::new(OfflineMetadataClient),
        hasher: Arc::new(StreamingHasher),
        fs: Arc::new(TokioFileSystem),
        renamer: Arc::new(PatternRenamer::new(config.naming_pattern.clone())),
        notifications: notifications.clone(),
        guards: guards.clone(),
        submitter: JobSubmitter::new(db.clone()),
        video_locks: Arc::new(VideoLocks::new()),
    });

    let scheduler = Scheduler::new(
        db.clone(),
        ctx,
        Arc::new(PipelineJobFactory),
        guards,
        SchedulerConfig {
            max_attempts: config.max_attempts,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            worker_pool_size: config.worker_pool_size,
            dispatch_interval: Duration::from_millis(config.dispatch_interval_ms),
        },
    );

    scheduler.recover().await?;
    scheduler.start();
    tracing::info!("Scheduler started");

    // Periodic import rescans and remote sync submissions. Deterministic job
    // ids make blind re-submission free, and the scan marker keeps restarts
    // from re-walking the import folder early.
    let rescan_scheduler = scheduler.clone();
    let rescan_db = db.clone();
    let rescan_hours = config.rescan_hours.max(1);
    let import_path = config.import_path.clone();
    let import_folder_id = import_folder.id;
    tokio::spawn(async move {
        let scanner = ImportScanner;
        loop {
            match rescan_db.scheduled_updates().is_due("import-scan", rescan_hours).await {
                Ok(true) => match scanner.scan(Path::new(&import_path)) {
                    Ok(files) => {
                        let found = files.len();
                        for relative_path in files {
                            let descriptor =
                                jobs::discover_descriptor(import_folder_id, &relative_path);
                            if let Err(e) = rescan_scheduler.submit(descriptor).await {
                                tracing::error!(error = %e, "Failed to submit discovery job");
                            }
                        }
                        if let Err(e) = rescan_db
                            .scheduled_updates()
                            .mark_run("import-scan", Some(&format!("{found} files")))
                            .await
                        {
                            tracing::error!(error = %e, "Failed to record import scan");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Import scan failed"),
                },
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Scan schedule check failed"),
            }

            for sync_kind in [jobs::SYNC_CALENDAR, jobs::SYNC_MYLIST] {
                if let Err(e) = rescan_scheduler
                    .submit(jobs::remote_sync_descriptor(sync_kind))
                    .await
                {
                    tracing::error!(error = %e, sync = sync_kind, "Failed to submit sync job");
                }
            }

            tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

//! End-to-end identification pipeline: discovery through hashing,
//! identification, duplicate resolution and relocation against an in-memory
//! database, a temp-dir filesystem and a scripted metadata client.

mod common;

use std::time::Duration;

use time::OffsetDateTime;

use ayame::db::{CreateVideo, CrossReference, UpsertEpisode};
use ayame::jobs::{self, SYNC_CALENDAR};
use ayame::scheduler::{GuardKind, GuardStatus};
use ayame::services::PipelineEvent;
use ayame::services::metadata::{EpisodeMatch, MatchResult};

use common::{
    LookupScript, build_harness, default_settings, fast_scheduler_config, single_episode_match,
};

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn new_file_flows_from_discovery_to_the_library() {
    let script = vec![LookupScript::Match(single_episode_match(
        501,
        "Serial Experiments Lain",
        1,
    ))];
    let h = build_harness(script, default_settings(), fast_scheduler_config()).await;
    let mut rx = h.notifications.subscribe();

    let rel = h.drop_file("Lain - 01 [1080p].mkv", b"lain episode one").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();

    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    // The video is registered under its computed content hash
    let cached = h
        .db
        .hash_cache()
        .lookup("Lain - 01 [1080p].mkv", b"lain episode one".len() as i64)
        .await
        .unwrap()
        .expect("digests cached");
    let video = h
        .db
        .videos()
        .get_by_hash(&cached.content_hash)
        .await
        .unwrap()
        .expect("video registered");
    assert!(video.imported_at.is_some());
    assert_eq!(video.resolution.as_deref(), Some("1080p"));

    // Episode links and the metadata cache are in place
    let refs = h.db.cross_refs().list_by_video(video.id).await.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].episode_id, 501);
    assert_eq!(refs[0].percentage, 100);
    let episode = h.db.episodes().get(501).await.unwrap().unwrap();
    assert_eq!(episode.anime_title, "Serial Experiments Lain");

    // The file moved into the library under the naming pattern
    let expected = h
        .library_path()
        .join("Serial Experiments Lain/Serial Experiments Lain - 01 - Episode 1.mkv");
    assert!(tokio::fs::try_exists(&expected).await.unwrap());
    assert!(!tokio::fs::try_exists(h.import_path().join(&rel)).await.unwrap());

    let locations = h.db.locations().list_by_video(video.id).await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].folder_id, h.library.id);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::FileMatched { cross_refs_changed: true, .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::FileRelocated { .. })));

    // The queue is empty: completed jobs leave no residue
    assert_eq!(h.db.jobs().count_in_state("queued").await.unwrap(), 0);
    assert_eq!(h.db.jobs().count_in_state("failed").await.unwrap(), 0);
}

#[tokio::test]
async fn rediscovery_adopts_cached_digests_and_skips_identification() {
    let script = vec![LookupScript::Match(single_episode_match(502, "Lain", 2))];
    let mut settings = default_settings();
    settings.auto_relocate = false;
    let h = build_harness(script, settings, fast_scheduler_config()).await;
    let mut rx = h.notifications.subscribe();

    let rel = h.drop_file("Lain - 02.mkv", b"lain episode two").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());
    assert_eq!(h.hasher.digests.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Second discovery of the same file: digests come from the cache and
    // the existing cross-references make identification a no-op
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    assert_eq!(h.hasher.digests.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);

    let events = drain_events(&mut rx);
    let matched = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::FileMatched { .. }))
        .count();
    assert_eq!(matched, 1);
}

#[tokio::test]
async fn ban_during_identification_defers_without_consuming_attempts() {
    let until = OffsetDateTime::now_utc() + time::Duration::minutes(30);
    let script = vec![LookupScript::Banned(until)];
    let h = build_harness(script, default_settings(), fast_scheduler_config()).await;
    let mut rx = h.notifications.subscribe();

    let rel = h.drop_file("Lain - 03.mkv", b"lain episode three").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();

    // Discover and hash complete; identify hits the ban and is deferred
    assert!(!h.scheduler.run_until_idle(30).await.unwrap());

    assert_eq!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        h.guards.status(GuardKind::MetadataServer),
        GuardStatus::Banned { until }
    );

    let cached = h
        .db
        .hash_cache()
        .lookup("Lain - 03.mkv", b"lain episode three".len() as i64)
        .await
        .unwrap()
        .unwrap();
    let video = h.db.videos().get_by_hash(&cached.content_hash).await.unwrap().unwrap();
    let identify_id = format!("identify-file:{}", video.id);

    // Still queued, no attempt consumed, and further cycles do not touch
    // the remote service
    for _ in 0..5 {
        h.scheduler.dispatch_once().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let job = h.db.jobs().get_active(&identify_id).await.unwrap().unwrap();
    assert_eq!(job.state, "queued");
    assert_eq!(job.attempts, 0);
    assert_eq!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::ServiceBanned { until: u } if *u == until)));

    // Ban lifted: identification resumes with no extra action on the job
    h.metadata
        .set_script(vec![LookupScript::Match(single_episode_match(503, "Lain", 3))]);
    h.guards.clear(GuardKind::MetadataServer);

    assert!(h.scheduler.run_until_idle(300).await.unwrap());
    let refs = h.db.cross_refs().list_by_video(video.id).await.unwrap();
    assert_eq!(refs.len(), 1);
}

#[tokio::test]
async fn throttled_identification_defers_without_consuming_attempts() {
    let script = vec![LookupScript::Throttled];
    let h = build_harness(script, default_settings(), fast_scheduler_config()).await;

    let rel = h.drop_file("Lain - 05.mkv", b"lain episode five").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();

    // Discover and hash complete; every identification attempt is throttled
    // straight back into the queue
    assert!(!h.scheduler.run_until_idle(20).await.unwrap());
    assert!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    let cached = h
        .db
        .hash_cache()
        .lookup("Lain - 05.mkv", b"lain episode five".len() as i64)
        .await
        .unwrap()
        .unwrap();
    let video = h.db.videos().get_by_hash(&cached.content_hash).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = h
        .db
        .jobs()
        .get_active(&format!("identify-file:{}", video.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.state, "queued");
    assert_eq!(job.attempts, 0);

    // Throttle clears: the same queued job completes with no extra action
    h.metadata
        .set_script(vec![LookupScript::Match(single_episode_match(505, "Lain", 5))]);
    assert!(h.scheduler.run_until_idle(300).await.unwrap());
    assert_eq!(h.db.cross_refs().list_by_video(video.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn multi_episode_file_links_every_covered_episode() {
    let matched = MatchResult {
        remote_file_id: Some(777000),
        episodes: vec![
            EpisodeMatch {
                episode_id: 701,
                anime_id: 2,
                anime_title: "Lain".to_string(),
                episode_number: 5,
                episode_title: Some("Layer 05".to_string()),
                percentage: 50,
            },
            EpisodeMatch {
                episode_id: 702,
                anime_id: 2,
                anime_title: "Lain".to_string(),
                episode_number: 6,
                episode_title: Some("Layer 06".to_string()),
                percentage: 50,
            },
        ],
    };
    let h = build_harness(
        vec![LookupScript::Match(matched)],
        default_settings(),
        fast_scheduler_config(),
    )
    .await;

    let rel = h.drop_file("Lain - 05-06 [1080p].mkv", b"double length special").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    let cached = h
        .db
        .hash_cache()
        .lookup("Lain - 05-06 [1080p].mkv", b"double length special".len() as i64)
        .await
        .unwrap()
        .unwrap();
    let video = h.db.videos().get_by_hash(&cached.content_hash).await.unwrap().unwrap();
    assert!(video.imported_at.is_some());

    // Coverage is partitioned across both linked episodes
    let refs = h.db.cross_refs().list_by_video(video.id).await.unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].episode_id, 701);
    assert_eq!(refs[0].percentage, 50);
    assert_eq!(refs[1].episode_id, 702);
    assert_eq!(refs[1].percentage, 50);

    // Both episodes are cached; the file is named after the first covered one
    assert!(h.db.episodes().get(701).await.unwrap().is_some());
    assert!(h.db.episodes().get(702).await.unwrap().is_some());
    let expected = h.library_path().join("Lain/Lain - 05 - Layer 05.mkv");
    assert!(tokio::fs::try_exists(&expected).await.unwrap());
}

#[tokio::test]
async fn better_copy_displaces_the_existing_duplicate() {
    let script = vec![LookupScript::Match(single_episode_match(601, "Lain", 4))];
    let h = build_harness(script, default_settings(), fast_scheduler_config()).await;
    let mut rx = h.notifications.subscribe();

    // Existing inferior copy already identified against the same episode
    let old_video = h
        .db
        .videos()
        .upsert(CreateVideo {
            content_hash: "0ldc0py".repeat(8),
            size_bytes: 9,
            resolution: Some("480p".to_string()),
            source: Some("tv".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    h.db
        .locations()
        .upsert(old_video.id, h.library.id, "Lain/old copy [480p].mkv")
        .await
        .unwrap();
    let old_path = h.library_path().join("Lain/old copy [480p].mkv");
    tokio::fs::create_dir_all(old_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&old_path, b"old 480p").await.unwrap();
    h.db
        .cross_refs()
        .replace_for_video(
            old_video.id,
            &[CrossReference {
                episode_id: 601,
                percentage: 100,
            }],
        )
        .await
        .unwrap();

    let rel = h.drop_file("Lain - 04 [1080p][BDRip].mkv", b"new 1080p copy").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    // The inferior copy is gone: file, location and video row
    assert!(!tokio::fs::try_exists(&old_path).await.unwrap());
    assert!(h.db.videos().get_by_id(old_video.id).await.unwrap().is_none());

    // The new copy survived and was relocated
    let cached = h
        .db
        .hash_cache()
        .lookup("Lain - 04 [1080p][BDRip].mkv", b"new 1080p copy".len() as i64)
        .await
        .unwrap()
        .unwrap();
    let new_video = h.db.videos().get_by_hash(&cached.content_hash).await.unwrap().unwrap();
    let locations = h.db.locations().list_by_video(new_video.id).await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].folder_id, h.library.id);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::DuplicateRemoved { video_id, .. } if *video_id == old_video.id
    )));
}

#[tokio::test]
async fn unknown_file_is_left_unidentified_without_error() {
    let script = vec![LookupScript::Unknown];
    let h = build_harness(script, default_settings(), fast_scheduler_config()).await;
    let mut rx = h.notifications.subscribe();

    let rel = h.drop_file("mystery.mkv", b"nobody knows this file").await;
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    // No match is not a failure
    assert!(h.db.jobs().list_failed().await.unwrap().is_empty());

    // Hashed and registered, but never imported
    let cached = h
        .db
        .hash_cache()
        .lookup("mystery.mkv", b"nobody knows this file".len() as i64)
        .await
        .unwrap()
        .unwrap();
    let video = h.db.videos().get_by_hash(&cached.content_hash).await.unwrap().unwrap();
    assert!(video.imported_at.is_none());
    assert!(h.db.cross_refs().list_by_video(video.id).await.unwrap().is_empty());

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::FileNotMatched { attempts: 1, banned_until: None, .. }
    )));

    // Rediscovery retries identification because no links exist yet
    h.metadata
        .set_script(vec![LookupScript::Match(single_episode_match(504, "Lain", 5))]);
    h.scheduler
        .submit(jobs::discover_descriptor(h.import.id, &rel))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(300).await.unwrap());

    assert_eq!(h.metadata.lookups.load(std::sync::atomic::Ordering::SeqCst), 2);
    let video = h.db.videos().get_by_id(video.id).await.unwrap().unwrap();
    assert!(video.imported_at.is_some());
}

#[tokio::test]
async fn relocating_a_vanished_source_fails_terminally() {
    let h = build_harness(Vec::new(), default_settings(), fast_scheduler_config()).await;

    // An identified video whose backing file is already gone
    let video = h
        .db
        .videos()
        .upsert(CreateVideo {
            content_hash: "g0nef1le".repeat(8),
            size_bytes: 4,
            ..Default::default()
        })
        .await
        .unwrap();
    let location = h
        .db
        .locations()
        .upsert(video.id, h.import.id, "vanished.mkv")
        .await
        .unwrap();
    h.db
        .cross_refs()
        .replace_for_video(video.id, &[CrossReference { episode_id: 801, percentage: 100 }])
        .await
        .unwrap();
    h.db
        .episodes()
        .upsert(UpsertEpisode {
            episode_id: 801,
            anime_id: 3,
            anime_title: "Lain".to_string(),
            episode_number: 7,
            title: Some("Layer 07".to_string()),
        })
        .await
        .unwrap();

    h.scheduler
        .submit(jobs::relocate_descriptor(video.id, location.id))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(100).await.unwrap());

    // Nothing to move and nothing at the destination: terminal, not retried
    let failed = h.db.jobs().list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, format!("relocate-file:{}", location.id));
    assert_eq!(failed[0].attempts, 1);
    assert!(failed[0].last_error.as_deref().unwrap().contains("nothing to relocate"));
}

#[tokio::test]
async fn relocation_resumes_after_a_crash_between_move_and_row_update() {
    let h = build_harness(Vec::new(), default_settings(), fast_scheduler_config()).await;

    let video = h
        .db
        .videos()
        .upsert(CreateVideo {
            content_hash: "m0vedbit".repeat(8),
            size_bytes: 13,
            ..Default::default()
        })
        .await
        .unwrap();
    let location = h
        .db
        .locations()
        .upsert(video.id, h.import.id, "moved.mkv")
        .await
        .unwrap();
    h.db
        .cross_refs()
        .replace_for_video(video.id, &[CrossReference { episode_id: 802, percentage: 100 }])
        .await
        .unwrap();
    h.db
        .episodes()
        .upsert(UpsertEpisode {
            episode_id: 802,
            anime_id: 3,
            anime_title: "Lain".to_string(),
            episode_number: 8,
            title: Some("Layer 08".to_string()),
        })
        .await
        .unwrap();

    // A previous run moved the file and died before repointing the row
    let target = h.library_path().join("Lain/Lain - 08 - Layer 08.mkv");
    tokio::fs::create_dir_all(target.parent().unwrap()).await.unwrap();
    tokio::fs::write(&target, b"already moved").await.unwrap();

    h.scheduler
        .submit(jobs::relocate_descriptor(video.id, location.id))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(100).await.unwrap());

    assert!(h.db.jobs().list_failed().await.unwrap().is_empty());
    let location = h.db.locations().get_by_id(location.id).await.unwrap().unwrap();
    assert_eq!(location.folder_id, h.library.id);
    assert_eq!(location.relative_path, "Lain/Lain - 08 - Layer 08.mkv");
}

#[tokio::test]
async fn remote_sync_runs_once_per_window() {
    let h = build_harness(Vec::new(), default_settings(), fast_scheduler_config()).await;

    h.scheduler
        .submit(jobs::remote_sync_descriptor(SYNC_CALENDAR))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(100).await.unwrap());

    assert_eq!(h.metadata.syncs.load(std::sync::atomic::Ordering::SeqCst), 1);
    let marker = h.db.scheduled_updates().get(SYNC_CALENDAR).await.unwrap().unwrap();
    assert_eq!(marker.details.as_deref(), Some("calendar synchronised"));

    // Re-submission inside the window completes without a remote call
    h.scheduler
        .submit(jobs::remote_sync_descriptor(SYNC_CALENDAR))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(100).await.unwrap());
    assert_eq!(h.metadata.syncs.load(std::sync::atomic::Ordering::SeqCst), 1);

    // A forced run ignores the window and calls the remote again
    h.scheduler
        .submit(jobs::forced_remote_sync_descriptor(SYNC_CALENDAR))
        .await
        .unwrap();
    assert!(h.scheduler.run_until_idle(100).await.unwrap());
    assert_eq!(h.metadata.syncs.load(std::sync::atomic::Ordering::SeqCst), 2);
}

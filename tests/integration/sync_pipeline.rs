use std::sync::Arc;

use chanfeed::client::RpcPool;
use chanfeed::daemon::Daemon;
use chanfeed::pause::PauseFlag;
use chanfeed::sync::{self, StageContext};
use serde_json::{Value, json};

use crate::common::{TestEnv, channel_record, new_message, seed_channel, start_stub_daemon};

async fn stage_ctx(env: &TestEnv, fixture: Value) -> (StageContext, Arc<Daemon>) {
    let (addr, daemon) = start_stub_daemon(fixture).await;
    let mut config = env.config.clone();
    config.daemon_port = addr.rsplit(':').next().unwrap().parse().unwrap();
    let pool = Arc::new(RpcPool::connect(&addr, 2).await.unwrap());
    let pause = PauseFlag::new(config.pause_file());
    let ctx = StageContext {
        store: env.open_store(),
        pool,
        config,
        pause,
    };
    (ctx, daemon)
}

#[tokio::test]
async fn discovery_upserts_and_unsubscribes() {
    let env = TestEnv::new();
    {
        let store = env.store();
        // Previously known channel that upstream no longer lists.
        store
            .upsert_channel(&channel_record(999, "Gone"), 1_600_000_000)
            .unwrap();
    }

    let fixture = json!({
        "channels": [
            {"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1, "photo_id": 5},
            {"id": 200, "access_hash": 2, "title": "Beta", "broadcast": 1}
        ]
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::channels::run(&ctx).await.unwrap();

    let subscribed = ctx.store.subscribed_channel_ids();
    assert!(subscribed.contains(&100));
    assert!(subscribed.contains(&200));
    assert!(!subscribed.contains(&999));
    // Unsubscribed channels are retained.
    assert!(ctx.store.get_channel(999).is_some());
    // Avatar cached for the channel that has one.
    assert!(env.config.photos_dir().join("100.jpg").exists());
}

#[tokio::test]
async fn first_sync_seeds_latest_non_poll_only() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [
            {"id": 1, "date": 1000, "message": "one"},
            {"id": 2, "date": 2000, "message": "two"},
            {"id": 3, "date": 3000, "message": "three"},
            {"id": 4, "date": 4000, "message": "latest poll", "media_type": "poll"}
        ]}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::messages::run(&ctx).await.unwrap();

    assert_eq!(ctx.store.latest_message_id(100), Some(3));
    assert!(ctx.store.get_message(100, 1).is_none());
    assert!(ctx.store.get_message(100, 2).is_none());
}

#[tokio::test]
async fn forward_sync_resumes_after_latest() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);
    env.store()
        .insert_messages_batch(100, &[new_message(2, 2000, Some("existing"))])
        .unwrap();

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [
            {"id": 1, "date": 1000, "message": "old"},
            {"id": 2, "date": 2000, "message": "existing"},
            {"id": 3, "date": 3000, "message": "new"},
            {"id": 4, "date": 4000, "message": "poll", "media_type": "poll"},
            {"id": 5, "date": 5000, "message": "newest"}
        ]}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::messages::run(&ctx).await.unwrap();

    assert!(ctx.store.get_message(100, 1).is_none(), "older than resume point");
    assert!(ctx.store.get_message(100, 3).is_some());
    assert!(ctx.store.get_message(100, 4).is_none(), "polls are skipped");
    assert!(ctx.store.get_message(100, 5).is_some());
}

#[tokio::test]
async fn media_downloads_and_pending_marks() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);
    env.store()
        .insert_messages_batch(100, &[new_message(1, 1000, Some("seeded"))])
        .unwrap();

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [
            {"id": 1, "date": 1000, "message": "seeded"},
            {"id": 2, "date": 2000, "media_type": "photo", "has_media": true},
            {"id": 3, "date": 3000, "media_type": "photo", "has_media": true}
        ]},
        "media": {"100/2": {"name": "ok.jpg", "content": "bytes"}}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::messages::run(&ctx).await.unwrap();

    let ok = ctx.store.get_message(100, 2).unwrap();
    assert_eq!(ok.media_path.as_deref(), Some("100/ok.jpg"));
    assert_eq!(ok.media_pending, 0);
    assert!(env.config.media_dir().join("100/ok.jpg").exists());

    // No media payload upstream: inserted with no path, marked pending.
    let missing = ctx.store.get_message(100, 3).unwrap();
    assert!(missing.media_path.is_none());
    assert_eq!(missing.media_pending, 1);
}

#[tokio::test]
async fn read_state_reconciliation() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);
    env.store()
        .insert_messages_batch(100, &[new_message(1, 1000, Some("seeded"))])
        .unwrap();

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [
            {"id": 1, "date": 1000, "message": "seeded"},
            {"id": 2, "date": 2000, "message": "two"},
            {"id": 3, "date": 3000, "message": "three"}
        ]},
        "read_inbox_max_id": {"100": 2}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::messages::run(&ctx).await.unwrap();

    assert_eq!(ctx.store.get_message(100, 1).unwrap().read, 1);
    assert_eq!(ctx.store.get_message(100, 2).unwrap().read, 1);
    assert_eq!(ctx.store.get_message(100, 3).unwrap().read, 0);
}

/// FloodWait on one channel skips it and continues with the next; the
/// stage still exits successfully.
#[tokio::test]
async fn flood_wait_skips_to_next_channel() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Flooded", None);
    seed_channel(env.store(), 200, "Healthy", None);

    let fixture = json!({
        "channels": [
            {"id": 100, "access_hash": 100000, "title": "Flooded", "broadcast": 1},
            {"id": 200, "access_hash": 200000, "title": "Healthy", "broadcast": 1}
        ],
        "messages": {
            "100": [{"id": 1, "date": 1000, "message": "unreachable"}],
            "200": [{"id": 9, "date": 9000, "message": "fine"}]
        },
        "flood_wait": [{"method": "iter_messages", "channel_id": 100, "seconds": 42}]
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::messages::run(&ctx).await.unwrap();

    assert_eq!(ctx.store.latest_message_id(100), None);
    assert_eq!(ctx.store.latest_message_id(200), Some(9));
}

/// The pause sentinel holds the stage before any upstream work; clearing it
/// resumes progress.
#[tokio::test]
async fn pause_flag_blocks_and_resumes() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [{"id": 1, "date": 1000, "message": "only"}]}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;

    let pause = PauseFlag::new(env.config.pause_file());
    pause.raise().unwrap();

    let check_store = env.open_store();
    let task = tokio::spawn(async move {
        sync::messages::run(&ctx).await.unwrap();
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(check_store.latest_message_id(100), None, "progress while paused");

    pause.clear();
    task.await.unwrap();
    assert_eq!(check_store.latest_message_id(100), Some(1));
}

#[tokio::test]
async fn history_backfill_substitutes_from_backup() {
    let chunk = 64 * 1024;
    let big: String = "zq".repeat(chunk); // 128 KiB, same bytes as the backup copy

    let env = TestEnv::new();
    {
        let store = env.store();
        seed_channel(store, 100, "Alpha", None);
        store.update_channel_download_all(100, 1).unwrap();

        let archive = env.config.data_dir.join("archive");
        std::fs::create_dir_all(archive.join("video_files")).unwrap();
        std::fs::write(archive.join("video_files/clip.mp4"), big.as_bytes()).unwrap();
        store
            .update_channel_backup_path(100, Some(&archive.display().to_string()))
            .unwrap();

        // Backfill walks down from the oldest stored id.
        store
            .insert_messages_batch(100, &[new_message(50, 50_000, Some("anchor"))])
            .unwrap();
    }

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [
            {"id": 40, "date": 40_000, "message": "text history"},
            {"id": 41, "date": 41_000, "media_type": "video", "has_media": true},
            {"id": 42, "date": 42_000, "media_type": "photo", "has_media": true},
            {"id": 60, "date": 60_000, "message": "newer than oldest, out of range"}
        ]},
        "media": {
            "100/41": {"name": "upstream.mp4", "content": big},
            "100/42": {"name": "tiny.jpg", "content": "small-photo"}
        }
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::history::run(&ctx).await.unwrap();

    // Large file matched the indexed backup: local copy, byte-identical.
    let video = ctx.store.get_message(100, 41).unwrap();
    assert_eq!(video.media_path.as_deref(), Some("100/clip.mp4"));
    let copied = std::fs::read(env.config.media_dir().join("100/clip.mp4")).unwrap();
    assert_eq!(copied, big.as_bytes());

    // Small file downloaded directly.
    let photo = ctx.store.get_message(100, 42).unwrap();
    assert_eq!(photo.media_path.as_deref(), Some("100/tiny.jpg"));

    // Backfilled rows arrive already read; the forward range is untouched.
    assert_eq!(ctx.store.get_message(100, 40).unwrap().read, 1);
    assert_eq!(video.read, 1);
    assert!(ctx.store.get_message(100, 60).is_none());
}

#[tokio::test]
async fn read_sync_acknowledges_upstream() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);
    env.store()
        .insert_messages_batch(
            100,
            &[
                new_message(1, 1000, Some("a")),
                new_message(2, 2000, Some("b")),
            ],
        )
        .unwrap();
    env.store().mark_messages_read(&[(100, 1), (100, 2)]).unwrap();

    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 100000, "title": "Alpha", "broadcast": 1}],
        "messages": {}
    });
    let (ctx, _daemon) = stage_ctx(&env, fixture).await;
    sync::read_sync::run(&ctx).await.unwrap();

    assert_eq!(ctx.store.get_message(100, 1).unwrap().read_in_tg, 1);
    assert_eq!(ctx.store.get_message(100, 2).unwrap().read_in_tg, 1);
}

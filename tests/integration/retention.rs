use chanfeed::workers::cleanup::{
    MEDIA_MAX_AGE_SECS, MESSAGE_MAX_AGE_SECS, run_cleanup_at,
};

use crate::common::{TestEnv, media_message, new_message, raw_conn, seed_channel};
use chanfeed::models::MediaType;

const NOW: i64 = 1_750_000_000;

fn write_media(env: &TestEnv, rel: &str, len: usize) -> u64 {
    let full = env.config.media_dir().join(rel);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(&full, vec![0u8; len]).unwrap();
    len as u64
}

fn set_read_at(env: &TestEnv, channel_id: i64, message_id: i64, read_at: i64) {
    let conn = raw_conn(&env.config.db_path());
    conn.execute(
        &format!("UPDATE channel_{channel_id} SET read = 1, read_at = ?1 WHERE id = ?2"),
        rusqlite::params![read_at, message_id],
    )
    .unwrap();
}

/// Two-phase retention: media goes 7 days after reading, the row 30 days
/// after; bookmarked and anchored rows and the latest row are untouchable.
#[test]
fn two_phase_retention() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);

    let size = write_media(&env, "100/old.bin", 5000);
    write_media(&env, "100/marked.bin", 700);
    write_media(&env, "100/pinned.bin", 800);

    store
        .insert_messages_batch(
            100,
            &[
                media_message(1, NOW - 20 * 86400, MediaType::Document, "100/old.bin"),
                media_message(2, NOW - 20 * 86400, MediaType::Document, "100/marked.bin"),
                media_message(3, NOW - 20 * 86400, MediaType::Document, "100/pinned.bin"),
                new_message(4, NOW, Some("latest stays")),
            ],
        )
        .unwrap();

    // All three read 10 days ago; one bookmarked, one anchored.
    for id in [1, 2, 3] {
        set_read_at(&env, 100, id, NOW - 10 * 86400);
    }
    store.update_bookmark(100, 2, 1).unwrap();
    store.update_anchor(100, 3, 1).unwrap();

    // Index the doomed message so FTS cleanup is observable.
    store
        .index_messages_batch(100, &[(1, "doomed searchable message".to_string())])
        .unwrap();

    // Phase 1: 10 days past reading clears media but keeps the row.
    let result = run_cleanup_at(store, &env.config.media_dir(), NOW);
    assert_eq!(result.files_deleted, 1);
    assert_eq!(result.bytes_freed, size);
    assert_eq!(result.messages_deleted, 0);

    let m1 = store.get_message(100, 1).unwrap();
    assert!(m1.media_path.is_none());
    assert!(!env.config.media_dir().join("100/old.bin").exists());
    // Bookmarked and anchored siblings keep their files.
    assert!(env.config.media_dir().join("100/marked.bin").exists());
    assert!(env.config.media_dir().join("100/pinned.bin").exists());

    // Phase 2: 31 days past reading deletes the row and its FTS entry.
    for id in [1, 2, 3] {
        set_read_at(&env, 100, id, NOW - 31 * 86400);
    }
    let result = run_cleanup_at(store, &env.config.media_dir(), NOW);
    assert!(result.messages_deleted >= 1);

    assert!(store.get_message(100, 1).is_none());
    assert!(store.get_message(100, 2).is_some(), "bookmarked row deleted");
    assert!(store.get_message(100, 3).is_some(), "anchored row deleted");
    assert!(store.get_message(100, 4).is_some(), "latest row deleted");
    assert!(store.search_messages("doomed", 10, None).is_empty());
}

#[test]
fn latest_row_survives_even_when_expired() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);
    store
        .insert_messages_batch(100, &[new_message(1, NOW - 90 * 86400, Some("only row"))])
        .unwrap();
    set_read_at(&env, 100, 1, NOW - 90 * 86400);

    run_cleanup_at(store, &env.config.media_dir(), NOW);
    assert!(store.get_message(100, 1).is_some());
}

#[test]
fn download_all_channels_are_not_cleaned() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);
    store.update_channel_download_all(100, 1).unwrap();
    store
        .insert_messages_batch(
            100,
            &[
                new_message(1, NOW - 90 * 86400, Some("kept history")),
                new_message(2, NOW, Some("latest")),
            ],
        )
        .unwrap();
    set_read_at(&env, 100, 1, NOW - 90 * 86400);

    run_cleanup_at(store, &env.config.media_dir(), NOW);
    assert!(store.get_message(100, 1).is_some());
}

#[test]
fn unread_rows_are_untouched() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);
    write_media(&env, "100/unread.bin", 100);
    store
        .insert_messages_batch(
            100,
            &[
                media_message(1, NOW - 90 * 86400, MediaType::Photo, "100/unread.bin"),
                new_message(2, NOW, Some("latest")),
            ],
        )
        .unwrap();

    run_cleanup_at(store, &env.config.media_dir(), NOW);
    let m = store.get_message(100, 1).unwrap();
    assert!(m.media_path.is_some());
    assert!(env.config.media_dir().join("100/unread.bin").exists());
}

/// Cutoffs match the documented windows.
#[test]
fn retention_windows() {
    assert_eq!(MEDIA_MAX_AGE_SECS, 7 * 24 * 60 * 60);
    assert_eq!(MESSAGE_MAX_AGE_SECS, 30 * 24 * 60 * 60);
}

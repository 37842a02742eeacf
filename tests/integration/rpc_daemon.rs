use std::sync::Arc;

use chanfeed::client::{RpcClient, RpcError, RpcPool, is_daemon_running};
use chanfeed::daemon::{Daemon, Session};
use chanfeed::models::Credential;
use chanfeed::upstream::{StubFixture, StubUpstream};
use md5::{Digest, Md5};
use serde_json::json;
use tokio::net::TcpListener;

use crate::common::{start_stub_daemon, temp_path, test_cred};

fn fixture_two_channels() -> serde_json::Value {
    json!({
        "channels": [
            {"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1},
            {"id": 200, "access_hash": 2, "title": "Beta", "broadcast": 1},
            {"id": 300, "access_hash": 3, "title": "Chat", "broadcast": 0}
        ],
        "messages": {
            "100": [
                {"id": 1, "date": 1000, "message": "first"},
                {"id": 2, "date": 2000, "message": "second"},
                {"id": 3, "date": 3000, "message": "third", "media_type": "poll"},
                {"id": 4, "date": 4000, "message": "fourth"}
            ]
        },
        "read_inbox_max_id": {"100": 2}
    })
}

#[tokio::test]
async fn ping_reports_sessions() {
    let (addr, _daemon) = start_stub_daemon(fixture_two_channels()).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let status = client.ping().await.unwrap();
    assert_eq!(status.status, "ok");
    assert_eq!(status.clients, 1);
    assert_eq!(status.primary_id, Some(1));
    assert!(is_daemon_running(&addr).await);
}

#[tokio::test]
async fn dialogs_are_broadcast_only() {
    let (addr, _daemon) = start_stub_daemon(fixture_two_channels()).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let dialogs = client.iter_dialogs().await.unwrap();
    let ids: Vec<i64> = dialogs.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![100, 200]);
}

#[tokio::test]
async fn iter_messages_bounds_and_order() {
    let (addr, _daemon) = start_stub_daemon(fixture_two_channels()).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    // Default order: newest first.
    let all = client
        .iter_messages(100, 1, None, None, None, false)
        .await
        .unwrap();
    let ids: Vec<i64> = all.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);

    // min_id is exclusive; reverse yields ascending ids.
    let newer = client
        .iter_messages(100, 1, Some(2), None, None, true)
        .await
        .unwrap();
    let ids: Vec<i64> = newer.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![3, 4]);

    // max_id exclusive with a limit.
    let older = client
        .iter_messages(100, 1, None, Some(4), Some(2), false)
        .await
        .unwrap();
    let ids: Vec<i64> = older.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![3, 2]);
}

#[tokio::test]
async fn get_read_state_round_trip() {
    let (addr, _daemon) = start_stub_daemon(fixture_two_channels()).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let state = client.get_read_state(100, 1).await.unwrap();
    assert_eq!(state.read_inbox_max_id, Some(2));

    let ack = client.send_read_acknowledge(100, 1, 2).await.unwrap();
    assert!(ack.success);
}

#[tokio::test]
async fn flood_wait_surfaces_with_seconds() {
    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [{"id": 1, "date": 1000, "message": "x"}]},
        "flood_wait": [{"method": "iter_messages", "channel_id": 100, "seconds": 42}]
    });
    let (addr, _daemon) = start_stub_daemon(fixture).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let err = client
        .iter_messages(100, 1, None, None, None, false)
        .await
        .unwrap_err();
    match err {
        RpcError::FloodWait { seconds } => assert_eq!(seconds, 42),
        other => panic!("expected FloodWait, got {other:?}"),
    }
    // The connection stays usable for other methods.
    assert_eq!(client.ping().await.unwrap().status, "ok");
}

#[tokio::test]
async fn media_hash_small_files_skip_hashing() {
    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [{"id": 1, "date": 1000, "media_type": "photo", "has_media": true}]},
        "media": {"100/1": {"name": "small.jpg", "content": "little"}}
    });
    let (addr, _daemon) = start_stub_daemon(fixture).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let result = client.get_media_hash(100, 1, 1).await.unwrap();
    assert!(!result.needs_hash);
    assert!(result.hash.is_none());
    assert_eq!(result.size, 6);
}

#[tokio::test]
async fn media_hash_large_files_hash_first_chunk() {
    let chunk = 64 * 1024;
    let contents: String = "ab".repeat(chunk); // 128 KiB
    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [{"id": 1, "date": 1000, "media_type": "document", "has_media": true}]},
        "media": {"100/1": {"name": "big.bin", "content": contents}}
    });
    let (addr, _daemon) = start_stub_daemon(fixture).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let result = client.get_media_hash(100, 1, 1).await.unwrap();
    assert!(result.needs_hash);
    assert_eq!(result.size, (2 * chunk) as u64);
    let expected = hex::encode(Md5::digest(&contents.as_bytes()[..chunk]));
    assert_eq!(result.hash.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn download_media_writes_under_channel_dir() {
    let fixture = json!({
        "channels": [{"id": 100, "access_hash": 1, "title": "Alpha", "broadcast": 1}],
        "messages": {"100": [{"id": 1, "date": 1000, "media_type": "photo", "has_media": true}]},
        "media": {"100/1": {"name": "pic.jpg", "content": "jpeg-bytes"}}
    });
    let (addr, _daemon) = start_stub_daemon(fixture).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    let dest = temp_path("_media");
    let result = client
        .download_media(100, 1, 1, &dest.display().to_string(), None)
        .await
        .unwrap();
    assert_eq!(result.path.as_deref(), Some("100/pic.jpg"));
    let bytes = std::fs::read(dest.join("100/pic.jpg")).unwrap();
    assert_eq!(bytes, b"jpeg-bytes");
    std::fs::remove_dir_all(&dest).ok();
}

/// Pool slots pin distinct upstream sessions, so parallel downloads spread
/// across sessions instead of all resolving to the primary.
#[tokio::test]
async fn pool_slots_pin_distinct_sessions() {
    let fixture: StubFixture =
        serde_json::from_value(fixture_two_channels()).expect("valid stub fixture");
    let second_cred = Credential {
        id: 2,
        api_id: 67890,
        api_hash: "def".to_string(),
        phone_number: "+15557654321".to_string(),
        primary: false,
    };
    let sessions = vec![
        Session::new(&test_cred(), Box::new(StubUpstream::new(fixture))),
        Session::new(
            &second_cred,
            Box::new(StubUpstream::new(StubFixture::default())),
        ),
    ];
    let daemon = Arc::new(Daemon::new(sessions));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&daemon).serve(listener));

    let pool = RpcPool::connect(&addr, 2).await.unwrap();
    let first = pool.lock_next().await;
    let second = pool.lock_next().await;
    let mut ids = vec![first.client_id(), second.client_id()];
    ids.sort();
    assert_eq!(ids, vec![Some(1), Some(2)]);
    drop(first);
    drop(second);

    // The control connection stays on the primary.
    assert_eq!(pool.lock_control().await.client_id(), None);

    // Calls through a pinned slot still resolve server-side.
    let mut slot = pool.lock_next().await;
    assert_eq!(slot.ping().await.unwrap().status, "ok");
}

#[tokio::test]
async fn get_messages_for_unknown_channel_is_empty() {
    let (addr, _daemon) = start_stub_daemon(fixture_two_channels()).await;
    let mut client = RpcClient::connect(&addr).await.unwrap();
    let messages = client.get_messages(999, 1, vec![1]).await.unwrap();
    assert!(messages.is_empty());
}

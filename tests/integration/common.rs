use std::path::PathBuf;
use std::sync::Arc;

use chanfeed::config::Config;
use chanfeed::daemon::{Daemon, Session};
use chanfeed::models::{Credential, MediaType, StoredMessage};
use chanfeed::store::Store;
use chanfeed::store::messages::NewMessage;
use chanfeed::upstream::{ChannelRecord, StubFixture, StubUpstream};
use tokio::net::TcpListener;

/// Unique path under /tmp; prevents parallel test contention.
pub fn temp_path(suffix: &str) -> PathBuf {
    let tag = uuid::Uuid::new_v4().to_string();
    let short = tag.split('-').next().unwrap();
    PathBuf::from(format!("/tmp/chanfeed_test_{short}{suffix}"))
}

/// Store over a temp DB file, removed (with WAL sidecars) on drop.
pub struct TestStore {
    store: Option<Store>,
    pub path: PathBuf,
}

impl TestStore {
    pub fn new() -> Self {
        let path = temp_path(".db");
        let store = Store::open(&path).expect("open test store");
        TestStore {
            store: Some(store),
            path,
        }
    }

    /// Drop the store handle but keep the files (for reopen tests).
    pub fn close(&mut self) {
        self.store.take();
    }

    pub fn reopen(&mut self) {
        self.store = Some(Store::open(&self.path).expect("reopen test store"));
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        self.store.take();
        std::fs::remove_file(&self.path).ok();
        std::fs::remove_file(self.path.with_extension("db-wal")).ok();
        std::fs::remove_file(self.path.with_extension("db-shm")).ok();
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;
    fn deref(&self) -> &Store {
        self.store.as_ref().unwrap()
    }
}

pub fn test_store() -> TestStore {
    TestStore::new()
}

/// Data directory (with store inside) removed recursively on drop.
pub struct TestEnv {
    pub config: Config,
    store: Option<Store>,
}

impl TestEnv {
    pub fn new() -> Self {
        let data_dir = temp_path("");
        std::fs::create_dir_all(&data_dir).unwrap();
        let config = test_config(data_dir);
        let store = Store::open(&config.db_path()).expect("open env store");
        TestEnv {
            config,
            store: Some(store),
        }
    }

    pub fn store(&self) -> &Store {
        self.store.as_ref().unwrap()
    }

    pub fn open_store(&self) -> Store {
        Store::open(&self.config.db_path()).expect("open env store")
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.store.take();
        std::fs::remove_dir_all(&self.config.data_dir).ok();
    }
}

pub fn test_config(data_dir: PathBuf) -> Config {
    Config {
        data_dir,
        daemon_host: "127.0.0.1".to_string(),
        daemon_port: 0,
        web_host: "127.0.0.1".to_string(),
        web_port: 0,
        ai_provider: "auto".to_string(),
        mistral_api_key: String::new(),
        mistral_model: "mistral-small-latest".to_string(),
        cerebras_api_key: String::new(),
        cerebras_model: "llama-3.3-70b".to_string(),
        dedup_min_message_length: 50,
        dedup_messages_per_run: 100,
        dedup_api_delay_ms: 0,
        concurrent_downloads: 5,
        history_batch: 500,
        rpc_pool_size: 2,
    }
}

pub fn channel_record(id: i64, title: &str) -> ChannelRecord {
    ChannelRecord {
        id,
        access_hash: Some(id * 1000),
        title: title.to_string(),
        username: None,
        photo_id: None,
        date: Some(1_700_000_000),
        participants_count: Some(10),
        broadcast: 1,
        megagroup: 0,
        verified: 0,
        restricted: 0,
        scam: 0,
        fake: 0,
    }
}

/// Upsert an active channel (and its message table), optionally grouped.
pub fn seed_channel(store: &Store, id: i64, title: &str, group_id: Option<i64>) {
    store
        .upsert_channel(&channel_record(id, title), 1_700_000_000)
        .unwrap();
    store.update_channel_active(id, 1).unwrap();
    if let Some(group_id) = group_id {
        store.update_channel_group(id, Some(group_id)).unwrap();
    }
    store.create_channel_messages_table(id).unwrap();
}

/// Group with dedup enabled.
pub fn seed_dedup_group(store: &Store, name: &str) -> i64 {
    let id = store.create_group(name).unwrap();
    store.set_group_dedup(id, 1).unwrap();
    id
}

pub fn new_message(id: i64, date: i64, text: Option<&str>) -> NewMessage {
    NewMessage {
        id,
        date: Some(date),
        message: text.map(str::to_string),
        entities: None,
        out: 0,
        mentioned: 0,
        media_unread: 0,
        silent: 0,
        post: 1,
        from_id: None,
        fwd_from_id: None,
        fwd_from_name: None,
        reply_to_msg_id: None,
        media_type: None,
        media_path: None,
        views: None,
        forwards: None,
        replies: None,
        edit_date: None,
        post_author: None,
        grouped_id: None,
        created_at: date,
        media_pending: 0,
        read: 0,
    }
}

pub fn media_message(id: i64, date: i64, kind: MediaType, path: &str) -> NewMessage {
    let mut m = new_message(id, date, None);
    m.media_type = Some(kind);
    m.media_path = Some(path.to_string());
    m
}

/// Bare row for the pure regrouping functions.
pub fn stored(channel_id: i64, id: i64, date: i64) -> StoredMessage {
    StoredMessage {
        channel_id,
        channel_title: None,
        id,
        date: Some(date),
        message: None,
        entities: None,
        out: 0,
        mentioned: 0,
        media_unread: 0,
        silent: 0,
        post: 1,
        from_id: None,
        fwd_from_id: None,
        fwd_from_name: None,
        reply_to_msg_id: None,
        media_type: None,
        media_path: None,
        views: None,
        forwards: None,
        replies: None,
        edit_date: None,
        post_author: None,
        grouped_id: None,
        created_at: Some(date),
        read: 0,
        read_at: None,
        read_in_tg: 0,
        rating: 0,
        bookmarked: 0,
        anchored: 0,
        hidden: 0,
        html_downloaded: 0,
        media_pending: 0,
        video_thumbnail_path: None,
        ai_summary: None,
        content_hash: None,
        content_hash_pending: 1,
        media_hash: None,
        media_hash_pending: 1,
        duplicate_of_channel: None,
        duplicate_of_message: None,
    }
}

pub fn test_cred() -> Credential {
    Credential {
        id: 1,
        api_id: 12345,
        api_hash: "abc".to_string(),
        phone_number: "+15551234567".to_string(),
        primary: true,
    }
}

/// Daemon over a stub fixture on an ephemeral port; returns its address.
pub async fn start_stub_daemon(fixture: serde_json::Value) -> (String, Arc<Daemon>) {
    let fixture: StubFixture = serde_json::from_value(fixture).expect("valid stub fixture");
    let session = Session::new(&test_cred(), Box::new(StubUpstream::new(fixture)));
    let daemon = Arc::new(Daemon::new(vec![session]));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&daemon).serve(listener));
    (addr, daemon)
}

/// Direct connection for backdating rows (read_at etc.) in tests.
pub fn raw_conn(path: &std::path::Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}

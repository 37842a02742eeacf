//! The store: single source of truth for channels, per-channel message
//! tables, dedup registries, backup indexes and the search index.
//!
//! One SQLite file in WAL mode with a 10 s busy timeout; every process
//! opens its own `Store` and each accessor locks the connection for the
//! duration of the call, so methods never hold the lock across awaits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

pub mod backup;
pub mod channels;
pub mod dedup;
pub mod messages;
pub mod migrate;
pub mod query;
pub mod search;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Store> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=10000;
             PRAGMA cache_size=-65536;",
        )?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        migrate::run(&store.conn())?;
        Ok(store)
    }

    /// In-memory store, migrations applied. Test helper.
    pub fn open_in_memory() -> rusqlite::Result<Store> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        migrate::run(&store.conn())?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-channel message table name.
pub fn message_table(channel_id: i64) -> String {
    format!("channel_{channel_id}")
}

/// Per-channel backup index table name.
pub fn backup_table(channel_id: i64) -> String {
    format!("channel_backup_hash_{channel_id}")
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

//! Idempotent schema migration: add-column-if-absent, add-index-if-columns-
//! present, and replacement of legacy tables whose shape no longer matches
//! (single-column hash registries, contentless FTS).

use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY,
            access_hash INTEGER,
            title TEXT NOT NULL,
            username TEXT,
            photo_id INTEGER,
            date INTEGER,
            participants_count INTEGER,
            broadcast INTEGER DEFAULT 0,
            megagroup INTEGER DEFAULT 0,
            verified INTEGER DEFAULT 0,
            restricted INTEGER DEFAULT 0,
            scam INTEGER DEFAULT 0,
            fake INTEGER DEFAULT 0,
            subscribed INTEGER DEFAULT 1,
            active INTEGER DEFAULT 0,
            group_id INTEGER,
            created_at INTEGER,
            updated_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tg_creds (
            id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            api_id INTEGER NOT NULL,
            api_hash TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            \"primary\" INTEGER DEFAULT 0 NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tag_exclusions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tags TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );",
    )?;

    add_column(conn, "channels", "last_active", "INTEGER")?;
    add_column(conn, "channels", "download_all", "INTEGER DEFAULT 0")?;
    add_column(conn, "channels", "backup_path", "TEXT")?;
    add_column(conn, "channels", "download_photos", "INTEGER DEFAULT 1")?;
    add_column(conn, "channels", "download_videos", "INTEGER DEFAULT 1")?;
    add_column(conn, "channels", "download_documents", "INTEGER DEFAULT 1")?;
    add_column(conn, "channels", "download_audio", "INTEGER DEFAULT 1")?;
    add_column(conn, "groups", "dedup", "INTEGER DEFAULT 0")?;

    create_index_if_absent(conn, "channels", "username", &["username"])?;
    create_index_if_absent(conn, "channels", "subscribed", &["subscribed"])?;

    replace_legacy_registry(conn, "content_hashes")?;
    replace_legacy_registry(conn, "media_hashes")?;
    replace_legacy_fts(conn)?;
    migrate_channel_tables(conn)?;

    Ok(())
}

/// Add a column unless `PRAGMA table_info` already lists it.
pub fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
        info!("added column {column} to {table}");
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Create an index unless it exists. Skips silently when any referenced
/// column is missing, so old tables stay usable until their columns arrive.
pub fn create_index_if_absent(
    conn: &Connection,
    table: &str,
    suffix: &str,
    columns: &[&str],
) -> rusqlite::Result<()> {
    let index_name = format!("idx_{table}_{suffix}");
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1",
            [&index_name],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if exists {
        return Ok(());
    }
    for col in columns {
        if !column_exists(conn, table, col)? {
            return Ok(());
        }
    }
    conn.execute_batch(&format!(
        "CREATE INDEX {index_name} ON {table} ({});",
        columns.join(", ")
    ))?;
    Ok(())
}

/// Registries are keyed `(hash, group_id)`; an old table with a plain
/// single-column PK is dropped and rebuilt on demand by the dedup passes.
fn replace_legacy_registry(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |row| row.get(0),
        )
        .ok();
    if let Some(sql) = &sql {
        if sql.contains("group_id") {
            return Ok(());
        }
        info!("replacing legacy {table} table (missing group scope)");
        conn.execute_batch(&format!("DROP TABLE {table};"))?;
    }
    conn.execute_batch(&format!(
        "CREATE TABLE {table} (
            hash TEXT NOT NULL,
            group_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            message_date INTEGER,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (hash, group_id)
        );"
    ))?;
    create_index_if_absent(conn, table, "date", &["message_date"])?;
    Ok(())
}

/// UNINDEXED columns do not work in contentless mode; a prior `content=''`
/// table is dropped and the index rebuilt by the search indexer.
fn replace_legacy_fts(conn: &Connection) -> rusqlite::Result<()> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name='messages_fts'",
            [],
            |row| row.get(0),
        )
        .ok();
    if let Some(sql) = &sql {
        if !sql.to_lowercase().contains("content=''") {
            return Ok(());
        }
        info!("dropping contentless messages_fts table");
        conn.execute_batch("DROP TABLE messages_fts;")?;
    }
    conn.execute_batch(
        "CREATE VIRTUAL TABLE messages_fts USING fts5(
            channel_id UNINDEXED,
            message_id UNINDEXED,
            message,
            tokenize=\"trigram\"
        );",
    )?;
    Ok(())
}

/// Full per-channel column set minus the primary key; tables that predate
/// any of these get the missing ones added. Newly created tables already
/// carry all of them.
const CHANNEL_TABLE_COLUMNS: &[(&str, &str)] = &[
    ("date", "INTEGER"),
    ("message", "TEXT"),
    ("entities", "TEXT"),
    ("out", "INTEGER DEFAULT 0"),
    ("mentioned", "INTEGER DEFAULT 0"),
    ("media_unread", "INTEGER DEFAULT 0"),
    ("silent", "INTEGER DEFAULT 0"),
    ("post", "INTEGER DEFAULT 0"),
    ("from_id", "INTEGER"),
    ("fwd_from_id", "INTEGER"),
    ("fwd_from_name", "TEXT"),
    ("reply_to_msg_id", "INTEGER"),
    ("media_type", "TEXT"),
    ("media_path", "TEXT"),
    ("views", "INTEGER"),
    ("forwards", "INTEGER"),
    ("replies", "INTEGER"),
    ("edit_date", "INTEGER"),
    ("post_author", "TEXT"),
    ("grouped_id", "INTEGER"),
    ("created_at", "INTEGER"),
    ("read", "INTEGER DEFAULT 0"),
    ("read_at", "INTEGER"),
    ("read_in_tg", "INTEGER DEFAULT 0"),
    ("rating", "INTEGER DEFAULT 0"),
    ("bookmarked", "INTEGER DEFAULT 0"),
    ("anchored", "INTEGER DEFAULT 0"),
    ("hidden", "INTEGER DEFAULT 0"),
    ("html_downloaded", "INTEGER DEFAULT 0"),
    ("media_pending", "INTEGER DEFAULT 0"),
    ("video_thumbnail_path", "TEXT"),
    ("ai_summary", "TEXT"),
    ("content_hash", "TEXT"),
    ("content_hash_pending", "INTEGER DEFAULT 1"),
    ("media_hash", "TEXT"),
    ("media_hash_pending", "INTEGER DEFAULT 1"),
    ("duplicate_of_channel", "INTEGER"),
    ("duplicate_of_message", "INTEGER"),
];

fn migrate_channel_tables(conn: &Connection) -> rusqlite::Result<()> {
    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'channel_%'",
        )?;
        stmt.query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter(|name| !name.starts_with("channel_backup_hash_"))
            .collect()
    };

    for table in &tables {
        for (col, decl) in CHANNEL_TABLE_COLUMNS {
            add_column(conn, table, col, decl)?;
        }
        for (suffix, cols) in channel_table_indexes() {
            create_index_if_absent(conn, table, suffix, cols)?;
        }
    }
    Ok(())
}

pub(crate) fn channel_table_indexes() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("read_date", &["read", "date"]),
        ("date", &["date"]),
        ("bookmarked", &["bookmarked"]),
        ("anchored", &["anchored"]),
        ("hidden", &["hidden"]),
        ("content_hash", &["content_hash"]),
        ("content_hash_pending", &["content_hash_pending"]),
        ("media_hash", &["media_hash"]),
        ("media_hash_pending", &["media_hash_pending"]),
    ]
}

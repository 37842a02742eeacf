//! Per-channel backup indexes: `(file_path, file_size, hash)` where the
//! hash covers only the first 64 KiB and is null for small files.

use rusqlite::params;

use crate::store::{Store, backup_table};

impl Store {
    pub fn create_backup_hash_table(&self, channel_id: i64) -> rusqlite::Result<()> {
        let table = backup_table(channel_id);
        let conn = self.conn();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                file_path TEXT PRIMARY KEY,
                file_size INTEGER NOT NULL,
                hash TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_hash ON {table} (hash);
            CREATE INDEX IF NOT EXISTS idx_{table}_size ON {table} (file_size);"
        ))?;
        Ok(())
    }

    /// Paths already indexed; scanning never rehashes these.
    pub fn existing_backup_paths(&self, channel_id: i64) -> std::collections::HashSet<String> {
        let conn = self.conn();
        let Ok(mut stmt) =
            conn.prepare(&format!("SELECT file_path FROM {}", backup_table(channel_id)))
        else {
            return Default::default();
        };
        stmt.query_map([], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn insert_backup_hashes_batch(
        &self,
        channel_id: i64,
        entries: &[(String, i64, Option<String>)],
    ) -> rusqlite::Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let table = backup_table(channel_id);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table} (file_path, file_size, hash) VALUES (?1, ?2, ?3)"
            ))?;
            for (path, size, hash) in entries {
                stmt.execute(params![path, size, hash])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    pub fn find_backup_by_hash(&self, channel_id: i64, hash: &str) -> Option<String> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT file_path FROM {} WHERE hash = ?1 LIMIT 1",
                backup_table(channel_id)
            ),
            [hash],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn backup_hash_count(&self, channel_id: i64) -> i64 {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", backup_table(channel_id)),
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }
}

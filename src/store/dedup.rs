//! Dedup state on per-channel tables plus the first-writer hash registries.
//!
//! Registries are scoped by `(hash, group_id)`: the same hash under two
//! groups yields two independent first writers. First wins; no tie-breaking
//! on date. The single WAL writer is the arbiter of first-writer status.

use rusqlite::params;

use crate::models::StoredMessage;
use crate::store::{Store, message_table, now};

use super::messages::{MESSAGE_COLUMNS, message_from_row};

impl Store {
    /// Pending text-hash candidates below the length floor, for bulk skip.
    pub fn short_messages_for_skip(
        &self,
        channel_id: i64,
        limit: usize,
        min_length: usize,
    ) -> Vec<i64> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id FROM {}
             WHERE (content_hash_pending = 1 OR content_hash_pending IS NULL)
               AND (message IS NULL OR length(message) < ?1)
             LIMIT ?2",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map(params![min_length as i64, limit as i64], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn skip_content_hash(&self, channel_id: i64, message_id: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET content_hash_pending = -1 WHERE id = ?1",
                message_table(channel_id)
            ),
            [message_id],
        )?;
        Ok(())
    }

    /// Unread messages still queued for the text pass, newest first.
    pub fn messages_needing_hashes(
        &self,
        channel_id: i64,
        limit: usize,
        min_length: usize,
    ) -> Vec<StoredMessage> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {}
             WHERE (content_hash_pending = 1 OR content_hash_pending IS NULL)
               AND message IS NOT NULL
               AND length(message) >= ?1
               AND read = 0
             ORDER BY date DESC LIMIT ?2",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map(params![min_length as i64, limit as i64], |row| {
            message_from_row(channel_id, None, row)
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn update_content_hash(
        &self,
        channel_id: i64,
        message_id: i64,
        content_hash: &str,
        ai_summary: Option<&str>,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET content_hash = ?1, ai_summary = ?2, content_hash_pending = 0
                 WHERE id = ?3",
                message_table(channel_id)
            ),
            params![content_hash, ai_summary, message_id],
        )?;
        Ok(())
    }

    /// Pending media-hash candidates that can never have media.
    pub fn messages_without_media_for_skip(&self, channel_id: i64, limit: usize) -> Vec<i64> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id FROM {}
             WHERE (media_hash_pending = 1 OR media_hash_pending IS NULL)
               AND media_type IS NULL
             LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn skip_media_hash(&self, channel_id: i64, message_id: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET media_hash_pending = -1 WHERE id = ?1",
                message_table(channel_id)
            ),
            [message_id],
        )?;
        Ok(())
    }

    /// Unread messages with local media still queued for the media pass.
    pub fn messages_needing_media_hashes(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Vec<StoredMessage> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {}
             WHERE (media_hash_pending = 1 OR media_hash_pending IS NULL)
               AND media_path IS NOT NULL
               AND read = 0
             ORDER BY date DESC LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| message_from_row(channel_id, None, row))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn update_media_hash(
        &self,
        channel_id: i64,
        message_id: i64,
        media_hash: &str,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET media_hash = ?1, media_hash_pending = 0 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![media_hash, message_id],
        )?;
        Ok(())
    }

    pub fn mark_as_duplicate(
        &self,
        channel_id: i64,
        message_id: i64,
        original_channel: i64,
        original_message: i64,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET duplicate_of_channel = ?1, duplicate_of_message = ?2
                 WHERE id = ?3",
                message_table(channel_id)
            ),
            params![original_channel, original_message, message_id],
        )?;
        Ok(())
    }

    pub fn register_content_hash(
        &self,
        hash: &str,
        group_id: i64,
        channel_id: i64,
        message_id: i64,
        message_date: Option<i64>,
    ) -> rusqlite::Result<Option<(i64, i64)>> {
        self.register_hash("content_hashes", hash, group_id, channel_id, message_id, message_date)
    }

    pub fn register_media_hash(
        &self,
        hash: &str,
        group_id: i64,
        channel_id: i64,
        message_id: i64,
        message_date: Option<i64>,
    ) -> rusqlite::Result<Option<(i64, i64)>> {
        self.register_hash("media_hashes", hash, group_id, channel_id, message_id, message_date)
    }

    /// Lookup without registering; used for an album's per-member digests.
    pub fn find_media_hash(&self, hash: &str, group_id: i64) -> Option<(i64, i64)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT channel_id, message_id FROM media_hashes
             WHERE hash = ?1 AND group_id = ?2",
            params![hash, group_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()
    }

    /// Returns the existing registrant's coordinates, or None after
    /// registering as first writer.
    fn register_hash(
        &self,
        table: &str,
        hash: &str,
        group_id: i64,
        channel_id: i64,
        message_id: i64,
        message_date: Option<i64>,
    ) -> rusqlite::Result<Option<(i64, i64)>> {
        let conn = self.conn();
        let existing: Option<(i64, i64)> = conn
            .query_row(
                &format!(
                    "SELECT channel_id, message_id FROM {table}
                     WHERE hash = ?1 AND group_id = ?2"
                ),
                params![hash, group_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        if let Some(original) = existing {
            return Ok(Some(original));
        }
        conn.execute(
            &format!(
                "INSERT INTO {table} (hash, group_id, channel_id, message_id, message_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![hash, group_id, channel_id, message_id, message_date, now()],
        )?;
        Ok(None)
    }
}

//! Per-channel message tables: creation, batch inserts, read-state and
//! user-flag mutations.

use rusqlite::{Row, params};

use crate::models::{ChannelStats, MediaType, StoredMessage};
use crate::store::{Store, message_table, now};
use crate::upstream::MessageRecord;

/// Column list shared by every SELECT that maps into [`StoredMessage`].
/// Order must match [`message_from_row`].
pub const MESSAGE_COLUMNS: &str = "id, date, message, entities, out, mentioned, media_unread, \
     silent, post, from_id, fwd_from_id, fwd_from_name, reply_to_msg_id, media_type, media_path, \
     views, forwards, replies, edit_date, post_author, grouped_id, created_at, read, read_at, \
     read_in_tg, rating, bookmarked, anchored, hidden, html_downloaded, media_pending, \
     video_thumbnail_path, ai_summary, content_hash, content_hash_pending, media_hash, \
     media_hash_pending, duplicate_of_channel, duplicate_of_message";

pub fn message_from_row(
    channel_id: i64,
    channel_title: Option<&str>,
    row: &Row,
) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        channel_id,
        channel_title: channel_title.map(str::to_string),
        id: row.get(0)?,
        date: row.get(1)?,
        message: row.get(2)?,
        entities: row.get(3)?,
        out: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        mentioned: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        media_unread: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        silent: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        post: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        from_id: row.get(9)?,
        fwd_from_id: row.get(10)?,
        fwd_from_name: row.get(11)?,
        reply_to_msg_id: row.get(12)?,
        media_type: row
            .get::<_, Option<String>>(13)?
            .map(|s| MediaType::parse(&s)),
        media_path: row.get(14)?,
        views: row.get(15)?,
        forwards: row.get(16)?,
        replies: row.get(17)?,
        edit_date: row.get(18)?,
        post_author: row.get(19)?,
        grouped_id: row.get(20)?,
        created_at: row.get(21)?,
        read: row.get::<_, Option<i64>>(22)?.unwrap_or(0),
        read_at: row.get(23)?,
        read_in_tg: row.get::<_, Option<i64>>(24)?.unwrap_or(0),
        rating: row.get::<_, Option<i64>>(25)?.unwrap_or(0),
        bookmarked: row.get::<_, Option<i64>>(26)?.unwrap_or(0),
        anchored: row.get::<_, Option<i64>>(27)?.unwrap_or(0),
        hidden: row.get::<_, Option<i64>>(28)?.unwrap_or(0),
        html_downloaded: row.get::<_, Option<i64>>(29)?.unwrap_or(0),
        media_pending: row.get::<_, Option<i64>>(30)?.unwrap_or(0),
        video_thumbnail_path: row.get(31)?,
        ai_summary: row.get(32)?,
        content_hash: row.get(33)?,
        content_hash_pending: row.get::<_, Option<i64>>(34)?.unwrap_or(1),
        media_hash: row.get(35)?,
        media_hash_pending: row.get::<_, Option<i64>>(36)?.unwrap_or(1),
        duplicate_of_channel: row.get(37)?,
        duplicate_of_message: row.get(38)?,
    })
}

/// Insert payload built by the sync stages. `id` is the natural key; the
/// batch insert is OR IGNORE so replays are harmless.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: i64,
    pub date: Option<i64>,
    pub message: Option<String>,
    pub entities: Option<String>,
    pub out: i64,
    pub mentioned: i64,
    pub media_unread: i64,
    pub silent: i64,
    pub post: i64,
    pub from_id: Option<i64>,
    pub fwd_from_id: Option<i64>,
    pub fwd_from_name: Option<String>,
    pub reply_to_msg_id: Option<i64>,
    pub media_type: Option<MediaType>,
    pub media_path: Option<String>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub replies: Option<i64>,
    pub edit_date: Option<i64>,
    pub post_author: Option<String>,
    pub grouped_id: Option<i64>,
    pub created_at: i64,
    pub media_pending: i64,
    pub read: i64,
}

impl NewMessage {
    pub fn from_record(record: &MessageRecord, media_path: Option<String>, created_at: i64) -> Self {
        NewMessage {
            id: record.id,
            date: record.date,
            message: record.message.clone(),
            entities: record.entities_json(),
            out: record.out,
            mentioned: record.mentioned,
            media_unread: record.media_unread,
            silent: record.silent,
            post: record.post,
            from_id: record.from_id,
            fwd_from_id: record.fwd_from_id,
            fwd_from_name: record.fwd_from_name.clone(),
            reply_to_msg_id: record.reply_to_msg_id,
            media_type: record.media_type,
            media_path,
            views: record.views,
            forwards: record.forwards,
            replies: record.replies,
            edit_date: record.edit_date,
            post_author: record.post_author.clone(),
            grouped_id: record.grouped_id,
            created_at,
            media_pending: 0,
            read: 0,
        }
    }
}

impl Store {
    pub fn create_channel_messages_table(&self, channel_id: i64) -> rusqlite::Result<()> {
        let table = message_table(channel_id);
        let conn = self.conn();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                date INTEGER,
                message TEXT,
                entities TEXT,
                out INTEGER DEFAULT 0,
                mentioned INTEGER DEFAULT 0,
                media_unread INTEGER DEFAULT 0,
                silent INTEGER DEFAULT 0,
                post INTEGER DEFAULT 0,
                from_id INTEGER,
                fwd_from_id INTEGER,
                fwd_from_name TEXT,
                reply_to_msg_id INTEGER,
                media_type TEXT,
                media_path TEXT,
                views INTEGER,
                forwards INTEGER,
                replies INTEGER,
                edit_date INTEGER,
                post_author TEXT,
                grouped_id INTEGER,
                created_at INTEGER,
                read INTEGER DEFAULT 0,
                read_at INTEGER,
                read_in_tg INTEGER DEFAULT 0,
                rating INTEGER DEFAULT 0,
                bookmarked INTEGER DEFAULT 0,
                anchored INTEGER DEFAULT 0,
                hidden INTEGER DEFAULT 0,
                html_downloaded INTEGER DEFAULT 0,
                media_pending INTEGER DEFAULT 0,
                video_thumbnail_path TEXT,
                ai_summary TEXT,
                content_hash TEXT,
                content_hash_pending INTEGER DEFAULT 1,
                media_hash TEXT,
                media_hash_pending INTEGER DEFAULT 1,
                duplicate_of_channel INTEGER,
                duplicate_of_message INTEGER
            );"
        ))?;
        for (suffix, cols) in super::migrate::channel_table_indexes() {
            super::migrate::create_index_if_absent(&conn, &table, suffix, cols)?;
        }
        Ok(())
    }

    pub fn channel_table_exists(&self, channel_id: i64) -> rusqlite::Result<bool> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                [message_table(channel_id)],
                |_| Ok(true),
            )
            .unwrap_or(false))
    }

    pub fn latest_message_id(&self, channel_id: i64) -> Option<i64> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT MAX(id) FROM {}", message_table(channel_id)),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .ok()
        .flatten()
    }

    pub fn oldest_message_id(&self, channel_id: i64) -> Option<i64> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT MIN(id) FROM {}", message_table(channel_id)),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .ok()
        .flatten()
    }

    pub fn get_message(&self, channel_id: i64, message_id: i64) -> Option<StoredMessage> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM {} WHERE id = ?1",
                message_table(channel_id)
            ),
            [message_id],
            |row| message_from_row(channel_id, None, row),
        )
        .ok()
    }

    /// Batch insert in one transaction. Returns rows actually inserted.
    pub fn insert_messages_batch(
        &self,
        channel_id: i64,
        messages: &[NewMessage],
    ) -> rusqlite::Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        let table = message_table(channel_id);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {table} (
                    id, date, message, entities, out, mentioned, media_unread, silent, post,
                    from_id, fwd_from_id, fwd_from_name, reply_to_msg_id, media_type, media_path,
                    views, forwards, replies, edit_date, post_author, grouped_id, created_at,
                    media_pending, read
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)"
            ))?;
            for m in messages {
                inserted += stmt.execute(params![
                    m.id,
                    m.date,
                    m.message,
                    m.entities,
                    m.out,
                    m.mentioned,
                    m.media_unread,
                    m.silent,
                    m.post,
                    m.from_id,
                    m.fwd_from_id,
                    m.fwd_from_name,
                    m.reply_to_msg_id,
                    m.media_type.map(|t| t.as_str()),
                    m.media_path,
                    m.views,
                    m.forwards,
                    m.replies,
                    m.edit_date,
                    m.post_author,
                    m.grouped_id,
                    m.created_at,
                    m.media_pending,
                    m.read,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn messages_with_pending_media(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Vec<(i64, Option<MediaType>)> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id, media_type FROM {}
             WHERE media_pending = 1 AND media_path IS NULL
             ORDER BY date DESC LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?
                    .map(|s| MediaType::parse(&s)),
            ))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn update_message_media(
        &self,
        channel_id: i64,
        message_id: i64,
        media_path: Option<&str>,
        media_pending: i64,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET media_path = ?1, media_pending = ?2 WHERE id = ?3",
                message_table(channel_id)
            ),
            params![media_path, media_pending, message_id],
        )?;
        Ok(())
    }

    pub fn videos_without_thumbnails(&self, channel_id: i64, limit: usize) -> Vec<(i64, String)> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id, media_path FROM {}
             WHERE media_type = 'video'
               AND media_path IS NOT NULL
               AND video_thumbnail_path IS NULL
             ORDER BY date DESC LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn update_video_thumbnail(
        &self,
        channel_id: i64,
        message_id: i64,
        thumbnail_path: &str,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET video_thumbnail_path = ?1 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![thumbnail_path, message_id],
        )?;
        Ok(())
    }

    /// Mark `(channel_id, message_id)` pairs read. `read_at` is stamped only
    /// on the 0 -> 1 transition and never overwritten.
    pub fn mark_messages_read(&self, pairs: &[(i64, i64)]) -> rusqlite::Result<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let mut by_channel: std::collections::HashMap<i64, Vec<i64>> = Default::default();
        for (channel_id, message_id) in pairs {
            by_channel.entry(*channel_id).or_default().push(*message_id);
        }
        let ts = now();
        let conn = self.conn();
        let mut updated = 0;
        for (channel_id, ids) in by_channel {
            let table = message_table(channel_id);
            for chunk in ids.chunks(500) {
                let placeholders: Vec<String> =
                    (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
                let sql = format!(
                    "UPDATE {table} SET read = 1, read_at = ?1
                     WHERE id IN ({}) AND read = 0",
                    placeholders.join(",")
                );
                let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&ts];
                for id in chunk {
                    values.push(id);
                }
                if let Ok(n) = conn.execute(&sql, values.as_slice()) {
                    updated += n;
                }
            }
        }
        Ok(updated)
    }

    /// Reconcile read state observed upstream: everything up to `max_id`
    /// becomes read locally.
    pub fn mark_messages_read_up_to(&self, channel_id: i64, max_id: i64) -> usize {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET read = 1, read_at = ?1 WHERE id <= ?2 AND read = 0",
                message_table(channel_id)
            ),
            params![now(), max_id],
        )
        .unwrap_or(0)
    }

    /// Read locally but not yet acknowledged upstream, newest first.
    pub fn unsynced_read_messages(&self, channel_id: i64, limit: usize) -> Vec<i64> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id FROM {}
             WHERE read = 1 AND (read_in_tg = 0 OR read_in_tg IS NULL)
             ORDER BY id DESC LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn mark_messages_synced(&self, channel_id: i64, max_id: i64) -> usize {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET read_in_tg = 1
                 WHERE id <= ?1 AND read = 1 AND (read_in_tg = 0 OR read_in_tg IS NULL)",
                message_table(channel_id)
            ),
            [max_id],
        )
        .unwrap_or(0)
    }

    pub fn update_rating(
        &self,
        channel_id: i64,
        message_id: i64,
        rating: i64,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET rating = ?1 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![rating.clamp(-1, 1), message_id],
        )?;
        Ok(())
    }

    pub fn update_bookmark(
        &self,
        channel_id: i64,
        message_id: i64,
        bookmarked: i64,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET bookmarked = ?1 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![bookmarked, message_id],
        )?;
        Ok(())
    }

    pub fn update_anchor(
        &self,
        channel_id: i64,
        message_id: i64,
        anchored: i64,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET anchored = ?1 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![anchored, message_id],
        )?;
        Ok(())
    }

    pub fn update_hidden(
        &self,
        channel_id: i64,
        message_id: i64,
        hidden: i64,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE {} SET hidden = ?1 WHERE id = ?2",
                message_table(channel_id)
            ),
            params![hidden, message_id],
        )?;
        Ok(())
    }

    /// Every member of an album, ascending by id.
    pub fn album_messages(&self, channel_id: i64, grouped_id: i64) -> Vec<StoredMessage> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} WHERE grouped_id = ?1 ORDER BY id ASC",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([grouped_id], |row| message_from_row(channel_id, None, row))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn channel_stats(&self, channel_id: i64) -> ChannelStats {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        SUM(CASE WHEN read = 0 OR read IS NULL THEN 1 ELSE 0 END),
                        SUM(CASE WHEN bookmarked = 1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN rating = 1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN rating = -1 THEN 1 ELSE 0 END)
                 FROM {}",
                message_table(channel_id)
            ),
            [],
            |row| {
                Ok(ChannelStats {
                    total: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    unread: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    bookmarked: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    likes: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    dislikes: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                })
            },
        )
        .unwrap_or_default()
    }

    /// Messages referencing telegraph pages that have not been archived.
    pub fn messages_with_telegraph_links(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Vec<(i64, Option<String>, Option<String>)> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id, message, entities FROM {}
             WHERE (html_downloaded = 0 OR html_downloaded IS NULL)
               AND (entities LIKE '%telegra.ph%' OR message LIKE '%telegra.ph%')
             LIMIT ?1",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn mark_html_downloaded(&self, channel_id: i64, message_id: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            &format!(
                "UPDATE {} SET html_downloaded = 1 WHERE id = ?1",
                message_table(channel_id)
            ),
            [message_id],
        )?;
        Ok(())
    }

    /// Names of all per-channel message tables (backup tables excluded).
    pub fn all_message_table_channel_ids(&self) -> Vec<i64> {
        let conn = self.conn();
        let Ok(mut stmt) = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'channel_%'",
        ) else {
            return Vec::new();
        };
        stmt.query_map([], |row| row.get::<_, String>(0))
            .map(|rows| {
                rows.filter_map(|r| r.ok())
                    .filter(|name| !name.starts_with("channel_backup_hash_"))
                    .filter_map(|name| name.strip_prefix("channel_")?.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

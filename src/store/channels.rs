//! Channels, groups, credentials and tag exclusions.

use std::collections::HashSet;

use rusqlite::{Row, params};

use crate::models::{Channel, Credential, Group, TagExclusion};
use crate::store::{Store, now};
use crate::upstream::ChannelRecord;

const CHANNEL_COLUMNS: &str = "id, access_hash, title, username, photo_id, date, \
     participants_count, broadcast, megagroup, verified, restricted, scam, fake, subscribed, \
     active, group_id, download_all, download_photos, download_videos, download_documents, \
     download_audio, backup_path, last_active, created_at, updated_at";

fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        access_hash: row.get(1)?,
        title: row.get(2)?,
        username: row.get(3)?,
        photo_id: row.get(4)?,
        date: row.get(5)?,
        participants_count: row.get(6)?,
        broadcast: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        megagroup: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        verified: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
        restricted: row.get::<_, Option<i64>>(10)?.unwrap_or(0),
        scam: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
        fake: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        subscribed: row.get::<_, Option<i64>>(13)?.unwrap_or(0),
        active: row.get::<_, Option<i64>>(14)?.unwrap_or(0),
        group_id: row.get(15)?,
        download_all: row.get::<_, Option<i64>>(16)?.unwrap_or(0),
        download_photos: row.get::<_, Option<i64>>(17)?.unwrap_or(1),
        download_videos: row.get::<_, Option<i64>>(18)?.unwrap_or(1),
        download_documents: row.get::<_, Option<i64>>(19)?.unwrap_or(1),
        download_audio: row.get::<_, Option<i64>>(20)?.unwrap_or(1),
        backup_path: row.get(21)?,
        last_active: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
        group_name: None,
    })
}

fn upsert_channel_conn(
    conn: &rusqlite::Connection,
    record: &ChannelRecord,
    ts: i64,
) -> rusqlite::Result<bool> {
    let exists: bool = conn
        .query_row("SELECT 1 FROM channels WHERE id = ?1", [record.id], |_| {
            Ok(true)
        })
        .unwrap_or(false);
    if exists {
        conn.execute(
            "UPDATE channels SET
                access_hash = ?1, title = ?2, username = ?3, photo_id = ?4,
                date = ?5, participants_count = ?6, broadcast = ?7, megagroup = ?8,
                verified = ?9, restricted = ?10, scam = ?11, fake = ?12,
                subscribed = 1, updated_at = ?13
             WHERE id = ?14",
            params![
                record.access_hash,
                record.title,
                record.username,
                record.photo_id,
                record.date,
                record.participants_count,
                record.broadcast,
                record.megagroup,
                record.verified,
                record.restricted,
                record.scam,
                record.fake,
                ts,
                record.id,
            ],
        )?;
    } else {
        conn.execute(
            "INSERT INTO channels (
                id, access_hash, title, username, photo_id, date, participants_count,
                broadcast, megagroup, verified, restricted, scam, fake,
                subscribed, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, ?14, ?15)",
            params![
                record.id,
                record.access_hash,
                record.title,
                record.username,
                record.photo_id,
                record.date,
                record.participants_count,
                record.broadcast,
                record.megagroup,
                record.verified,
                record.restricted,
                record.scam,
                record.fake,
                ts,
                ts,
            ],
        )?;
    }
    Ok(!exists)
}

/// Result of one discovery merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unsubscribed: usize,
}

impl Store {
    /// Insert or refresh a discovered channel. Returns true when inserted.
    /// Discovery always re-marks the channel subscribed.
    pub fn upsert_channel(&self, record: &ChannelRecord, ts: i64) -> rusqlite::Result<bool> {
        let conn = self.conn();
        upsert_channel_conn(&conn, record, ts)
    }

    /// Merge one discovery pass in a single transaction: upsert everything
    /// seen, unsubscribe (but retain) everything that disappeared.
    pub fn sync_discovered_channels(
        &self,
        records: &[ChannelRecord],
        ts: i64,
    ) -> rusqlite::Result<DiscoveryOutcome> {
        let previously_subscribed = self.subscribed_channel_ids();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut outcome = DiscoveryOutcome::default();
        let mut discovered: HashSet<i64> = HashSet::new();
        for record in records {
            discovered.insert(record.id);
            if upsert_channel_conn(&tx, record, ts)? {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }
        for id in previously_subscribed.difference(&discovered) {
            outcome.unsubscribed += tx.execute(
                "UPDATE channels SET subscribed = 0, updated_at = ?1
                 WHERE id = ?2 AND subscribed = 1",
                params![ts, id],
            )?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Channels absent from the latest discovery are retained but
    /// unsubscribed.
    pub fn mark_unsubscribed(&self, ids: &HashSet<i64>, ts: i64) -> rusqlite::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn();
        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "UPDATE channels SET subscribed = 0, updated_at = ?1
             WHERE id IN ({}) AND subscribed = 1",
            placeholders.join(",")
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&ts];
        let id_vec: Vec<i64> = ids.iter().copied().collect();
        for id in &id_vec {
            values.push(id);
        }
        conn.execute(&sql, values.as_slice())
    }

    pub fn subscribed_channel_ids(&self) -> HashSet<i64> {
        let conn = self.conn();
        let Ok(mut stmt) = conn.prepare("SELECT id FROM channels WHERE subscribed = 1") else {
            return HashSet::new();
        };
        stmt.query_map([], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn get_channel(&self, channel_id: i64) -> Option<Channel> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
            [channel_id],
            channel_from_row,
        )
        .ok()
    }

    fn channels_where(&self, predicate: &str) -> Vec<Channel> {
        let conn = self.conn();
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE {predicate}");
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([], channel_from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn subscribed_channels(&self) -> Vec<Channel> {
        self.channels_where("subscribed = 1")
    }

    pub fn active_channels(&self) -> Vec<Channel> {
        self.channels_where("subscribed = 1 AND active = 1")
    }

    pub fn download_all_channels(&self) -> Vec<Channel> {
        self.channels_where("subscribed = 1 AND download_all = 1")
    }

    /// Active channels whose group participates in deduplication.
    pub fn dedup_channels(&self) -> Vec<Channel> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM channels c JOIN groups g ON c.group_id = g.id
             WHERE g.dedup = 1 AND c.subscribed = 1 AND c.active = 1",
            CHANNEL_COLUMNS
                .split(", ")
                .map(|c| format!("c.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([], channel_from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn channels_by_group(&self, group_id: i64) -> Vec<Channel> {
        let conn = self.conn();
        let sql =
            format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE group_id = ?1 AND subscribed = 1");
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([group_id], channel_from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn channels_with_groups(&self) -> Vec<Channel> {
        let conn = self.conn();
        let cols = CHANNEL_COLUMNS
            .split(", ")
            .map(|c| format!("c.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {cols}, g.name FROM channels c
             LEFT JOIN groups g ON c.group_id = g.id
             WHERE c.subscribed = 1
             ORDER BY g.name, c.title"
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([], |row| {
            let mut channel = channel_from_row(row)?;
            channel.group_name = row.get(25)?;
            Ok(channel)
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn channel_titles(&self) -> std::collections::HashMap<i64, String> {
        let conn = self.conn();
        let Ok(mut stmt) = conn.prepare("SELECT id, title FROM channels") else {
            return Default::default();
        };
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn update_channel_active(&self, channel_id: i64, active: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET active = ?1 WHERE id = ?2",
            params![active, channel_id],
        )?;
        Ok(())
    }

    pub fn update_channel_last_active(&self, channel_id: i64, ts: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET last_active = ?1 WHERE id = ?2",
            params![ts, channel_id],
        )?;
        Ok(())
    }

    pub fn update_channel_group(
        &self,
        channel_id: i64,
        group_id: Option<i64>,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET group_id = ?1 WHERE id = ?2",
            params![group_id, channel_id],
        )?;
        Ok(())
    }

    pub fn update_channel_download_all(
        &self,
        channel_id: i64,
        download_all: i64,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET download_all = ?1 WHERE id = ?2",
            params![download_all, channel_id],
        )?;
        Ok(())
    }

    pub fn update_channel_backup_path(
        &self,
        channel_id: i64,
        backup_path: Option<&str>,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET backup_path = ?1 WHERE id = ?2",
            params![backup_path, channel_id],
        )?;
        Ok(())
    }

    pub fn update_channel_media_kinds(
        &self,
        channel_id: i64,
        photos: i64,
        videos: i64,
        documents: i64,
        audio: i64,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE channels SET download_photos = ?1, download_videos = ?2,
                 download_documents = ?3, download_audio = ?4 WHERE id = ?5",
            params![photos, videos, documents, audio, channel_id],
        )?;
        Ok(())
    }

    // --- Groups ---

    pub fn all_groups(&self) -> Vec<Group> {
        let conn = self.conn();
        let Ok(mut stmt) = conn.prepare("SELECT id, name, dedup FROM groups ORDER BY name") else {
            return Vec::new();
        };
        stmt.query_map([], |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
                dedup: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn create_group(&self, name: &str) -> rusqlite::Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT INTO groups (name) VALUES (?1)", [name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn rename_group(&self, group_id: i64, name: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE groups SET name = ?1 WHERE id = ?2",
            params![name, group_id],
        )?;
        Ok(())
    }

    pub fn set_group_dedup(&self, group_id: i64, dedup: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE groups SET dedup = ?1 WHERE id = ?2",
            params![dedup, group_id],
        )?;
        Ok(())
    }

    /// Delete a group and unassign its channels.
    pub fn delete_group(&self, group_id: i64) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE channels SET group_id = NULL WHERE group_id = ?1",
            [group_id],
        )?;
        conn.execute("DELETE FROM groups WHERE id = ?1", [group_id])?;
        Ok(())
    }

    // --- Credentials ---

    pub fn all_creds(&self) -> rusqlite::Result<Vec<Credential>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, api_id, api_hash, phone_number, \"primary\" FROM tg_creds")?;
        let rows = stmt.query_map([], |row| {
            Ok(Credential {
                id: row.get(0)?,
                api_id: row.get(1)?,
                api_hash: row.get(2)?,
                phone_number: row.get(3)?,
                primary: row.get::<_, i64>(4)? != 0,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn add_cred(
        &self,
        api_id: i64,
        api_hash: &str,
        phone_number: &str,
        primary: bool,
    ) -> rusqlite::Result<i64> {
        let conn = self.conn();
        if primary {
            conn.execute("UPDATE tg_creds SET \"primary\" = 0 WHERE \"primary\" = 1", [])?;
        }
        conn.execute(
            "INSERT INTO tg_creds (api_id, api_hash, phone_number, \"primary\")
             VALUES (?1, ?2, ?3, ?4)",
            params![api_id, api_hash, phone_number, primary as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Exactly one primary at any time.
    pub fn set_primary_cred(&self, cred_id: i64) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute("UPDATE tg_creds SET \"primary\" = 0 WHERE \"primary\" = 1", [])?;
        conn.execute(
            "UPDATE tg_creds SET \"primary\" = 1 WHERE id = ?1",
            [cred_id],
        )?;
        Ok(())
    }

    pub fn delete_cred(&self, cred_id: i64) -> rusqlite::Result<()> {
        self.conn()
            .execute("DELETE FROM tg_creds WHERE id = ?1", [cred_id])?;
        Ok(())
    }

    // --- Tag exclusions ---

    pub fn all_tag_exclusions(&self) -> Vec<TagExclusion> {
        let conn = self.conn();
        let Ok(mut stmt) =
            conn.prepare("SELECT id, tags, created_at FROM tag_exclusions ORDER BY id")
        else {
            return Vec::new();
        };
        stmt.query_map([], |row| {
            Ok(TagExclusion {
                id: row.get(0)?,
                tags: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    /// Stores the canonical form; an equivalent set is a UNIQUE conflict.
    pub fn add_tag_exclusion(&self, raw_tags: &str) -> rusqlite::Result<i64> {
        let canonical = crate::dedup::normalize_keywords(raw_tags);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tag_exclusions (tags, created_at) VALUES (?1, ?2)",
            params![canonical, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_tag_exclusion(&self, id: i64) -> rusqlite::Result<()> {
        self.conn()
            .execute("DELETE FROM tag_exclusions WHERE id = ?1", [id])?;
        Ok(())
    }
}

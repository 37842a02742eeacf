//! Trigram FTS index over message text. The virtual table stores the text
//! itself (UNINDEXED columns rule out contentless mode), so deletes are
//! plain DELETEs.

use rusqlite::params;

use crate::models::SearchHit;
use crate::store::{Store, message_table};

/// Trigram matching needs at least three characters of text.
pub const MIN_INDEXED_LENGTH: usize = 3;

impl Store {
    /// Messages long enough to index, ascending by id.
    pub fn messages_for_indexing(&self, channel_id: i64) -> Vec<(i64, String)> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id, message FROM {}
             WHERE message IS NOT NULL AND length(message) >= ?1
             ORDER BY id",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map([MIN_INDEXED_LENGTH as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn indexed_message_ids(&self, channel_id: i64) -> std::collections::HashSet<i64> {
        let conn = self.conn();
        let Ok(mut stmt) =
            conn.prepare("SELECT message_id FROM messages_fts WHERE channel_id = ?1")
        else {
            return Default::default();
        };
        stmt.query_map([channel_id], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn index_messages_batch(
        &self,
        channel_id: i64,
        messages: &[(i64, String)],
    ) -> rusqlite::Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut indexed = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages_fts (channel_id, message_id, message) VALUES (?1, ?2, ?3)",
            )?;
            for (id, message) in messages {
                if stmt.execute(params![channel_id, id, message]).is_ok() {
                    indexed += 1;
                }
            }
        }
        tx.commit()?;
        Ok(indexed)
    }

    pub fn delete_from_search_index(&self, channel_id: i64, message_ids: &[i64]) -> usize {
        if message_ids.is_empty() {
            return 0;
        }
        let conn = self.conn();
        let mut deleted = 0;
        for chunk in message_ids.chunks(500) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "DELETE FROM messages_fts WHERE channel_id = ?1 AND message_id IN ({})",
                placeholders.join(",")
            );
            let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&channel_id];
            for id in chunk {
                values.push(id);
            }
            if let Ok(n) = conn.execute(&sql, values.as_slice()) {
                deleted += n;
            }
        }
        deleted
    }

    /// Substring search via the trigram tokenizer. The query is quoted
    /// whole, so FTS operators in user input are inert.
    pub fn search_messages(
        &self,
        query: &str,
        limit: usize,
        allowed_channels: Option<&std::collections::HashSet<i64>>,
    ) -> Vec<SearchHit> {
        let query = query.trim();
        if query.len() < MIN_INDEXED_LENGTH {
            return Vec::new();
        }
        let titles = self.channel_titles();
        let conn = self.conn();
        let fts_query = format!("\"{}\"", query.replace('"', "\"\""));

        let mut sql = String::from(
            "SELECT channel_id, message_id FROM messages_fts WHERE messages_fts MATCH ?1",
        );
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(fts_query)];
        let mut idx = 2;
        if let Some(allowed) = allowed_channels {
            if allowed.is_empty() {
                return Vec::new();
            }
            let placeholders: Vec<String> = allowed
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", idx + i))
                .collect();
            sql.push_str(&format!(" AND channel_id IN ({})", placeholders.join(",")));
            for id in allowed {
                values.push(Box::new(*id));
            }
            idx += allowed.len();
        }
        sql.push_str(&format!(" LIMIT ?{idx}"));
        values.push(Box::new(limit as i64));

        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        stmt.query_map(params_refs.as_slice(), |row| {
            let channel_id: i64 = row.get(0)?;
            Ok(SearchHit {
                channel_id,
                message_id: row.get(1)?,
                channel_title: titles
                    .get(&channel_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    /// Merge the FTS b-trees.
    pub fn optimize_search_index(&self) -> rusqlite::Result<()> {
        self.conn()
            .execute("INSERT INTO messages_fts(messages_fts) VALUES('optimize')", [])?;
        Ok(())
    }

    /// Drop and recreate the virtual table; callers re-index afterwards.
    pub fn clear_search_index(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            "DROP TABLE IF EXISTS messages_fts;
             CREATE VIRTUAL TABLE messages_fts USING fts5(
                channel_id UNINDEXED,
                message_id UNINDEXED,
                message,
                tokenize=\"trigram\"
             );",
        )?;
        Ok(())
    }

    pub fn search_index_size(&self) -> i64 {
        self.conn()
            .query_row("SELECT COUNT(*) FROM messages_fts", [], |row| row.get(0))
            .unwrap_or(0)
    }
}

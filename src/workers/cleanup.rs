//! Two-phase retention for channels not keeping full history: media files
//! go 7 days after reading, rows go 30 days after reading. Bookmarked and
//! anchored rows are never touched and the latest row of a channel always
//! survives.

use std::path::Path;

use rusqlite::params;
use tracing::{error, info, warn};

use crate::store::{Store, message_table};

/// Media files are deleted this long after reading.
pub const MEDIA_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;
/// Message rows are deleted this long after reading.
pub const MESSAGE_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Default)]
pub struct ChannelCleanupDetail {
    pub channel_id: i64,
    pub media_cleared: usize,
    pub messages_deleted: usize,
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub channels_checked: usize,
    pub messages_deleted: usize,
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub details: Vec<ChannelCleanupDetail>,
}

/// One full retention sweep. Returns structured results for inspection.
pub fn run_cleanup(store: &Store, media_dir: &Path) -> CleanupResult {
    run_cleanup_at(store, media_dir, crate::store::now())
}

/// Sweep with an explicit clock, so cutoffs are testable.
pub fn run_cleanup_at(store: &Store, media_dir: &Path, now: i64) -> CleanupResult {
    let mut result = CleanupResult::default();
    let media_cutoff = now - MEDIA_MAX_AGE_SECS;
    let message_cutoff = now - MESSAGE_MAX_AGE_SECS;

    let channels: Vec<(i64, String)> = store
        .subscribed_channels()
        .into_iter()
        .filter(|c| c.download_all == 0 && c.active == 1)
        .map(|c| (c.id, c.title))
        .collect();
    if channels.is_empty() {
        info!("no channels to clean up");
        return result;
    }
    info!("found {} channels to clean up", channels.len());
    result.channels_checked = channels.len();

    for (channel_id, title) in channels {
        match cleanup_channel(store, media_dir, channel_id, media_cutoff, message_cutoff) {
            Ok(detail) => {
                if detail.messages_deleted > 0 || detail.files_deleted > 0 {
                    info!(
                        "  {title}: deleted {} messages, {} files ({:.1} MB)",
                        detail.messages_deleted,
                        detail.files_deleted,
                        detail.bytes_freed as f64 / 1024.0 / 1024.0
                    );
                }
                result.messages_deleted += detail.messages_deleted;
                result.files_deleted += detail.files_deleted;
                result.bytes_freed += detail.bytes_freed;
                result.details.push(detail);
            }
            Err(e) => {
                error!("  error cleaning up {title}: {e}");
                continue;
            }
        }
    }

    remove_empty_channel_dirs(media_dir);

    info!(
        "cleanup completed: {} messages, {} files ({:.1} MB freed)",
        result.messages_deleted,
        result.files_deleted,
        result.bytes_freed as f64 / 1024.0 / 1024.0
    );
    result
}

fn unlink_counting(media_dir: &Path, rel: &str, detail: &mut ChannelCleanupDetail) {
    let full = media_dir.join(rel);
    if !full.exists() {
        return;
    }
    let size = std::fs::metadata(&full).map(|m| m.len()).unwrap_or(0);
    match std::fs::remove_file(&full) {
        Ok(()) => {
            detail.files_deleted += 1;
            detail.bytes_freed += size;
        }
        Err(e) => warn!("  failed to delete {}: {e}", full.display()),
    }
}

fn cleanup_channel(
    store: &Store,
    media_dir: &Path,
    channel_id: i64,
    media_cutoff: i64,
    message_cutoff: i64,
) -> rusqlite::Result<ChannelCleanupDetail> {
    let mut detail = ChannelCleanupDetail {
        channel_id,
        ..Default::default()
    };
    if !store.channel_table_exists(channel_id)? {
        return Ok(detail);
    }
    let table = message_table(channel_id);

    // Phase A: media files, 7 days after reading.
    let media_rows: Vec<(i64, Option<String>, Option<String>)> = {
        let conn = store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, media_path, video_thumbnail_path FROM {table}
             WHERE read = 1
               AND media_path IS NOT NULL
               AND COALESCE(read_at, created_at) < ?1
               AND (bookmarked = 0 OR bookmarked IS NULL)
               AND (anchored = 0 OR anchored IS NULL)"
        ))?;
        let rows = stmt.query_map([media_cutoff], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.filter_map(|r| r.ok()).collect()
    };

    for (_, media_path, thumb_path) in &media_rows {
        if let Some(rel) = media_path {
            unlink_counting(media_dir, rel, &mut detail);
        }
        if let Some(rel) = thumb_path {
            unlink_counting(media_dir, rel, &mut detail);
        }
    }
    if !media_rows.is_empty() {
        let conn = store.conn();
        for chunk in media_rows.chunks(500) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("?{}", i + 1)).collect();
            let sql = format!(
                "UPDATE {table} SET media_path = NULL, video_thumbnail_path = NULL
                 WHERE id IN ({})",
                placeholders.join(",")
            );
            let ids: Vec<i64> = chunk.iter().map(|r| r.0).collect();
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            detail.media_cleared += conn.execute(&sql, refs.as_slice())?;
        }
    }

    // Phase B: rows, 30 days after reading. The latest row always stays.
    let max_id: Option<i64> = {
        let conn = store.conn();
        conn.query_row(&format!("SELECT MAX(id) FROM {table}"), [], |row| {
            row.get(0)
        })?
    };
    let Some(max_id) = max_id else {
        return Ok(detail);
    };

    let old_rows: Vec<(i64, Option<String>)> = {
        let conn = store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, media_path FROM {table}
             WHERE read = 1
               AND COALESCE(read_at, created_at) < ?1
               AND id != ?2
               AND (bookmarked = 0 OR bookmarked IS NULL)
               AND (anchored = 0 OR anchored IS NULL)"
        ))?;
        let rows = stmt.query_map(params![message_cutoff, max_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.filter_map(|r| r.ok()).collect()
    };
    if old_rows.is_empty() {
        return Ok(detail);
    }

    // Any media that survived phase A goes with the row.
    for (_, media_path) in &old_rows {
        if let Some(rel) = media_path {
            unlink_counting(media_dir, rel, &mut detail);
        }
    }

    let ids: Vec<i64> = old_rows.iter().map(|r| r.0).collect();
    store.delete_from_search_index(channel_id, &ids);
    {
        let conn = store.conn();
        detail.messages_deleted += conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE read = 1
                   AND COALESCE(read_at, created_at) < ?1
                   AND id != ?2
                   AND (bookmarked = 0 OR bookmarked IS NULL)
                   AND (anchored = 0 OR anchored IS NULL)"
            ),
            params![message_cutoff, max_id],
        )?;
    }
    Ok(detail)
}

/// Channels whose media directory emptied out lose the directory too.
fn remove_empty_channel_dirs(media_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(media_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let empty = std::fs::read_dir(&path)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if empty && std::fs::remove_dir(&path).is_ok() {
            info!("  removed empty directory: {}", path.display());
        }
    }
}

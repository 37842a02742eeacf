//! Query layer consumed by the reader: album regrouping, tag-exclusion
//! filtering, duplicate-variant expansion, feeds and counts.

use std::collections::{HashMap, HashSet};

use crate::models::{Channel, FeedMessage, MediaItem, StoredMessage, TagExclusion};
use crate::store::{Store, message_table};

use super::messages::{MESSAGE_COLUMNS, message_from_row};

/// What to keep when a fetched page exceeds `limit` after regrouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPolicy {
    KeepOldest,
    KeepNewest,
}

/// Per-channel fetches over-read by this factor so that regrouping still
/// fills the page after albums collapse.
const FETCH_FACTOR: usize = 3;

fn sort_key(m: &FeedMessage) -> (i64, i64) {
    (m.base.date.unwrap_or(0), m.base.id)
}

/// Consolidate one album's members (any order) into a single message.
/// The base is the lowest id; text comes from the first member that has
/// any; media items are drawn from every member in id order.
pub fn consolidate_album(mut members: Vec<StoredMessage>) -> FeedMessage {
    members.sort_by_key(|m| m.id);
    let mut base = members[0].clone();

    for m in &members {
        if m.message.as_deref().is_some_and(|t| !t.is_empty()) {
            base.message = m.message.clone();
            base.entities = m.entities.clone();
            break;
        }
    }

    let media_items: Vec<MediaItem> = members
        .iter()
        .filter(|m| m.media_path.is_some() || m.media_type.is_some())
        .map(|m| MediaItem {
            path: m.media_path.clone(),
            media_type: m.media_type,
            message_id: m.id,
            video_thumbnail_path: m.video_thumbnail_path.clone(),
        })
        .collect();

    let is_album = base.grouped_id.is_some();
    let album_message_ids = members.iter().map(|m| m.id).collect();
    FeedMessage {
        base,
        is_album,
        media_items,
        album_message_ids,
        variants: Vec::new(),
    }
}

/// Partition rows into albums by `(channel_id, grouped_id)` and consolidate
/// each; rows without a `grouped_id` become trivial albums. No ordering or
/// trimming is applied.
pub fn consolidate_rows(rows: Vec<StoredMessage>) -> Vec<FeedMessage> {
    let mut albums: HashMap<(i64, i64), Vec<StoredMessage>> = HashMap::new();
    let mut album_order: Vec<(i64, i64)> = Vec::new();
    let mut out = Vec::new();

    for row in rows {
        match row.grouped_id {
            Some(gid) => {
                let key = (row.channel_id, gid);
                let entry = albums.entry(key).or_default();
                if entry.is_empty() {
                    album_order.push(key);
                }
                entry.push(row);
            }
            None => out.push(consolidate_album(vec![row])),
        }
    }
    for key in album_order {
        if let Some(members) = albums.remove(&key) {
            out.push(consolidate_album(members));
        }
    }
    out
}

/// Album-regroup a fetched page, trim to `limit` per `policy`, and order
/// the result (`newest_first` = false yields ascending dates).
pub fn regroup_albums(
    rows: Vec<StoredMessage>,
    limit: usize,
    policy: TrimPolicy,
    newest_first: bool,
) -> Vec<FeedMessage> {
    let mut combined = consolidate_rows(rows);
    match policy {
        TrimPolicy::KeepOldest => combined.sort_by_key(sort_key),
        TrimPolicy::KeepNewest => combined.sort_by_key(|m| std::cmp::Reverse(sort_key(m))),
    }
    combined.truncate(limit);
    if newest_first {
        combined.sort_by_key(|m| std::cmp::Reverse(sort_key(m)));
    } else {
        combined.sort_by_key(sort_key);
    }
    combined
}

/// True when the summary's token set covers every token of some exclusion
/// group.
pub fn summary_matches_exclusions(summary: &str, exclusions: &[TagExclusion]) -> bool {
    if exclusions.is_empty() {
        return false;
    }
    let tokens: HashSet<String> = summary
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    exclusions.iter().any(|exclusion| {
        let wanted = exclusion.token_set();
        !wanted.is_empty() && wanted.iter().all(|t| tokens.contains(t))
    })
}

/// Drop messages whose summary matches an exclusion group.
pub fn filter_tag_exclusions(
    messages: Vec<FeedMessage>,
    exclusions: &[TagExclusion],
) -> Vec<FeedMessage> {
    if exclusions.is_empty() {
        return messages;
    }
    messages
        .into_iter()
        .filter(|m| {
            m.base
                .ai_summary
                .as_deref()
                .map(|s| !summary_matches_exclusions(s, exclusions))
                .unwrap_or(true)
        })
        .collect()
}

type DupMap = HashMap<(i64, i64), Vec<StoredMessage>>;

impl Store {
    fn fetch_rows(
        &self,
        channel_id: i64,
        channel_title: Option<&str>,
        clause: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Vec<StoredMessage> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} {clause}",
            message_table(channel_id)
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return Vec::new();
        };
        stmt.query_map(params, |row| message_from_row(channel_id, channel_title, row))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    fn group_channels_filtered(&self, group_id: i64, channel_id: Option<i64>) -> Vec<Channel> {
        let mut channels = self.channels_by_group(group_id);
        if let Some(filter) = channel_id {
            channels.retain(|c| c.id == filter);
        }
        channels
    }

    /// Unread non-hidden messages of a group, oldest first, album-regrouped
    /// (keep-oldest), exclusion-filtered, variant-expanded.
    pub fn unread_feed(
        &self,
        group_id: i64,
        limit: usize,
        channel_id: Option<i64>,
    ) -> Vec<FeedMessage> {
        let fetch = (limit * FETCH_FACTOR) as i64;
        let mut rows = Vec::new();
        for channel in self.group_channels_filtered(group_id, channel_id) {
            rows.extend(self.fetch_rows(
                channel.id,
                Some(channel.title.as_str()),
                "WHERE (read = 0 OR read IS NULL) AND (hidden IS NULL OR hidden != 1)
                 ORDER BY date ASC LIMIT ?1",
                &[&fetch as &dyn rusqlite::types::ToSql],
            ));
        }
        let regrouped = regroup_albums(rows, limit, TrimPolicy::KeepOldest, false);
        let filtered = filter_tag_exclusions(regrouped, &self.all_tag_exclusions());
        self.expand_variants(filtered, Some(group_id))
    }

    /// Messages older than `before_date`, newest-trimmed but displayed
    /// ascending.
    pub fn earlier_feed(
        &self,
        group_id: i64,
        before_date: i64,
        limit: usize,
        channel_id: Option<i64>,
    ) -> Vec<FeedMessage> {
        let fetch = (limit * FETCH_FACTOR) as i64;
        let mut rows = Vec::new();
        for channel in self.group_channels_filtered(group_id, channel_id) {
            rows.extend(self.fetch_rows(
                channel.id,
                Some(channel.title.as_str()),
                "WHERE date < ?1 AND (hidden IS NULL OR hidden != 1)
                 ORDER BY date DESC LIMIT ?2",
                &[&before_date as &dyn rusqlite::types::ToSql, &fetch],
            ));
        }
        let regrouped = regroup_albums(rows, limit, TrimPolicy::KeepNewest, false);
        self.expand_variants(regrouped, Some(group_id))
    }

    /// Oldest stored page of a single channel, ascending.
    pub fn channel_feed_oldest(&self, channel_id: i64, limit: usize) -> Vec<FeedMessage> {
        let fetch = (limit * FETCH_FACTOR) as i64;
        let title = self.get_channel(channel_id).map(|c| c.title);
        let rows = self.fetch_rows(
            channel_id,
            title.as_deref(),
            "WHERE (hidden IS NULL OR hidden != 1) ORDER BY date ASC LIMIT ?1",
            &[&fetch as &dyn rusqlite::types::ToSql],
        );
        regroup_albums(rows, limit, TrimPolicy::KeepOldest, false)
    }

    /// Messages of a single channel later than `after_date`, ascending.
    pub fn channel_feed_after(
        &self,
        channel_id: i64,
        after_date: i64,
        limit: usize,
    ) -> Vec<FeedMessage> {
        let fetch = (limit * FETCH_FACTOR) as i64;
        let title = self.get_channel(channel_id).map(|c| c.title);
        let rows = self.fetch_rows(
            channel_id,
            title.as_deref(),
            "WHERE date > ?1 AND (hidden IS NULL OR hidden != 1)
             ORDER BY date ASC LIMIT ?2",
            &[&after_date as &dyn rusqlite::types::ToSql, &fetch],
        );
        regroup_albums(rows, limit, TrimPolicy::KeepOldest, false)
    }

    /// Bookmarked messages across every channel table, newest first.
    pub fn bookmarks_feed(&self, limit: usize) -> Vec<FeedMessage> {
        let fetch = (limit * FETCH_FACTOR) as i64;
        let titles = self.channel_titles();
        let mut rows = Vec::new();
        for channel_id in self.all_message_table_channel_ids() {
            let title = titles.get(&channel_id).map(String::as_str);
            rows.extend(self.fetch_rows(
                channel_id,
                title,
                "WHERE bookmarked = 1 AND (hidden IS NULL OR hidden != 1)
                 ORDER BY date DESC LIMIT ?1",
                &[&fetch as &dyn rusqlite::types::ToSql],
            ));
        }
        let regrouped = regroup_albums(rows, limit, TrimPolicy::KeepNewest, true);
        self.expand_variants(regrouped, None)
    }

    /// Histogram over summary tokens of unread non-hidden messages.
    pub fn group_tag_counts(&self, group_id: i64) -> Vec<(String, i64)> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for channel in self.channels_by_group(group_id) {
            let conn = self.conn();
            let sql = format!(
                "SELECT ai_summary FROM {}
                 WHERE (read = 0 OR read IS NULL)
                   AND (hidden IS NULL OR hidden != 1)
                   AND ai_summary IS NOT NULL",
                message_table(channel.id)
            );
            let Ok(mut stmt) = conn.prepare(&sql) else {
                continue;
            };
            let summaries: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default();
            for summary in summaries {
                for token in summary.split(',') {
                    let token = token.trim().to_lowercase();
                    if !token.is_empty() {
                        *counts.entry(token).or_insert(0) += 1;
                    }
                }
            }
        }
        let mut out: Vec<(String, i64)> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Runs the feed pipeline so the count matches the displayed length.
    pub fn unread_count_for_group(&self, group_id: i64) -> usize {
        self.unread_feed(group_id, 1000, None).len()
    }

    pub fn unread_counts(&self) -> Vec<(i64, String, usize)> {
        self.all_groups()
            .into_iter()
            .map(|g| {
                let count = self.unread_count_for_group(g.id);
                (g.id, g.name, count)
            })
            .collect()
    }

    fn channel_group_map(&self) -> HashMap<i64, Option<i64>> {
        let conn = self.conn();
        let Ok(mut stmt) = conn.prepare("SELECT id, group_id FROM channels") else {
            return Default::default();
        };
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// `(orig_channel, orig_message) -> duplicates` over every channel table
    /// in the group; one query per table replaces per-message lookups.
    fn duplicates_map_for_group(
        &self,
        group_id: i64,
        titles: &HashMap<i64, String>,
    ) -> DupMap {
        let mut map: DupMap = HashMap::new();
        for channel in self.channels_by_group(group_id) {
            let title = titles.get(&channel.id).map(String::as_str);
            let rows = self.fetch_rows(
                channel.id,
                title,
                "WHERE duplicate_of_channel IS NOT NULL AND duplicate_of_message IS NOT NULL",
                &[],
            );
            for row in rows {
                let key = (
                    row.duplicate_of_channel.unwrap_or_default(),
                    row.duplicate_of_message.unwrap_or_default(),
                );
                map.entry(key).or_default().push(row);
            }
        }
        map
    }

    /// One message consolidated with its album siblings.
    fn consolidated_message(
        &self,
        channel_id: i64,
        message_id: i64,
        titles: &HashMap<i64, String>,
    ) -> Option<FeedMessage> {
        let mut msg = self.get_message(channel_id, message_id)?;
        msg.channel_title = titles.get(&channel_id).cloned();
        let members = match msg.grouped_id {
            Some(gid) => {
                let mut members = self.album_messages(channel_id, gid);
                for m in &mut members {
                    m.channel_title = titles.get(&channel_id).cloned();
                }
                if members.is_empty() { vec![msg] } else { members }
            }
            None => vec![msg],
        };
        Some(consolidate_album(members))
    }

    /// Attach duplicate clusters: a message
    /// pointing at a same-group original gets `[original] + [duplicates]`;
    /// an original with duplicates becomes its own first variant. A final
    /// sequential pass keeps each cluster's first appearance only.
    pub fn expand_variants(
        &self,
        mut messages: Vec<FeedMessage>,
        group_id: Option<i64>,
    ) -> Vec<FeedMessage> {
        if messages.is_empty() {
            return messages;
        }
        let titles = self.channel_titles();
        let channel_groups = self.channel_group_map();
        let mut dup_maps: HashMap<i64, DupMap> = HashMap::new();

        for m in &mut messages {
            let my_group = group_id
                .or_else(|| channel_groups.get(&m.base.channel_id).copied().flatten());
            let Some(gid) = my_group else { continue };
            if !dup_maps.contains_key(&gid) {
                let map = self.duplicates_map_for_group(gid, &titles);
                dup_maps.insert(gid, map);
            }
            let dup_map = &dup_maps[&gid];

            let collect_dups = |keys: &[(i64, i64)]| -> Vec<StoredMessage> {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for key in keys {
                    if let Some(list) = dup_map.get(key) {
                        for d in list {
                            if seen.insert(d.key()) {
                                out.push(d.clone());
                            }
                        }
                    }
                }
                out
            };

            if let (Some(dc), Some(dm)) = (m.base.duplicate_of_channel, m.base.duplicate_of_message)
            {
                let orig_group = channel_groups.get(&dc).copied().flatten();
                if orig_group == Some(gid) {
                    if let Some(original) = self.consolidated_message(dc, dm, &titles) {
                        let dups = collect_dups(&original.member_keys());
                        let mut variants = vec![original];
                        variants.extend(consolidate_rows(dups));
                        m.variants = variants;
                    }
                    continue;
                }
            }

            let dups = collect_dups(&m.member_keys());
            if !dups.is_empty() {
                let mut own = m.clone();
                own.variants = Vec::new();
                let mut variants = vec![own];
                variants.extend(consolidate_rows(dups));
                m.variants = variants;
            }
        }

        // Keep only the first presenter of each cluster.
        let mut claimed: HashSet<(i64, i64)> = HashSet::new();
        let mut out = Vec::new();
        for m in messages {
            let own_keys = m.member_keys();
            if own_keys.iter().any(|k| claimed.contains(k)) {
                continue;
            }
            for v in &m.variants {
                claimed.extend(v.member_keys());
            }
            out.push(m);
        }
        out
    }
}

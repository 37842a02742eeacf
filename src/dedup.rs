//! Two-stage deduplicator: a media-content pass (cheap, local hashing) then
//! an AI text pass, both writing into group-scoped first-writer registries.
//!
//! The media pass runs first so messages it flags as duplicates never spend
//! an AI call in the text pass.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::StoredMessage;
use crate::store::Store;
use crate::store::query::summary_matches_exclusions;

pub mod providers;

pub use providers::{AiProvider, provider_from_env};

/// Canonical keyword form: trimmed, lowercased, deduplicated, sorted,
/// comma-joined. Hash input and tag-exclusion storage share this.
pub fn normalize_keywords(keywords: &str) -> String {
    let mut tokens: Vec<String> = keywords
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens.join(",")
}

/// SHA-256 over the canonical keyword form.
pub fn compute_content_hash(summary: &str) -> String {
    let normalized = normalize_keywords(summary);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Streaming SHA-256 of a file.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Album hash: per-file digests sorted lexicographically, concatenated,
/// hashed again.
pub fn combine_media_hashes(mut file_hashes: Vec<String>) -> String {
    file_hashes.sort();
    hex::encode(Sha256::digest(file_hashes.concat().as_bytes()))
}

#[derive(Debug, Default)]
pub struct PassTotals {
    pub processed: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Media-hash pass over every channel whose group dedups.
pub fn run_media_pass(store: &Store, media_dir: &Path, config: &Config) -> PassTotals {
    let mut totals = PassTotals::default();
    let channels = store.dedup_channels();
    if channels.is_empty() {
        info!("no channels with dedup enabled");
        return totals;
    }

    // An album is processed at most once per run.
    let mut processed_albums: HashSet<(i64, i64)> = HashSet::new();

    for channel in channels {
        let Some(group_id) = channel.group_id else {
            continue;
        };

        let no_media = store.messages_without_media_for_skip(channel.id, 500);
        for id in &no_media {
            store.skip_media_hash(channel.id, *id).ok();
        }
        totals.skipped += no_media.len();

        let messages =
            store.messages_needing_media_hashes(channel.id, config.dedup_messages_per_run);
        if messages.is_empty() {
            continue;
        }
        info!(
            "processing {} media messages from: {}",
            messages.len(),
            channel.title
        );

        for msg in messages {
            let album: Vec<StoredMessage> = match msg.grouped_id {
                Some(gid) => {
                    if !processed_albums.insert((channel.id, gid)) {
                        continue;
                    }
                    let members = store.album_messages(channel.id, gid);
                    if members.is_empty() { vec![msg] } else { members }
                }
                None => vec![msg],
            };

            let album_ids: Vec<i64> = album.iter().map(|m| m.id).collect();
            let album_date = album.first().and_then(|m| m.date);
            let media_paths: Vec<&str> =
                album.iter().filter_map(|m| m.media_path.as_deref()).collect();

            if media_paths.is_empty() {
                for id in &album_ids {
                    store.skip_media_hash(channel.id, *id).ok();
                }
                totals.skipped += album_ids.len();
                continue;
            }

            let mut file_hashes = Vec::with_capacity(media_paths.len());
            let mut all_present = true;
            for rel in &media_paths {
                let full = media_dir.join(rel);
                match sha256_file(&full) {
                    Ok(digest) => file_hashes.push(digest),
                    Err(e) => {
                        // Not downloaded yet; stays pending for a later run.
                        warn!("cannot hash {}: {e}", full.display());
                        all_present = false;
                        break;
                    }
                }
            }
            if !all_present {
                continue;
            }

            // The album hash, plus per-member hashes when there is more
            // than one file. Registering the members lets a later repost
            // of any single file match the album.
            let media_hash = combine_media_hashes(file_hashes.clone());
            let base_id = album_ids[0];
            let mut candidates = vec![media_hash.clone()];
            if file_hashes.len() > 1 {
                candidates.extend(
                    file_hashes
                        .iter()
                        .map(|h| combine_media_hashes(vec![h.clone()])),
                );
            }

            let existing = candidates
                .iter()
                .find_map(|h| store.find_media_hash(h, group_id));
            match existing {
                Some((orig_channel, orig_message))
                    if (orig_channel, orig_message) != (channel.id, base_id) =>
                {
                    for id in &album_ids {
                        store
                            .mark_as_duplicate(channel.id, *id, orig_channel, orig_message)
                            .ok();
                        store.update_media_hash(channel.id, *id, &media_hash).ok();
                    }
                    totals.duplicates += 1;
                    info!(
                        "duplicate (media): msgs {album_ids:?} -> channel {orig_channel} msg {orig_message}"
                    );
                }
                _ => {
                    let mut failed = false;
                    for hash in &candidates {
                        if let Err(e) = store.register_media_hash(
                            hash,
                            group_id,
                            channel.id,
                            base_id,
                            album_date,
                        ) {
                            warn!("failed to register media hash: {e}");
                            failed = true;
                            break;
                        }
                    }
                    if failed {
                        totals.errors += 1;
                        continue;
                    }
                    for id in &album_ids {
                        store.update_media_hash(channel.id, *id, &media_hash).ok();
                    }
                }
            }
            totals.processed += 1;
        }
    }
    totals
}

/// AI text pass. Messages already flagged by the media pass are stamped as
/// skipped without a provider call.
pub async fn run_text_pass(
    store: &Store,
    provider: &dyn AiProvider,
    config: &Config,
) -> PassTotals {
    let mut totals = PassTotals::default();
    let channels = store.dedup_channels();
    let exclusions = store.all_tag_exclusions();
    if !exclusions.is_empty() {
        info!("loaded {} tag exclusion groups", exclusions.len());
    }
    if channels.is_empty() {
        info!("no channels with dedup enabled");
        return totals;
    }

    for channel in channels {
        let Some(group_id) = channel.group_id else {
            continue;
        };

        let short = store.short_messages_for_skip(
            channel.id,
            500,
            config.dedup_min_message_length,
        );
        if !short.is_empty() {
            for id in &short {
                store.skip_content_hash(channel.id, *id).ok();
            }
            totals.skipped += short.len();
            info!("{}: skipped {} short messages", channel.title, short.len());
        }

        let messages = store.messages_needing_hashes(
            channel.id,
            config.dedup_messages_per_run,
            config.dedup_min_message_length,
        );
        if messages.is_empty() {
            continue;
        }
        info!(
            "processing {} messages from: {}",
            messages.len(),
            channel.title
        );

        for msg in messages {
            // The media pass may have flagged it since the query ran.
            let current = store.get_message(channel.id, msg.id);
            if current
                .as_ref()
                .is_some_and(|m| m.duplicate_of_channel.is_some())
            {
                store.skip_content_hash(channel.id, msg.id).ok();
                totals.skipped += 1;
                continue;
            }

            let Some(text) = msg.message.as_deref() else {
                continue;
            };

            tokio::time::sleep(Duration::from_millis(config.dedup_api_delay_ms)).await;

            let Some(summary) = provider.generate_summary(text, 3).await else {
                warn!("failed to get summary for message {}", msg.id);
                totals.errors += 1;
                continue;
            };

            let tokens: Vec<&str> = summary
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.len() < 3 {
                info!(
                    "skipping message {}: too few tokens ({}): {}",
                    msg.id,
                    tokens.len(),
                    summary.trim()
                );
                store.skip_content_hash(channel.id, msg.id).ok();
                totals.skipped += 1;
                continue;
            }
            if summary.trim().eq_ignore_ascii_case("ad") {
                store.skip_content_hash(channel.id, msg.id).ok();
                totals.skipped += 1;
                continue;
            }

            let content_hash = compute_content_hash(&summary);

            // Excluded content is auto-read and never registered.
            if summary_matches_exclusions(&summary, &exclusions) {
                store.mark_messages_read(&[(channel.id, msg.id)]).ok();
                store
                    .update_content_hash(channel.id, msg.id, &content_hash, Some(&summary))
                    .ok();
                info!("auto-excluded (tag match): msg {}", msg.id);
                totals.skipped += 1;
                continue;
            }

            match store.register_content_hash(&content_hash, group_id, channel.id, msg.id, msg.date)
            {
                Ok(Some((orig_channel, orig_message))) => {
                    store
                        .mark_as_duplicate(channel.id, msg.id, orig_channel, orig_message)
                        .ok();
                    store
                        .update_content_hash(channel.id, msg.id, &content_hash, Some(&summary))
                        .ok();
                    totals.duplicates += 1;
                    info!(
                        "duplicate: msg {} -> channel {orig_channel} msg {orig_message}",
                        msg.id
                    );
                }
                Ok(None) => {
                    store
                        .update_content_hash(channel.id, msg.id, &content_hash, Some(&summary))
                        .ok();
                }
                Err(e) => {
                    warn!("failed to register content hash: {e}");
                    totals.errors += 1;
                    continue;
                }
            }
            totals.processed += 1;
        }
    }
    totals
}

/// Both passes: media first, text second.
pub async fn run(store: &Store, config: &Config) -> anyhow::Result<()> {
    let media = run_media_pass(store, &config.media_dir(), config);
    info!(
        "media hash pass done: processed={} duplicates={} skipped={}",
        media.processed, media.duplicates, media.skipped
    );

    let Some(provider) = provider_from_env(config) else {
        warn!("no AI provider configured - skipping text-based deduplication");
        return Ok(());
    };
    info!("using AI provider: {}", provider.name());
    let text = run_text_pass(store, provider.as_ref(), config).await;
    info!(
        "text hash pass done: processed={} duplicates={} skipped={} errors={}",
        text.processed, text.duplicates, text.skipped, text.errors
    );
    Ok(())
}

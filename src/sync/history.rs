//! Historical backfill for channels with `download_all`: walk descending
//! from the oldest stored id in batches, reusing indexed backup files for
//! large media instead of full downloads. Backfilled rows are inserted
//! already read.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::backup;
use crate::models::Channel;
use crate::store::messages::NewMessage;
use crate::upstream::MessageRecord;

use super::{StageContext, flood_wait_seconds};

pub async fn run(ctx: &StageContext) -> anyhow::Result<()> {
    info!("starting history sync...");

    {
        let mut client = ctx.pool.lock_control().await;
        let status = client.ping().await?;
        info!("connected to daemon (clients: {})", status.clients);
    }

    let channels = ctx.store.download_all_channels();
    if channels.is_empty() {
        info!("no channels with download_all enabled");
        return Ok(());
    }
    info!("found {} channels with download_all enabled", channels.len());

    let semaphore = Arc::new(Semaphore::new(ctx.config.concurrent_downloads));
    let mut total_messages = 0usize;
    let mut total_media = 0usize;

    for channel in channels {
        ctx.pause.wait_while_paused().await;
        match backfill_channel(ctx, &channel, &semaphore).await {
            Ok((messages, media)) => {
                total_messages += messages;
                total_media += media;
            }
            Err(e) => match flood_wait_seconds(&e) {
                Some(seconds) => warn!(
                    "    FloodWait: must wait {seconds} seconds, skipping to next channel"
                ),
                None => error!("    error downloading older messages: {e}"),
            },
        }
    }

    info!("history sync completed: {total_messages} messages, {total_media} media files");
    Ok(())
}

async fn backfill_channel(
    ctx: &StageContext,
    channel: &Channel,
    semaphore: &Arc<Semaphore>,
) -> anyhow::Result<(usize, usize)> {
    let access_hash = channel
        .access_hash
        .context("channel has no access hash")?;

    if let Some(backup_path) = channel.backup_path.as_deref() {
        info!("  {}: scanning backup folder for new files...", channel.title);
        backup::update_backup_hashes(&ctx.store, channel.id, backup_path);
    }

    let Some(oldest_id) = ctx.store.oldest_message_id(channel.id) else {
        info!("  {}: no messages yet", channel.title);
        return Ok((0, 0));
    };
    if oldest_id <= 1 {
        info!("  {}: already at beginning", channel.title);
        return Ok((0, 0));
    }

    info!(
        "  {}: downloading older messages (before id={oldest_id})...",
        channel.title
    );

    let batch = ctx.config.history_batch;
    let raw_messages: Vec<MessageRecord> = {
        let mut client = ctx.pool.lock_control().await;
        client
            .iter_messages(
                channel.id,
                access_hash,
                None,
                Some(oldest_id),
                Some(batch * 2),
                false,
            )
            .await?
    }
    .into_iter()
    .filter(|m| !m.is_poll())
    .take(batch)
    .collect();

    if raw_messages.is_empty() {
        info!("    reached beginning of channel history");
        return Ok((0, 0));
    }
    info!(
        "    fetched {} messages (ids {} - {})",
        raw_messages.len(),
        raw_messages.last().map(|m| m.id).unwrap_or_default(),
        raw_messages.first().map(|m| m.id).unwrap_or_default()
    );

    let to_fetch: Vec<i64> = raw_messages
        .iter()
        .filter(|m| m.media_type.is_some_and(|t| t.is_downloadable()))
        .map(|m| m.id)
        .collect();
    let media_paths = if to_fetch.is_empty() {
        HashMap::new()
    } else {
        info!(
            "    downloading {} media files ({} concurrent)...",
            to_fetch.len(),
            ctx.config.concurrent_downloads
        );
        fetch_media_batch(ctx, channel, access_hash, to_fetch, semaphore).await
    };

    let now = crate::store::now();
    let mut collected = Vec::with_capacity(raw_messages.len());
    let mut media_count = 0usize;
    for record in &raw_messages {
        let media_path = media_paths.get(&record.id).cloned();
        if media_path.is_some() {
            media_count += 1;
        }
        let mut msg = NewMessage::from_record(record, media_path, now);
        // Backfill is considered already read.
        msg.read = 1;
        collected.push(msg);
    }

    let count = collected.len();
    ctx.store.insert_messages_batch(channel.id, &collected)?;
    info!("    downloaded {count} older messages, {media_count} media files");
    Ok((count, media_count))
}

/// Per-message media routine: with a backup configured, identify large
/// files by their first-chunk hash and substitute the indexed local copy;
/// everything else is a full download. One pool slot is held for the whole
/// routine so the chunked hash read and the download go through the same
/// session.
async fn fetch_one(
    ctx: &StageContext,
    channel: &Channel,
    access_hash: i64,
    message_id: i64,
) -> Option<String> {
    let media_dir = ctx.config.media_dir();
    let mut client = ctx.pool.lock_next().await;

    if channel.backup_path.is_some() {
        match client
            .get_media_hash(channel.id, access_hash, message_id)
            .await
        {
            Ok(result) if result.needs_hash => {
                if let Some(hash) = result.hash.as_deref() {
                    if let Some(rel) =
                        backup::substitute_from_backup(&ctx.store, channel.id, hash, &media_dir)
                    {
                        info!("    [msg {message_id}] copied from backup -> {rel}");
                        return Some(rel);
                    }
                }
            }
            Ok(_) => {} // small file, download directly
            Err(e) => warn!("    [msg {message_id}] media hash check failed: {e}"),
        }
    }

    match client
        .download_media(
            channel.id,
            access_hash,
            message_id,
            &media_dir.display().to_string(),
            None,
        )
        .await
    {
        Ok(result) => {
            if let Some(path) = &result.path {
                info!("    [msg {message_id}] downloaded -> {path}");
            } else if let Some(e) = &result.error {
                warn!("    [msg {message_id}] download failed - {e}");
            }
            result.path
        }
        Err(e) => {
            error!("    [msg {message_id}] media download error: {e}");
            None
        }
    }
}

/// Fan the per-message routine out under the shared semaphore. The futures
/// borrow the stage context, so they are driven concurrently in-task
/// rather than spawned.
async fn fetch_media_batch(
    ctx: &StageContext,
    channel: &Channel,
    access_hash: i64,
    message_ids: Vec<i64>,
    semaphore: &Arc<Semaphore>,
) -> HashMap<i64, String> {
    let tasks = message_ids.into_iter().map(|message_id| {
        let semaphore = Arc::clone(semaphore);
        async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let path = fetch_one(ctx, channel, access_hash, message_id).await?;
            Some((message_id, path))
        }
    });
    futures::future::join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .collect()
}

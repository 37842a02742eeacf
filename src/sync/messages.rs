//! Forward message sync for active channels: fetch everything newer than
//! the latest stored id (ascending), download media with a bounded fan-out,
//! batch-insert, retry pending media, then reconcile upstream read state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::models::Channel;
use crate::store::messages::NewMessage;
use crate::upstream::MessageRecord;

use super::{StageContext, flood_wait_seconds};

pub async fn run(ctx: &StageContext) -> anyhow::Result<()> {
    info!("starting message sync...");
    let channels = ctx.store.active_channels();
    if channels.is_empty() {
        warn!("no active channels found; set active=1 for channels to download");
        return Ok(());
    }
    info!("found {} active channels", channels.len());

    let semaphore = Arc::new(Semaphore::new(ctx.config.concurrent_downloads));

    for channel in channels {
        ctx.pause.wait_while_paused().await;
        info!("processing channel: {} (id={})", channel.title, channel.id);
        if let Err(e) = sync_channel(ctx, &channel, &semaphore).await {
            match flood_wait_seconds(&e) {
                Some(seconds) => warn!(
                    "  FloodWait: must wait {seconds} seconds, skipping to next channel"
                ),
                None => error!("  error downloading messages: {e}"),
            }
            continue;
        }
    }
    info!("message sync completed");
    Ok(())
}

/// Download media for the given message ids concurrently, each task taking
/// a pool connection under the shared semaphore. Failures simply yield no
/// path; the caller marks those rows pending.
pub async fn download_media_batch(
    ctx: &StageContext,
    channel_id: i64,
    access_hash: i64,
    message_ids: Vec<i64>,
    semaphore: &Arc<Semaphore>,
) -> HashMap<i64, String> {
    let media_dir = ctx.config.media_dir().display().to_string();
    let mut set = JoinSet::new();
    for message_id in message_ids {
        let pool = Arc::clone(&ctx.pool);
        let semaphore = Arc::clone(semaphore);
        let media_dir = media_dir.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let mut client = pool.lock_next().await;
            match client
                .download_media(channel_id, access_hash, message_id, &media_dir, None)
                .await
            {
                Ok(result) => result.path.map(|p| (message_id, p)),
                Err(e) => {
                    error!("    media download error for message {message_id}: {e}");
                    None
                }
            }
        });
    }
    let mut paths = HashMap::new();
    while let Some(joined) = set.join_next().await {
        if let Ok(Some((id, path))) = joined {
            info!("    downloaded media: {path}");
            paths.insert(id, path);
        }
    }
    paths
}

fn wants_download(channel: &Channel, record: &MessageRecord) -> bool {
    record
        .media_type
        .is_some_and(|t| t.is_downloadable() && channel.wants_media(t))
}

async fn sync_channel(
    ctx: &StageContext,
    channel: &Channel,
    semaphore: &Arc<Semaphore>,
) -> anyhow::Result<()> {
    let access_hash = channel
        .access_hash
        .context("channel has no access hash")?;
    ctx.store.create_channel_messages_table(channel.id)?;
    let latest_id = ctx.store.latest_message_id(channel.id);

    let raw_messages: Vec<MessageRecord> = match latest_id {
        None => {
            // First sync seeds the table with the latest non-poll message.
            info!("  no messages in DB, downloading only latest");
            let mut client = ctx.pool.lock_control().await;
            client
                .iter_messages(channel.id, access_hash, None, None, Some(10), false)
                .await?
                .into_iter()
                .find(|m| !m.is_poll())
                .into_iter()
                .collect()
        }
        Some(latest_id) => {
            info!("  fetching messages newer than id={latest_id}...");
            let mut client = ctx.pool.lock_control().await;
            client
                .iter_messages(channel.id, access_hash, Some(latest_id), None, None, true)
                .await?
                .into_iter()
                .filter(|m| !m.is_poll())
                .collect()
        }
    };

    if raw_messages.is_empty() {
        info!("  no new messages");
    } else {
        info!(
            "  fetched {} messages, downloading media...",
            raw_messages.len()
        );

        let to_download: Vec<i64> = raw_messages
            .iter()
            .filter(|m| wants_download(channel, m))
            .map(|m| m.id)
            .collect();
        let media_paths =
            download_media_batch(ctx, channel.id, access_hash, to_download, semaphore).await;

        let now = crate::store::now();
        let mut collected = Vec::with_capacity(raw_messages.len());
        let mut media_count = 0usize;
        for record in &raw_messages {
            let media_path = media_paths.get(&record.id).cloned();
            if media_path.is_some() {
                media_count += 1;
            }
            let mut msg = NewMessage::from_record(record, media_path, now);
            if wants_download(channel, record) && msg.media_path.is_none() {
                msg.media_pending = 1;
                warn!(
                    "    media download failed for message {}, marked as pending",
                    record.id
                );
            }
            collected.push(msg);
        }

        let count = collected.len();
        ctx.store.insert_messages_batch(channel.id, &collected)?;
        ctx.store.update_channel_last_active(channel.id, now)?;
        info!("  downloaded {count} new messages, {media_count} media files");
    }

    retry_pending_media(ctx, channel, access_hash).await;
    reconcile_read_state(ctx, channel, access_hash).await;
    Ok(())
}

/// A bounded number of previously failed media downloads get another try
/// each run.
async fn retry_pending_media(ctx: &StageContext, channel: &Channel, access_hash: i64) {
    let pending = ctx.store.messages_with_pending_media(channel.id, 10);
    if pending.is_empty() {
        return;
    }
    info!("  retrying {} pending media downloads...", pending.len());
    let media_dir = ctx.config.media_dir().display().to_string();
    for (message_id, _) in pending {
        let mut client = ctx.pool.lock_next().await;
        match client
            .download_media(channel.id, access_hash, message_id, &media_dir, None)
            .await
        {
            Ok(result) => match result.path {
                Some(path) => {
                    ctx.store
                        .update_message_media(channel.id, message_id, Some(&path), 0)
                        .ok();
                    info!("    message {message_id}: downloaded media: {path}");
                }
                None => warn!("    message {message_id}: media download still pending"),
            },
            Err(e) => {
                warn!("    message {message_id}: retry failed: {e}");
                break;
            }
        }
    }
}

/// Pull the upstream read pointer and mark everything below it read.
async fn reconcile_read_state(ctx: &StageContext, channel: &Channel, access_hash: i64) {
    let state = {
        let mut client = ctx.pool.lock_control().await;
        client.get_read_state(channel.id, access_hash).await
    };
    match state {
        Ok(result) => {
            if let Some(max_id) = result.read_inbox_max_id {
                let updated = ctx.store.mark_messages_read_up_to(channel.id, max_id);
                if updated > 0 {
                    info!(
                        "  synced read status: {updated} messages marked read (up to id={max_id})"
                    );
                }
            }
        }
        Err(e) => warn!("  failed to sync read status: {e}"),
    }
}

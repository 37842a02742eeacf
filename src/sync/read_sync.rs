//! Push locally-read state back to the upstream: for each active channel,
//! acknowledge up to the highest read-but-unsynced id.

use tracing::{error, info, warn};

use crate::client::RpcError;

use super::StageContext;

pub async fn run(ctx: &StageContext) -> anyhow::Result<()> {
    info!("starting read status sync to upstream...");

    {
        let mut client = ctx.pool.lock_control().await;
        let status = client.ping().await?;
        info!("connected to daemon (clients: {})", status.clients);
    }

    let channels = ctx.store.active_channels();
    if channels.is_empty() {
        warn!("no active channels found");
        return Ok(());
    }
    info!("found {} active channels", channels.len());

    let mut total_synced = 0usize;
    for channel in channels {
        let Some(access_hash) = channel.access_hash else {
            continue;
        };
        let unsynced = ctx.store.unsynced_read_messages(channel.id, 1000);
        if unsynced.is_empty() {
            continue;
        }
        let max_id = unsynced.iter().copied().max().unwrap_or_default();
        info!(
            "  {}: {} messages to sync (up to id={max_id})",
            channel.title,
            unsynced.len()
        );

        let result = {
            let mut client = ctx.pool.lock_control().await;
            client
                .send_read_acknowledge(channel.id, access_hash, max_id)
                .await
        };
        match result {
            Ok(ack) if ack.success => {
                let updated = ctx.store.mark_messages_synced(channel.id, max_id);
                total_synced += updated;
                info!("  {}: synced {updated} messages as read upstream", channel.title);
            }
            Ok(_) => error!("  {}: failed to sync read status", channel.title),
            Err(RpcError::FloodWait { seconds }) => {
                warn!(
                    "  {}: FloodWait - must wait {seconds} seconds, skipping",
                    channel.title
                );
                continue;
            }
            Err(e) => error!("  {}: failed to sync read status: {e}", channel.title),
        }
    }

    info!("read status sync completed: {total_synced} messages synced upstream");
    Ok(())
}

//! Channel discovery: pull the dialog list, cache avatars, merge into the
//! store in one transaction. Channels that disappeared upstream are
//! unsubscribed but retained.

use tracing::{info, warn};

use crate::client::RpcError;

use super::StageContext;

pub async fn run(ctx: &StageContext) -> anyhow::Result<()> {
    info!("starting channel sync...");

    {
        let mut client = ctx.pool.lock_control().await;
        let status = client.ping().await?;
        info!("connected to daemon (clients: {})", status.clients);
    }

    info!("fetching channels...");
    let dialogs = {
        let mut client = ctx.pool.lock_control().await;
        match client.iter_dialogs().await {
            Ok(dialogs) => dialogs,
            Err(RpcError::FloodWait { seconds }) => {
                warn!("FloodWait on iter_dialogs: waiting {seconds} seconds...");
                tokio::time::sleep(std::time::Duration::from_secs(seconds + 1)).await;
                client.iter_dialogs().await?
            }
            Err(e) => return Err(e.into()),
        }
    };
    info!("found {} broadcast channels", dialogs.len());

    let photos_dir = ctx.config.photos_dir();
    std::fs::create_dir_all(&photos_dir)?;
    info!("downloading channel photos...");
    for channel in &dialogs {
        let photo_path = photos_dir.join(format!("{}.jpg", channel.id));
        if photo_path.exists() {
            continue;
        }
        let Some(access_hash) = channel.access_hash else {
            continue;
        };
        let mut client = ctx.pool.lock_control().await;
        match client
            .download_profile_photo(channel.id, access_hash, &photo_path.display().to_string())
            .await
        {
            Ok(result) if result.path.is_some() => {
                info!("downloaded photo for {}", channel.title);
            }
            Ok(_) => {}
            Err(e) => warn!("could not download photo for {}: {e}", channel.title),
        }
    }

    let now = crate::store::now();
    let outcome = ctx.store.sync_discovered_channels(&dialogs, now)?;
    if outcome.unsubscribed > 0 {
        warn!("marked {} channels as unsubscribed", outcome.unsubscribed);
    }
    info!(
        "channel sync completed: added={} updated={} unsubscribed={} total={}",
        outcome.inserted,
        outcome.updated,
        outcome.unsubscribed,
        dialogs.len()
    );
    Ok(())
}

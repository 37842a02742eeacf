//! Incremental search indexing: per channel, insert the difference between
//! stored messages and the FTS index in batches.

use tracing::info;

use crate::store::Store;

const BATCH_SIZE: usize = 500;

/// Index one channel. With `reindex_all` the already-indexed check is
/// skipped (used after a rebuild).
pub fn index_channel(
    store: &Store,
    channel_id: i64,
    reindex_all: bool,
) -> rusqlite::Result<usize> {
    let all_messages = store.messages_for_indexing(channel_id);
    if all_messages.is_empty() {
        return Ok(0);
    }

    let to_index: Vec<(i64, String)> = if reindex_all {
        all_messages
    } else {
        let indexed = store.indexed_message_ids(channel_id);
        all_messages
            .into_iter()
            .filter(|(id, _)| !indexed.contains(id))
            .collect()
    };
    if to_index.is_empty() {
        return Ok(0);
    }

    let mut total = 0;
    for batch in to_index.chunks(BATCH_SIZE) {
        total += store.index_messages_batch(channel_id, batch)?;
    }
    Ok(total)
}

pub fn run(store: &Store, optimize: bool, rebuild: bool) -> anyhow::Result<()> {
    info!("starting search index update...");

    if rebuild {
        info!("rebuilding search index from scratch...");
        store.clear_search_index()?;
    }

    let before = store.search_index_size();
    info!("current index size: {before} messages");

    let channels = store.active_channels();
    info!("processing {} active channels", channels.len());

    let mut total = 0usize;
    for channel in channels {
        let indexed = index_channel(store, channel.id, rebuild)?;
        if indexed > 0 {
            info!("  {}: indexed {indexed} messages", channel.title);
        }
        total += indexed;
    }

    if total > 0 {
        info!(
            "indexed {total} new messages ({before} -> {})",
            store.search_index_size()
        );
    } else {
        info!("no new messages to index");
    }

    if optimize {
        info!("optimizing search index...");
        store.optimize_search_index()?;
    }
    Ok(())
}

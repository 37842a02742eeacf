//! Chained sync stages: channel discovery, forward message sync, historical
//! backfill and read acknowledgement back to the upstream.
//!
//! Every stage is idempotent and restartable; each per-channel unit is
//! wrapped so a failure (FloodWait included) only skips that channel.

use std::sync::Arc;

use crate::client::{RpcError, RpcPool};

pub mod channels;
pub mod history;
pub mod messages;
pub mod read_sync;

/// Shared handles every stage runs with. The pool is Arc'd so media
/// downloads can be fanned out across spawned tasks.
pub struct StageContext {
    pub store: crate::store::Store,
    pub pool: Arc<RpcPool>,
    pub config: crate::config::Config,
    pub pause: crate::pause::PauseFlag,
}

impl StageContext {
    /// Open the store and connect the RPC pool for one stage run.
    pub async fn connect(config: crate::config::Config) -> anyhow::Result<StageContext> {
        let store = crate::store::Store::open(&config.db_path())?;
        let pool = Arc::new(RpcPool::connect(&config.daemon_addr(), config.rpc_pool_size).await?);
        let pause = crate::pause::PauseFlag::new(config.pause_file());
        Ok(StageContext {
            store,
            pool,
            config,
            pause,
        })
    }
}

/// FloodWait seconds when the error chain carries one.
pub fn flood_wait_seconds(err: &anyhow::Error) -> Option<u64> {
    err.downcast_ref::<RpcError>().and_then(|e| match e {
        RpcError::FloodWait { seconds } => Some(*seconds),
        _ => None,
    })
}

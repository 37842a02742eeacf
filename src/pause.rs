//! Pause sentinel: a file whose presence makes sync stages hold at their
//! checkpoints so the reader can use the upstream sessions exclusively.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

/// Coarse poll interval while paused.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PauseFlag {
    path: PathBuf,
}

impl PauseFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PauseFlag { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_paused(&self) -> bool {
        self.path.exists()
    }

    /// Raise the flag. Callers must clear it on every exit path.
    pub fn raise(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"")
    }

    pub fn clear(&self) {
        std::fs::remove_file(&self.path).ok();
    }

    /// Block until the flag disappears. Called at checkpoint boundaries
    /// (e.g. between channels); spin-waits in coarse intervals.
    pub async fn wait_while_paused(&self) {
        if !self.is_paused() {
            return;
        }
        info!("pause flag present at {}, waiting...", self.path.display());
        while self.is_paused() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        info!("pause flag cleared, resuming");
    }
}

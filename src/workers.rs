//! Maintenance workers: thumbnail generation, telegraph archival, retention
//! cleanup and search indexing. Each runs as its own supervised stage.

pub mod cleanup;
pub mod search_index;
pub mod telegraph;
pub mod thumbnails;

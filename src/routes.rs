// Route module decomposition — each domain area in its own file.
// Route functions are re-exported here for the mount list in lib.rs.

mod actions;
mod feeds;
mod manage;
mod media;
mod search;
mod system;

pub use actions::{mark_read, set_anchor, set_bookmark, set_hidden, set_rating};
pub use feeds::{
    bookmarks_feed, channel_after_feed, channel_oldest_feed, earlier_feed, group_tags,
    unread_counts, unread_feed,
};
pub use manage::{
    add_exclusion, create_group, delete_exclusion, delete_group, list_channels, list_exclusions,
    list_groups, rename_group, set_channel_active, set_channel_backup_path,
    set_channel_download_all, set_channel_group, set_channel_media_kinds, set_group_dedup,
};
pub use media::download_media_on_demand;
pub use search::search_messages;
pub use system::{channel_stats, health, not_found, stats};

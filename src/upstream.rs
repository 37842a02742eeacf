//! The upstream capability boundary.
//!
//! The proprietary session protocol is wrapped behind the [`Upstream`]
//! trait; the daemon translates RPC methods into trait calls and never sees
//! protocol details. A real implementation wraps the protocol client
//! library and is registered in `daemon::connect_sessions`. The in-tree
//! [`StubUpstream`] is fixture-driven and backs tests and local runs
//! without credentials.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::MediaType;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Rate limit from the upstream; callers must not retry before `seconds`.
    #[error("flood wait: must wait {seconds} seconds")]
    FloodWait { seconds: u64 },
    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    pub fn other(msg: impl Into<String>) -> Self {
        UpstreamError::Other(msg.into())
    }
}

/// Channel reference as the upstream addresses it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Peer {
    pub channel_id: i64,
    pub access_hash: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EntityRecord {
    pub offset: i64,
    pub length: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One upstream message as the daemon serializes it onto the wire.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageRecord {
    pub id: i64,
    pub date: Option<i64>,
    pub message: Option<String>,
    pub entities: Option<Vec<EntityRecord>>,
    #[serde(default)]
    pub out: i64,
    #[serde(default)]
    pub mentioned: i64,
    #[serde(default)]
    pub media_unread: i64,
    #[serde(default)]
    pub silent: i64,
    #[serde(default)]
    pub post: i64,
    pub from_id: Option<i64>,
    pub fwd_from_id: Option<i64>,
    pub fwd_from_name: Option<String>,
    pub reply_to_msg_id: Option<i64>,
    pub media_type: Option<MediaType>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub replies: Option<i64>,
    pub edit_date: Option<i64>,
    pub post_author: Option<String>,
    pub grouped_id: Option<i64>,
    #[serde(default)]
    pub has_media: bool,
}

impl MessageRecord {
    pub fn is_poll(&self) -> bool {
        self.media_type == Some(MediaType::Poll)
    }

    pub fn entities_json(&self) -> Option<String> {
        self.entities
            .as_ref()
            .and_then(|e| serde_json::to_string(e).ok())
    }
}

/// One broadcast channel as discovered via dialogs.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelRecord {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub title: String,
    pub username: Option<String>,
    pub photo_id: Option<i64>,
    pub date: Option<i64>,
    pub participants_count: Option<i64>,
    #[serde(default)]
    pub broadcast: i64,
    #[serde(default)]
    pub megagroup: i64,
    #[serde(default)]
    pub verified: i64,
    #[serde(default)]
    pub restricted: i64,
    #[serde(default)]
    pub scam: i64,
    #[serde(default)]
    pub fake: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IterMessages {
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

/// Authenticated upstream session. All methods may suspend; any of them may
/// fail with [`UpstreamError::FloodWait`].
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Broadcast channels visible to this session.
    async fn iter_dialogs(&self) -> Result<Vec<ChannelRecord>, UpstreamError>;

    /// Messages of one channel. Default order is newest first; `reverse`
    /// yields ascending ids. `min_id`/`max_id` are exclusive bounds.
    async fn iter_messages(
        &self,
        peer: Peer,
        opts: IterMessages,
    ) -> Result<Vec<MessageRecord>, UpstreamError>;

    async fn get_messages(
        &self,
        peer: Peer,
        ids: &[i64],
    ) -> Result<Vec<MessageRecord>, UpstreamError>;

    /// Download a message's media into `dest_dir`; returns the file name
    /// written there, or None when the message has no media.
    async fn download_media(
        &self,
        peer: Peer,
        message_id: i64,
        dest_dir: &Path,
    ) -> Result<Option<String>, UpstreamError>;

    async fn download_profile_photo(
        &self,
        peer: Peer,
        dest_path: &Path,
    ) -> Result<Option<String>, UpstreamError>;

    /// Total media size in bytes, when the upstream metadata carries one.
    async fn media_size(&self, peer: Peer, message_id: i64) -> Result<Option<u64>, UpstreamError>;

    /// First `limit` bytes of a message's media, without fetching the rest.
    async fn read_media_prefix(
        &self,
        peer: Peer,
        message_id: i64,
        limit: usize,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn send_read_acknowledge(&self, peer: Peer, max_id: i64) -> Result<(), UpstreamError>;

    async fn read_inbox_max_id(&self, peer: Peer) -> Result<Option<i64>, UpstreamError>;

    async fn disconnect(&self);
}

// --- Fixture-driven stub ---

#[derive(Debug, Deserialize, Default)]
pub struct StubFixture {
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,
    /// channel id (as string key) -> messages, any order.
    #[serde(default)]
    pub messages: HashMap<String, Vec<MessageRecord>>,
    /// "<channel_id>/<message_id>" -> media payload.
    #[serde(default)]
    pub media: HashMap<String, StubMedia>,
    #[serde(default)]
    pub read_inbox_max_id: HashMap<String, i64>,
    #[serde(default)]
    pub flood_wait: Vec<FloodRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StubMedia {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// Raw content; `bytes_b64` wins when both are present.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub bytes_b64: Option<String>,
}

impl StubMedia {
    fn bytes(&self) -> Vec<u8> {
        if let Some(b64) = &self.bytes_b64 {
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .unwrap_or_default()
        } else {
            self.content.clone().unwrap_or_default().into_bytes()
        }
    }

    fn total_size(&self) -> u64 {
        self.size.unwrap_or(self.bytes().len() as u64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FloodRule {
    pub method: String,
    #[serde(default)]
    pub channel_id: Option<i64>,
    pub seconds: u64,
}

/// Deterministic [`Upstream`] over an in-memory fixture.
pub struct StubUpstream {
    fixture: StubFixture,
}

impl StubUpstream {
    pub fn new(fixture: StubFixture) -> Self {
        StubUpstream { fixture }
    }

    pub fn from_file(path: &Path) -> Result<Self, UpstreamError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| UpstreamError::other(format!("fixture {}: {e}", path.display())))?;
        let fixture: StubFixture = serde_json::from_str(&data)
            .map_err(|e| UpstreamError::other(format!("fixture parse: {e}")))?;
        Ok(StubUpstream { fixture })
    }

    fn check_flood(&self, method: &str, channel_id: Option<i64>) -> Result<(), UpstreamError> {
        for rule in &self.fixture.flood_wait {
            if rule.method == method
                && (rule.channel_id.is_none() || rule.channel_id == channel_id)
            {
                return Err(UpstreamError::FloodWait {
                    seconds: rule.seconds,
                });
            }
        }
        Ok(())
    }

    fn channel_messages(&self, channel_id: i64) -> Vec<MessageRecord> {
        self.fixture
            .messages
            .get(&channel_id.to_string())
            .cloned()
            .unwrap_or_default()
    }

    fn media_entry(&self, channel_id: i64, message_id: i64) -> Option<&StubMedia> {
        self.fixture.media.get(&format!("{channel_id}/{message_id}"))
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn iter_dialogs(&self) -> Result<Vec<ChannelRecord>, UpstreamError> {
        self.check_flood("iter_dialogs", None)?;
        Ok(self
            .fixture
            .channels
            .iter()
            .filter(|c| c.broadcast != 0)
            .cloned()
            .collect())
    }

    async fn iter_messages(
        &self,
        peer: Peer,
        opts: IterMessages,
    ) -> Result<Vec<MessageRecord>, UpstreamError> {
        self.check_flood("iter_messages", Some(peer.channel_id))?;
        let mut msgs = self.channel_messages(peer.channel_id);
        if let Some(min_id) = opts.min_id {
            msgs.retain(|m| m.id > min_id);
        }
        if let Some(max_id) = opts.max_id {
            msgs.retain(|m| m.id < max_id);
        }
        if opts.reverse {
            msgs.sort_by_key(|m| m.id);
        } else {
            msgs.sort_by_key(|m| std::cmp::Reverse(m.id));
        }
        if let Some(limit) = opts.limit {
            msgs.truncate(limit);
        }
        Ok(msgs)
    }

    async fn get_messages(
        &self,
        peer: Peer,
        ids: &[i64],
    ) -> Result<Vec<MessageRecord>, UpstreamError> {
        self.check_flood("get_messages", Some(peer.channel_id))?;
        let msgs = self.channel_messages(peer.channel_id);
        Ok(ids
            .iter()
            .filter_map(|id| msgs.iter().find(|m| m.id == *id).cloned())
            .collect())
    }

    async fn download_media(
        &self,
        peer: Peer,
        message_id: i64,
        dest_dir: &Path,
    ) -> Result<Option<String>, UpstreamError> {
        self.check_flood("download_media", Some(peer.channel_id))?;
        let Some(media) = self.media_entry(peer.channel_id, message_id) else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| UpstreamError::other(e.to_string()))?;
        let dest = dest_dir.join(&media.name);
        tokio::fs::write(&dest, media.bytes())
            .await
            .map_err(|e| UpstreamError::other(e.to_string()))?;
        Ok(Some(media.name.clone()))
    }

    async fn download_profile_photo(
        &self,
        peer: Peer,
        dest_path: &Path,
    ) -> Result<Option<String>, UpstreamError> {
        self.check_flood("download_profile_photo", Some(peer.channel_id))?;
        let known = self
            .fixture
            .channels
            .iter()
            .any(|c| c.id == peer.channel_id && c.photo_id.is_some());
        if !known {
            return Ok(None);
        }
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpstreamError::other(e.to_string()))?;
        }
        tokio::fs::write(dest_path, b"stub-photo")
            .await
            .map_err(|e| UpstreamError::other(e.to_string()))?;
        Ok(Some(dest_path.display().to_string()))
    }

    async fn media_size(&self, peer: Peer, message_id: i64) -> Result<Option<u64>, UpstreamError> {
        self.check_flood("media_size", Some(peer.channel_id))?;
        Ok(self
            .media_entry(peer.channel_id, message_id)
            .map(|m| m.total_size()))
    }

    async fn read_media_prefix(
        &self,
        peer: Peer,
        message_id: i64,
        limit: usize,
    ) -> Result<Vec<u8>, UpstreamError> {
        self.check_flood("read_media_prefix", Some(peer.channel_id))?;
        let media = self
            .media_entry(peer.channel_id, message_id)
            .ok_or_else(|| UpstreamError::other("no media in message"))?;
        let mut bytes = media.bytes();
        bytes.truncate(limit);
        Ok(bytes)
    }

    async fn send_read_acknowledge(&self, peer: Peer, _max_id: i64) -> Result<(), UpstreamError> {
        self.check_flood("send_read_acknowledge", Some(peer.channel_id))?;
        Ok(())
    }

    async fn read_inbox_max_id(&self, peer: Peer) -> Result<Option<i64>, UpstreamError> {
        self.check_flood("get_read_state", Some(peer.channel_id))?;
        Ok(self
            .fixture
            .read_inbox_max_id
            .get(&peer.channel_id.to_string())
            .copied())
    }

    async fn disconnect(&self) {}
}

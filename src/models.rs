use serde::{Deserialize, Serialize};

/// Media kind discriminator, stored as lowercase text in the per-channel
/// tables and carried verbatim over the daemon wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Audio,
    Voice,
    Document,
    Sticker,
    Animation,
    Webpage,
    Poll,
    Unknown,
}

impl MediaType {
    pub fn parse(s: &str) -> MediaType {
        match s {
            "photo" => MediaType::Photo,
            "video" => MediaType::Video,
            "audio" => MediaType::Audio,
            "voice" => MediaType::Voice,
            "document" => MediaType::Document,
            "sticker" => MediaType::Sticker,
            "animation" => MediaType::Animation,
            "webpage" => MediaType::Webpage,
            "poll" => MediaType::Poll,
            _ => MediaType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Voice => "voice",
            MediaType::Document => "document",
            MediaType::Sticker => "sticker",
            MediaType::Animation => "animation",
            MediaType::Webpage => "webpage",
            MediaType::Poll => "poll",
            MediaType::Unknown => "unknown",
        }
    }

    /// Kinds that get fetched to disk during sync.
    pub fn is_downloadable(&self) -> bool {
        matches!(
            self,
            MediaType::Photo
                | MediaType::Video
                | MediaType::Audio
                | MediaType::Voice
                | MediaType::Document
                | MediaType::Sticker
                | MediaType::Animation
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Channel {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub title: String,
    pub username: Option<String>,
    pub photo_id: Option<i64>,
    pub date: Option<i64>,
    pub participants_count: Option<i64>,
    pub broadcast: i64,
    pub megagroup: i64,
    pub verified: i64,
    pub restricted: i64,
    pub scam: i64,
    pub fake: i64,
    pub subscribed: i64,
    pub active: i64,
    pub group_id: Option<i64>,
    pub download_all: i64,
    pub download_photos: i64,
    pub download_videos: i64,
    pub download_documents: i64,
    pub download_audio: i64,
    pub backup_path: Option<String>,
    pub last_active: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl Channel {
    /// Per-kind download switch consulted by forward sync.
    pub fn wants_media(&self, kind: MediaType) -> bool {
        match kind {
            MediaType::Photo => self.download_photos != 0,
            MediaType::Video | MediaType::Animation => self.download_videos != 0,
            MediaType::Audio | MediaType::Voice => self.download_audio != 0,
            MediaType::Document | MediaType::Sticker => self.download_documents != 0,
            _ => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub dedup: i64,
}

/// One upstream account. Session material lives out-of-band under the
/// sessions directory, keyed by `id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credential {
    pub id: i64,
    pub api_id: i64,
    pub api_hash: String,
    pub phone_number: String,
    pub primary: bool,
}

impl Credential {
    /// Phone with the middle digits masked, for logs and status output.
    pub fn redacted_phone(&self) -> String {
        let p = &self.phone_number;
        if p.chars().count() > 6 {
            let head: String = p.chars().take(4).collect();
            let tail: String = p.chars().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{head}***{tail}")
        } else {
            "***".to_string()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TagExclusion {
    pub id: i64,
    /// Canonical form: trimmed, lowercased, deduplicated, sorted, comma-joined.
    pub tags: String,
    pub created_at: i64,
}

impl TagExclusion {
    pub fn token_set(&self) -> std::collections::BTreeSet<String> {
        self.tags
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// A raw row from a `channel_<id>` table, stamped with its channel at query
/// time. Field order mirrors the table definition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredMessage {
    pub channel_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_title: Option<String>,
    pub id: i64,
    pub date: Option<i64>,
    pub message: Option<String>,
    pub entities: Option<String>,
    pub out: i64,
    pub mentioned: i64,
    pub media_unread: i64,
    pub silent: i64,
    pub post: i64,
    pub from_id: Option<i64>,
    pub fwd_from_id: Option<i64>,
    pub fwd_from_name: Option<String>,
    pub reply_to_msg_id: Option<i64>,
    pub media_type: Option<MediaType>,
    pub media_path: Option<String>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub replies: Option<i64>,
    pub edit_date: Option<i64>,
    pub post_author: Option<String>,
    pub grouped_id: Option<i64>,
    pub created_at: Option<i64>,
    pub read: i64,
    pub read_at: Option<i64>,
    pub read_in_tg: i64,
    pub rating: i64,
    pub bookmarked: i64,
    pub anchored: i64,
    pub hidden: i64,
    pub html_downloaded: i64,
    pub media_pending: i64,
    pub video_thumbnail_path: Option<String>,
    pub ai_summary: Option<String>,
    pub content_hash: Option<String>,
    pub content_hash_pending: i64,
    pub media_hash: Option<String>,
    pub media_hash_pending: i64,
    pub duplicate_of_channel: Option<i64>,
    pub duplicate_of_message: Option<i64>,
}

impl StoredMessage {
    pub fn key(&self) -> (i64, i64) {
        (self.channel_id, self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaItem {
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_thumbnail_path: Option<String>,
}

/// Album-consolidated message as served to the reader. `variants` holds the
/// duplicate cluster when expansion ran: the consolidated original first,
/// then every duplicate pointing at it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedMessage {
    #[serde(flatten)]
    pub base: StoredMessage,
    pub is_album: bool,
    pub media_items: Vec<MediaItem>,
    pub album_message_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub variants: Vec<FeedMessage>,
}

impl FeedMessage {
    /// Keys of every member of this album.
    pub fn member_keys(&self) -> Vec<(i64, i64)> {
        self.album_message_ids
            .iter()
            .map(|id| (self.base.channel_id, *id))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChannelStats {
    pub total: i64,
    pub unread: i64,
    pub bookmarked: i64,
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchHit {
    pub channel_id: i64,
    pub message_id: i64,
    pub channel_title: String,
}

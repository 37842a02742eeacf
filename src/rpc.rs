//! Wire types for the daemon RPC: newline-delimited JSON over TCP, one
//! request/response pair at a time per connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Responses are capped at 16 MiB; anything larger is a protocol error.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Files above this size are identified by the hash of their first chunk;
/// smaller files are always fetched whole.
pub const HASH_SIZE_THRESHOLD: u64 = 64 * 1024;
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood_wait_seconds: Option<u64>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Response {
            id: Some(id),
            result: Some(result),
            error: None,
            flood_wait_seconds: None,
        }
    }

    pub fn err(id: Option<u64>, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(message.into()),
            flood_wait_seconds: None,
        }
    }

    pub fn flood_wait(id: u64, seconds: u64) -> Self {
        Response {
            id: Some(id),
            result: None,
            error: Some("flood_wait".to_string()),
            flood_wait_seconds: Some(seconds),
        }
    }
}

// --- Method params ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel_id: i64,
    pub access_hash: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IterDialogsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IterMessagesParams {
    pub channel_id: i64,
    pub access_hash: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMessagesParams {
    pub channel_id: i64,
    pub access_hash: i64,
    pub ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadMediaParams {
    pub channel_id: i64,
    pub access_hash: i64,
    pub message_id: i64,
    pub dest_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMediaHashParams {
    pub channel_id: i64,
    pub access_hash: i64,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadProfilePhotoParams {
    pub channel_id: i64,
    pub access_hash: i64,
    pub dest_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendReadAcknowledgeParams {
    pub channel_id: i64,
    pub access_hash: i64,
    pub max_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

// --- Method results ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResult {
    pub status: String,
    pub clients: usize,
    pub primary_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientSummary {
    pub id: i64,
    pub phone: String,
    pub connected: bool,
    pub primary: bool,
    pub last_used: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DialogsResult {
    pub dialogs: Vec<crate::upstream::ChannelRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResult {
    pub messages: Vec<crate::upstream::MessageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathResult {
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MediaHashResult {
    pub size: u64,
    pub hash: Option<String>,
    pub needs_hash: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadStateResult {
    pub read_inbox_max_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

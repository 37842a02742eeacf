//! RPC client for the session daemon, plus a small connection pool used to
//! fan media downloads out over several daemon connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::rpc::{
    self, MAX_LINE_BYTES, MediaHashResult, MessagesResult, PathResult, PingResult,
    ReadStateResult, Request, Response, SuccessResult,
};
use crate::upstream::{ChannelRecord, MessageRecord};

/// Ordinary calls are bounded; media downloads pass their own timeout
/// (None = unbounded, used by the on-demand reader path).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("could not reach daemon: {0}")]
    Connection(String),
    /// Upstream rate limit surfaced by the daemon; skip, never busy-retry.
    #[error("flood wait: must wait {seconds} seconds")]
    FloodWait { seconds: u64 },
    #[error("daemon error: {0}")]
    Remote(String),
    #[error("request timed out")]
    Timeout,
}

pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    connected: bool,
    /// Session every call routes to; None means the daemon's primary.
    client_id: Option<i64>,
}

impl RpcClient {
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::Connection(format!("{addr}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        Ok(RpcClient {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 0,
            connected: true,
            client_id: None,
        })
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Pin this connection to one upstream session. Pool slots use this so
    /// parallel downloads spread across sessions instead of all hitting
    /// the primary.
    pub fn set_client_id(&mut self, client_id: Option<i64>) {
        self.client_id = client_id;
    }

    pub fn client_id(&self) -> Option<i64> {
        self.client_id
    }

    async fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        if !self.connected {
            return Err(RpcError::Connection("not connected to daemon".to_string()));
        }
        self.next_id += 1;
        let request = Request {
            id: self.next_id,
            method: method.to_string(),
            params,
        };

        let exchange = async {
            let mut payload = serde_json::to_vec(&request)
                .map_err(|e| RpcError::Remote(e.to_string()))?;
            payload.push(b'\n');
            self.writer
                .write_all(&payload)
                .await
                .map_err(|e| RpcError::Connection(format!("connection lost: {e}")))?;

            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| RpcError::Connection(format!("connection lost: {e}")))?;
            if n == 0 {
                return Err(RpcError::Connection(
                    "connection closed by daemon".to_string(),
                ));
            }
            if line.len() > MAX_LINE_BYTES {
                return Err(RpcError::Remote("response exceeds 16 MiB".to_string()));
            }
            Ok(line)
        };

        let line = match timeout {
            Some(t) => match tokio::time::timeout(t, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    self.connected = false;
                    return Err(RpcError::Timeout);
                }
            },
            None => exchange.await,
        };
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                self.connected = false;
                return Err(e);
            }
        };

        let response: Response = serde_json::from_str(&line)
            .map_err(|e| RpcError::Remote(format!("malformed response: {e}")))?;
        if let Some(error) = response.error {
            if error == "flood_wait" {
                return Err(RpcError::FloodWait {
                    seconds: response.flood_wait_seconds.unwrap_or(60),
                });
            }
            return Err(RpcError::Remote(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
        serde_json::from_value(value).map_err(|e| RpcError::Remote(format!("bad result: {e}")))
    }

    pub async fn ping(&mut self) -> Result<PingResult, RpcError> {
        let v = self
            .call("ping", Value::Object(Default::default()), Some(DEFAULT_TIMEOUT))
            .await?;
        Self::decode(v)
    }

    pub async fn get_clients(&mut self) -> Result<Vec<rpc::ClientSummary>, RpcError> {
        let v = self
            .call(
                "get_clients",
                Value::Object(Default::default()),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        Self::decode(v)
    }

    pub async fn iter_dialogs(&mut self) -> Result<Vec<ChannelRecord>, RpcError> {
        let v = self
            .call(
                "iter_dialogs",
                serde_json::to_value(rpc::IterDialogsParams { client_id: self.client_id }).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        let result: rpc::DialogsResult = Self::decode(v)?;
        Ok(result.dialogs)
    }

    pub async fn download_profile_photo(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        dest_path: &str,
    ) -> Result<PathResult, RpcError> {
        let params = rpc::DownloadProfilePhotoParams {
            channel_id,
            access_hash,
            dest_path: dest_path.to_string(),
            client_id: self.client_id,
        };
        let v = self
            .call(
                "download_profile_photo",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        Self::decode(v)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn iter_messages(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        min_id: Option<i64>,
        max_id: Option<i64>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<MessageRecord>, RpcError> {
        let params = rpc::IterMessagesParams {
            channel_id,
            access_hash,
            min_id,
            max_id,
            limit,
            reverse,
            client_id: self.client_id,
        };
        let v = self
            .call(
                "iter_messages",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        let result: MessagesResult = Self::decode(v)?;
        Ok(result.messages)
    }

    pub async fn get_messages(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        ids: Vec<i64>,
    ) -> Result<Vec<MessageRecord>, RpcError> {
        let params = rpc::GetMessagesParams {
            channel_id,
            access_hash,
            ids,
            client_id: self.client_id,
        };
        let v = self
            .call(
                "get_messages",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        let result: MessagesResult = Self::decode(v)?;
        Ok(result.messages)
    }

    /// `timeout` None means unbounded; large files take as long as they take.
    pub async fn download_media(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        message_id: i64,
        dest_dir: &str,
        timeout: Option<Duration>,
    ) -> Result<PathResult, RpcError> {
        let params = rpc::DownloadMediaParams {
            channel_id,
            access_hash,
            message_id,
            dest_dir: dest_dir.to_string(),
            client_id: self.client_id,
        };
        let v = self
            .call("download_media", serde_json::to_value(params).unwrap(), timeout)
            .await?;
        Self::decode(v)
    }

    pub async fn get_media_hash(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        message_id: i64,
    ) -> Result<MediaHashResult, RpcError> {
        let params = rpc::GetMediaHashParams {
            channel_id,
            access_hash,
            message_id,
            client_id: self.client_id,
        };
        let v = self
            .call(
                "get_media_hash",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        Self::decode(v)
    }

    pub async fn send_read_acknowledge(
        &mut self,
        channel_id: i64,
        access_hash: i64,
        max_id: i64,
    ) -> Result<SuccessResult, RpcError> {
        let params = rpc::SendReadAcknowledgeParams {
            channel_id,
            access_hash,
            max_id,
            client_id: self.client_id,
        };
        let v = self
            .call(
                "send_read_acknowledge",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        Self::decode(v)
    }

    pub async fn get_read_state(
        &mut self,
        channel_id: i64,
        access_hash: i64,
    ) -> Result<ReadStateResult, RpcError> {
        let params = rpc::ChannelParams {
            channel_id,
            access_hash,
            client_id: self.client_id,
        };
        let v = self
            .call(
                "get_read_state",
                serde_json::to_value(params).unwrap(),
                Some(DEFAULT_TIMEOUT),
            )
            .await?;
        Self::decode(v)
    }
}

/// Pool of daemon connections. A dedicated control connection stays on the
/// daemon's primary session for sequential calls (discovery, message
/// listings, read state). The download slots are each pinned to one of the
/// daemon's connected sessions (round-robin over the session list), so
/// concurrent downloads that lock different slots really do run against
/// different upstream sessions, not just different sockets. A slot keeps
/// its pinned session for every call made through it, which keeps
/// hash-then-download sequences on one session.
pub struct RpcPool {
    control: tokio::sync::Mutex<RpcClient>,
    clients: Vec<tokio::sync::Mutex<RpcClient>>,
    next: AtomicUsize,
}

impl RpcPool {
    pub async fn connect(addr: &str, size: usize) -> Result<Self, RpcError> {
        let mut control = RpcClient::connect(addr).await?;
        let mut clients = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            clients.push(RpcClient::connect(addr).await?);
        }

        // Learn the connected sessions and spread them over the download
        // slots. When the listing fails every slot stays on the primary.
        let session_ids: Vec<i64> = match control.get_clients().await {
            Ok(summaries) => summaries
                .into_iter()
                .filter(|s| s.connected)
                .map(|s| s.id)
                .collect(),
            Err(_) => Vec::new(),
        };
        if !session_ids.is_empty() {
            for (i, client) in clients.iter_mut().enumerate() {
                client.set_client_id(Some(session_ids[i % session_ids.len()]));
            }
        }

        Ok(RpcPool {
            control: tokio::sync::Mutex::new(control),
            clients: clients.into_iter().map(tokio::sync::Mutex::new).collect(),
            next: AtomicUsize::new(0),
        })
    }

    /// The primary-routed connection for sequential control-plane calls.
    pub async fn lock_control(&self) -> tokio::sync::MutexGuard<'_, RpcClient> {
        self.control.lock().await
    }

    /// Next download slot, round-robin across pinned sessions.
    pub async fn lock_next(&self) -> tokio::sync::MutexGuard<'_, RpcClient> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[idx].lock().await
    }
}

/// Quick liveness probe used before choosing the daemon path.
pub async fn is_daemon_running(addr: &str) -> bool {
    match RpcClient::connect(addr).await {
        Ok(mut client) => client.ping().await.is_ok(),
        Err(_) => false,
    }
}

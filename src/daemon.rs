//! Session daemon: holds one authenticated upstream session per stored
//! credential and serves the JSON-line RPC over TCP.
//!
//! Each accepted connection gets its own task running a sequential
//! read-dispatch-write loop; upstream calls suspend, so slow downloads on
//! one connection never stall the others. FloodWait from any session is
//! translated into the structured `flood_wait` wire error and never retried
//! here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Context, bail};
use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::Credential;
use crate::rpc::{
    self, ChannelParams, ClientSummary, DownloadMediaParams, DownloadProfilePhotoParams,
    GetMediaHashParams, GetMessagesParams, IterMessagesParams, MediaHashResult, PathResult,
    PingResult, Request, Response, SendReadAcknowledgeParams, SuccessResult,
};
use crate::store::Store;
use crate::upstream::{IterMessages, Peer, StubUpstream, Upstream, UpstreamError};

pub struct Session {
    pub cred_id: i64,
    pub phone: String,
    pub primary: bool,
    pub connected: bool,
    pub last_used: AtomicI64,
    pub upstream: Box<dyn Upstream>,
}

impl Session {
    pub fn new(cred: &Credential, upstream: Box<dyn Upstream>) -> Self {
        Session {
            cred_id: cred.id,
            phone: cred.redacted_phone(),
            primary: cred.primary,
            connected: true,
            last_used: AtomicI64::new(now()),
            upstream,
        }
    }

    fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.cred_id,
            phone: self.phone.clone(),
            connected: self.connected,
            primary: self.primary,
            last_used: self.last_used.load(Ordering::Relaxed),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Opens an authenticated session for one credential. The protocol client
/// library plugs in behind this trait; the daemon never sees it directly.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        cred: &Credential,
        session_path: &Path,
    ) -> Result<Box<dyn Upstream>, UpstreamError>;
}

/// Connector serving every credential from one fixture file.
pub struct StubConnector {
    pub fixture_path: PathBuf,
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(
        &self,
        _cred: &Credential,
        _session_path: &Path,
    ) -> Result<Box<dyn Upstream>, UpstreamError> {
        Ok(Box::new(StubUpstream::from_file(&self.fixture_path)?))
    }
}

pub struct Daemon {
    sessions: HashMap<i64, Arc<Session>>,
    primary_id: Option<i64>,
}

impl Daemon {
    pub fn new(sessions: Vec<Session>) -> Self {
        let mut primary_id = None;
        let mut map = HashMap::new();
        for session in sessions {
            if session.primary && session.connected {
                primary_id = Some(session.cred_id);
            }
            map.insert(session.cred_id, Arc::new(session));
        }
        if primary_id.is_none() {
            primary_id = map
                .values()
                .find(|s| s.connected)
                .map(|s| s.cred_id);
            if let Some(id) = primary_id {
                warn!("no primary credential set, using client {id}");
            }
        }
        Daemon {
            sessions: map,
            primary_id,
        }
    }

    /// Load credentials and connect one session each. Failed connects stay
    /// in the map as disconnected so `get_clients` reports them.
    pub async fn connect_sessions(
        store: &Store,
        sessions_dir: &Path,
        connector: &dyn Connector,
    ) -> anyhow::Result<Daemon> {
        std::fs::create_dir_all(sessions_dir)
            .with_context(|| format!("creating {}", sessions_dir.display()))?;
        let creds = store.all_creds()?;
        if creds.is_empty() {
            bail!("no credentials in tg_creds; add one with `chanfeed cred add`");
        }
        info!("found {} credential(s)", creds.len());

        let mut sessions = Vec::new();
        for cred in &creds {
            let session_path = sessions_dir.join(format!("{}.session", cred.id));
            info!("connecting client {} ({})", cred.id, cred.redacted_phone());
            match connector.connect(cred, &session_path).await {
                Ok(upstream) => {
                    if cred.primary {
                        info!("  client {} is primary", cred.id);
                    }
                    sessions.push(Session::new(cred, upstream));
                }
                Err(e) => {
                    warn!("  failed to connect client {}: {e}", cred.id);
                    let mut s = Session::new(cred, Box::new(DisconnectedUpstream));
                    s.connected = false;
                    sessions.push(s);
                }
            }
        }
        Ok(Daemon::new(sessions))
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("RPC server listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("new RPC connection from {addr}");
            let daemon = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = daemon.handle_conn(stream).await {
                    debug!("RPC connection from {addr} ended: {e}");
                }
            });
        }
    }

    async fn handle_conn(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => Response::err(None, format!("invalid JSON: {e}")),
            };
            let mut payload = serde_json::to_vec(&response)?;
            if payload.len() > rpc::MAX_LINE_BYTES {
                payload =
                    serde_json::to_vec(&Response::err(response.id, "response exceeds 16 MiB"))?;
            }
            payload.push(b'\n');
            write_half.write_all(&payload).await?;
        }
    }

    fn session(&self, client_id: Option<i64>) -> Result<&Arc<Session>, String> {
        let id = match client_id {
            Some(id) => id,
            None => self
                .primary_id
                .ok_or_else(|| "no primary client available".to_string())?,
        };
        self.sessions
            .get(&id)
            .filter(|s| s.connected)
            .ok_or_else(|| format!("client {id} not found or not connected"))
    }

    async fn dispatch(&self, request: Request) -> Response {
        let id = request.id;
        let client_id = request.params.get("client_id").and_then(|v| v.as_i64());
        match self.call(&request.method, request.params).await {
            Ok(result) => {
                // last_used advances only on a successful call, for the
                // session the call was routed to.
                if !matches!(request.method.as_str(), "ping" | "get_clients") {
                    if let Ok(session) = self.session(client_id) {
                        session.last_used.store(now(), Ordering::Relaxed);
                    }
                }
                Response::ok(id, result)
            }
            Err(UpstreamError::FloodWait { seconds }) => {
                warn!(
                    "FloodWait for {}: must wait {seconds} seconds",
                    request.method
                );
                Response::flood_wait(id, seconds)
            }
            Err(UpstreamError::Other(message)) => Response::err(Some(id), message),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, UpstreamError> {
            let params = if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            };
            serde_json::from_value(params)
                .map_err(|e| UpstreamError::other(format!("invalid params: {e}")))
        }
        fn json<T: serde::Serialize>(value: T) -> Result<Value, UpstreamError> {
            serde_json::to_value(value).map_err(|e| UpstreamError::other(e.to_string()))
        }

        match method {
            "ping" => {
                let clients = self.sessions.values().filter(|s| s.connected).count();
                json(PingResult {
                    status: "ok".to_string(),
                    clients,
                    primary_id: self.primary_id,
                })
            }
            "get_clients" => {
                let mut summaries: Vec<ClientSummary> =
                    self.sessions.values().map(|s| s.summary()).collect();
                summaries.sort_by_key(|s| s.id);
                json(summaries)
            }
            "iter_dialogs" => {
                let p: rpc::IterDialogsParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let dialogs = session.upstream.iter_dialogs().await?;
                json(rpc::DialogsResult { dialogs })
            }
            "iter_messages" => {
                let p: IterMessagesParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let messages = session
                    .upstream
                    .iter_messages(
                        Peer {
                            channel_id: p.channel_id,
                            access_hash: p.access_hash,
                        },
                        IterMessages {
                            min_id: p.min_id,
                            max_id: p.max_id,
                            limit: p.limit,
                            reverse: p.reverse,
                        },
                    )
                    .await?;
                json(rpc::MessagesResult { messages })
            }
            "get_messages" => {
                let p: GetMessagesParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let messages = session
                    .upstream
                    .get_messages(
                        Peer {
                            channel_id: p.channel_id,
                            access_hash: p.access_hash,
                        },
                        &p.ids,
                    )
                    .await?;
                json(rpc::MessagesResult { messages })
            }
            "download_profile_photo" => {
                let p: DownloadProfilePhotoParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let peer = Peer {
                    channel_id: p.channel_id,
                    access_hash: p.access_hash,
                };
                match session
                    .upstream
                    .download_profile_photo(peer, Path::new(&p.dest_path))
                    .await
                {
                    Ok(path) => json(PathResult { path, error: None }),
                    Err(UpstreamError::FloodWait { seconds }) => {
                        Err(UpstreamError::FloodWait { seconds })
                    }
                    Err(UpstreamError::Other(e)) => {
                        warn!("failed to download photo for {}: {e}", p.channel_id);
                        json(PathResult {
                            path: None,
                            error: Some(e),
                        })
                    }
                }
            }
            "download_media" => {
                let p: DownloadMediaParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let peer = Peer {
                    channel_id: p.channel_id,
                    access_hash: p.access_hash,
                };
                let channel_dest = Path::new(&p.dest_dir).join(p.channel_id.to_string());
                match session
                    .upstream
                    .download_media(peer, p.message_id, &channel_dest)
                    .await
                {
                    Ok(Some(name)) => json(PathResult {
                        path: Some(format!("{}/{name}", p.channel_id)),
                        error: None,
                    }),
                    Ok(None) => json(PathResult {
                        path: None,
                        error: Some("no media in message".to_string()),
                    }),
                    Err(UpstreamError::FloodWait { seconds }) => {
                        Err(UpstreamError::FloodWait { seconds })
                    }
                    Err(UpstreamError::Other(e)) => {
                        warn!("failed to download media: {e}");
                        json(PathResult {
                            path: None,
                            error: Some(e),
                        })
                    }
                }
            }
            "get_media_hash" => {
                let p: GetMediaHashParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let peer = Peer {
                    channel_id: p.channel_id,
                    access_hash: p.access_hash,
                };
                let size = session
                    .upstream
                    .media_size(peer, p.message_id)
                    .await?
                    .ok_or_else(|| UpstreamError::other("cannot determine file size"))?;
                if size <= rpc::HASH_SIZE_THRESHOLD {
                    return json(MediaHashResult {
                        size,
                        hash: None,
                        needs_hash: false,
                    });
                }
                let chunk = session
                    .upstream
                    .read_media_prefix(peer, p.message_id, rpc::HASH_CHUNK_SIZE)
                    .await?;
                let digest = Md5::digest(&chunk);
                json(MediaHashResult {
                    size,
                    hash: Some(hex::encode(digest)),
                    needs_hash: true,
                })
            }
            "send_read_acknowledge" => {
                let p: SendReadAcknowledgeParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let peer = Peer {
                    channel_id: p.channel_id,
                    access_hash: p.access_hash,
                };
                match session.upstream.send_read_acknowledge(peer, p.max_id).await {
                    Ok(()) => json(SuccessResult {
                        success: true,
                        error: None,
                    }),
                    Err(UpstreamError::FloodWait { seconds }) => {
                        Err(UpstreamError::FloodWait { seconds })
                    }
                    Err(UpstreamError::Other(e)) => {
                        warn!("failed to send read acknowledge: {e}");
                        json(SuccessResult {
                            success: false,
                            error: Some(e),
                        })
                    }
                }
            }
            "get_read_state" => {
                let p: ChannelParams = parse(params)?;
                let session = self.session(p.client_id).map_err(UpstreamError::Other)?;
                let peer = Peer {
                    channel_id: p.channel_id,
                    access_hash: p.access_hash,
                };
                match session.upstream.read_inbox_max_id(peer).await? {
                    Some(max_id) => json(rpc::ReadStateResult {
                        read_inbox_max_id: Some(max_id),
                        error: None,
                    }),
                    None => json(rpc::ReadStateResult {
                        read_inbox_max_id: None,
                        error: Some("channel not found in dialogs".to_string()),
                    }),
                }
            }
            other => Err(UpstreamError::other(format!("unknown method: {other}"))),
        }
    }

    /// Disconnect every session in parallel.
    pub async fn shutdown(&self) {
        info!("shutting down daemon...");
        let mut set = JoinSet::new();
        for session in self.sessions.values() {
            let session = Arc::clone(session);
            set.spawn(async move {
                if session.connected {
                    session.upstream.disconnect().await;
                    info!("disconnected client {}", session.cred_id);
                }
            });
        }
        while set.join_next().await.is_some() {}
        info!("daemon shutdown complete");
    }
}

/// Placeholder for sessions whose connect failed; every call reports the
/// session as unavailable.
struct DisconnectedUpstream;

#[async_trait]
impl Upstream for DisconnectedUpstream {
    async fn iter_dialogs(
        &self,
    ) -> Result<Vec<crate::upstream::ChannelRecord>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn iter_messages(
        &self,
        _peer: Peer,
        _opts: IterMessages,
    ) -> Result<Vec<crate::upstream::MessageRecord>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn get_messages(
        &self,
        _peer: Peer,
        _ids: &[i64],
    ) -> Result<Vec<crate::upstream::MessageRecord>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn download_media(
        &self,
        _peer: Peer,
        _message_id: i64,
        _dest_dir: &Path,
    ) -> Result<Option<String>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn download_profile_photo(
        &self,
        _peer: Peer,
        _dest_path: &Path,
    ) -> Result<Option<String>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn media_size(&self, _peer: Peer, _message_id: i64) -> Result<Option<u64>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn read_media_prefix(
        &self,
        _peer: Peer,
        _message_id: i64,
        _limit: usize,
    ) -> Result<Vec<u8>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn send_read_acknowledge(&self, _peer: Peer, _max_id: i64) -> Result<(), UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn read_inbox_max_id(&self, _peer: Peer) -> Result<Option<i64>, UpstreamError> {
        Err(UpstreamError::other("session not connected"))
    }

    async fn disconnect(&self) {}
}

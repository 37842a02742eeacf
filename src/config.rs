use std::env;
use std::path::PathBuf;

/// Runtime configuration, resolved once from the environment.
///
/// Every path is derived from `DATA_DIR` so the whole installation lives
/// under a single directory that can be moved or backed up as one unit.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub daemon_host: String,
    pub daemon_port: u16,
    pub web_host: String,
    pub web_port: u16,
    pub ai_provider: String,
    pub mistral_api_key: String,
    pub mistral_model: String,
    pub cerebras_api_key: String,
    pub cerebras_model: String,
    pub dedup_min_message_length: usize,
    pub dedup_messages_per_run: usize,
    pub dedup_api_delay_ms: u64,
    pub concurrent_downloads: usize,
    pub history_batch: usize,
    pub rpc_pool_size: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            daemon_host: env_or("DAEMON_HOST", "127.0.0.1"),
            daemon_port: env_parse("DAEMON_PORT", 9876),
            web_host: env_or("WEB_HOST", "0.0.0.0"),
            web_port: env_parse("WEB_PORT", 8910),
            ai_provider: env_or("AI_PROVIDER", "auto"),
            mistral_api_key: env_or("MISTRAL_API_KEY", ""),
            mistral_model: env_or("MISTRAL_MODEL", "mistral-small-latest"),
            cerebras_api_key: env_or("CEREBRAS_API_KEY", ""),
            cerebras_model: env_or("CEREBRAS_MODEL", "llama-3.3-70b"),
            dedup_min_message_length: env_parse("DEDUP_MIN_MESSAGE_LENGTH", 50),
            dedup_messages_per_run: env_parse("DEDUP_MESSAGES_PER_RUN", 100),
            dedup_api_delay_ms: env_parse("DEDUP_API_DELAY_MS", 500),
            concurrent_downloads: env_parse("CONCURRENT_DOWNLOADS", 5),
            history_batch: env_parse("HISTORY_BATCH", 500),
            rpc_pool_size: env_parse("RPC_POOL_SIZE", 4),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chanfeed.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.data_dir.join("photos")
    }

    pub fn telegraph_dir(&self) -> PathBuf {
        self.data_dir.join("telegraph")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Sentinel whose presence pauses sync stages at checkpoint boundaries.
    /// The reader creates it to get exclusive upstream access.
    pub fn pause_file(&self) -> PathBuf {
        self.data_dir.join(".pause")
    }

    pub fn daemon_addr(&self) -> String {
        format!("{}:{}", self.daemon_host, self.daemon_port)
    }
}

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8093,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.dialhub/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub account_sid: Option<String>,
    /// Provider auth token; doubles as the webhook signing secret.
    pub auth_token: Option<String>,
    pub api_base_url: String,
    /// Externally visible base URL, used to reconstruct the signed webhook
    /// URL and to register status callbacks.
    pub public_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            api_base_url: "https://api.twilio.com".to_string(),
            public_base_url: "http://127.0.0.1:8093".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds since the last heartbeat within which an agent counts as
    /// active.
    pub active_window_seconds: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            active_window_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub path: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            path: "~/.dialhub/dead-letter.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub request_timeout_seconds: u64,
    pub ttl_seconds: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 5,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Conversations with no traffic for this many days auto-close.
    pub close_after_days: i64,
    pub sweep_interval_seconds: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            close_after_days: 7,
            sweep_interval_seconds: 3600,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("DIALHUB_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.dialhub/dialhub.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_cfg) = serde_json::from_str::<Config>(&raw) {
                cfg = file_cfg;
            }
        }
    }

    // Override from environment
    if let Ok(token) = env::var("DIALHUB_TOKEN") {
        if !token.trim().is_empty() {
            cfg.auth.token = Some(token);
        }
    }

    if let Ok(url) = env::var("DIALHUB_DATABASE_URL") {
        if !url.trim().is_empty() {
            cfg.database.url = Some(url);
        }
    }

    if let Ok(path) = env::var("DIALHUB_SQLITE_PATH") {
        if !path.trim().is_empty() {
            cfg.database.sqlite_path = path;
        }
    }

    if let Ok(sid) = env::var("DIALHUB_ACCOUNT_SID") {
        if !sid.trim().is_empty() {
            cfg.telephony.account_sid = Some(sid);
        }
    }

    if let Ok(token) = env::var("DIALHUB_AUTH_TOKEN") {
        if !token.trim().is_empty() {
            cfg.telephony.auth_token = Some(token);
        }
    }

    if let Ok(url) = env::var("DIALHUB_PUBLIC_BASE_URL") {
        if !url.trim().is_empty() {
            cfg.telephony.public_base_url = url;
        }
    }

    if let Ok(path) = env::var("DIALHUB_DEAD_LETTER_PATH") {
        if !path.trim().is_empty() {
            cfg.dead_letter.path = path;
        }
    }

    cfg
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}", path.to_string_lossy())
}

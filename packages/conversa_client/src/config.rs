use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ClientError;
use crate::models::{ConversationId, MAX_MESSAGE_LEN};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    http_url = "https://chat.example.com"
//
//   env var:         CONVERSA_SERVER__HTTP_URL=https://chat.example.com
//
//   (single underscore stays within field names: CONVERSA_CHAT__TYPING_TIMEOUT_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Endpoints (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_http_url")]
    pub http_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: default_ws_url(),
        }
    }
}

/// Chat behaviour knobs (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            typing_timeout_ms: default_typing_timeout_ms(),
            max_message_len: default_max_message_len(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_http_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_ws_url() -> String {
    "ws://127.0.0.1:8000".to_string()
}
fn default_typing_timeout_ms() -> u64 {
    5000
}
fn default_max_message_len() -> usize {
    MAX_MESSAGE_LEN
}
fn default_channel_capacity() -> usize {
    64
}

/// Build a figment that layers: defaults → config.toml → CONVERSA_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CONVERSA_SERVER__WS_URL=ws://chat:8000`  →  `server.ws_url = "ws://chat:8000"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CONVERSA_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Server endpoints (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub http_url: Url,
    pub ws_url: Url,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        Ok(Self {
            http_url: Url::parse(&fc.http_url)
                .with_context(|| format!("Invalid server.http_url: {}", fc.http_url))?,
            ws_url: Url::parse(&fc.ws_url)
                .with_context(|| format!("Invalid server.ws_url: {}", fc.ws_url))?,
        })
    }

    /// `/{conversation_id}/?token=<token>`
    pub fn conversation_socket_url(
        &self,
        id: &ConversationId,
        token: &str,
    ) -> Result<Url, ClientError> {
        let mut url = with_segments(&self.ws_url, &[id.as_str()])?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// `/notifications/?token=<token>`
    pub fn notification_socket_url(&self, token: &str) -> Result<Url, ClientError> {
        let mut url = with_segments(&self.ws_url, &["notifications"])?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// REST endpoint under the HTTP base, always with a trailing slash.
    pub fn api_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        with_segments(&self.http_url, segments)
    }
}

fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(segments)
        .push("");
    Ok(url)
}

/// Chat behaviour (runtime view).
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Quiet period after the last keystroke before `typing:false` is sent
    pub typing_timeout: Duration,
    /// Maximum outgoing message length in characters
    pub max_message_len: usize,
    /// Bounded channel capacity per socket
    pub channel_capacity: usize,
}

impl ChatConfig {
    pub fn from_file(fc: &ChatFileConfig) -> Self {
        Self {
            typing_timeout: Duration::from_millis(fc.typing_timeout_ms),
            max_message_len: fc.max_message_len,
            channel_capacity: fc.channel_capacity.max(1),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_file(&ChatFileConfig::default())
    }
}

// =============================================================================
// Directory layout + resolved config
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub chat: ChatConfig,
}

impl ClientConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".conversa"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let fc: FileConfig = load_config(&data_dir)
            .extract()
            .context("Failed to load configuration")?;

        debug!("Data directory: {}", data_dir.display());

        Self::from_file(data_dir, &fc)
    }

    pub fn from_file(data_dir: PathBuf, fc: &FileConfig) -> Result<Self> {
        Ok(Self {
            data_dir,
            server: ServerConfig::from_file(&fc.server)?,
            chat: ChatConfig::from_file(&fc.chat),
        })
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::extractor::InstagramStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Invalid PORT: {0}")]
    Port(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
}

fn default_port() -> u16 {
    8080
}

fn default_submit_path() -> String {
    "/api/submit".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            submit_path: default_submit_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_url_table")]
    pub url_table: String,
    #[serde(default = "default_like_table")]
    pub like_table: String,
    #[serde(default = "default_auth_table")]
    pub auth_table: String,
}

fn default_store_path() -> String {
    "./external/relay.redb".to_string()
}

fn default_url_table() -> String {
    "url".to_string()
}

fn default_like_table() -> String {
    "like".to_string()
}

fn default_auth_table() -> String {
    "auth".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            url_table: default_url_table(),
            like_table: default_like_table(),
            auth_table: default_auth_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Channel the relay republishes into, e.g. `@my_channel` or a numeric id.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel: None,
            api_base: default_telegram_api(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared secret for `/auth <secret>`. When unset, every user may use the bot.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TwitterConfig {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixivConfig {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_pixiv_client_id")]
    pub client_id: String,
    #[serde(default = "default_pixiv_client_secret")]
    pub client_secret: String,
    #[serde(default = "default_ugoira_endpoint")]
    pub ugoira_endpoint: String,
}

fn default_pixiv_client_id() -> String {
    "MOBrBDS8blbauoSck0ZfDbtuzpyT".to_string()
}

fn default_pixiv_client_secret() -> String {
    "lsACyCD94FhDUtGTXi3QzcFE2uU1hqtDaKeqrdwj".to_string()
}

fn default_ugoira_endpoint() -> String {
    "http://ugoira.dataprocessingclub.org/convert".to_string()
}

impl Default for PixivConfig {
    fn default() -> Self {
        Self {
            refresh_token: None,
            username: None,
            password: None,
            client_id: default_pixiv_client_id(),
            client_secret: default_pixiv_client_secret(),
            ugoira_endpoint: default_ugoira_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DanbooruConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisskeyConfig {
    #[serde(default = "default_misskey_instances")]
    pub instances: Vec<String>,
}

fn default_misskey_instances() -> Vec<String> {
    vec!["misskey.io".to_string(), "misskey.design".to_string()]
}

impl Default for MisskeyConfig {
    fn default() -> Self {
        Self {
            instances: default_misskey_instances(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default = "default_bluesky_api")]
    pub api_base: String,
}

fn default_bluesky_api() -> String {
    "https://public.api.bsky.app".to_string()
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            api_base: default_bluesky_api(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default = "default_instagram_strategies")]
    pub strategies: Vec<InstagramStrategy>,
}

fn default_instagram_strategies() -> Vec<InstagramStrategy> {
    vec![
        InstagramStrategy::DirectMedia,
        InstagramStrategy::Html,
        InstagramStrategy::Oembed,
    ]
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            strategies: default_instagram_strategies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DropboxConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub save_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible stores; enables path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub save_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub pixiv: PixivConfig,
    #[serde(default)]
    pub danbooru: DanbooruConfig,
    #[serde(default)]
    pub misskey: MisskeyConfig,
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub dropbox: DropboxConfig,
    #[serde(default)]
    pub s3: S3Config,
}

const CONFIG_ENV: &str = "VGET_RELAY_CONFIG";

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("./external/config.yml"));
    paths.push(PathBuf::from("./external/config.yaml"));
    // Same layout as the CLI: ~/.config/<app>/
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("vget-relay").join("config.yml"));
    }
    paths
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Load the first config file found, or defaults, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match candidate_paths().into_iter().find(|p| p.exists()) {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading config");
                Self::from_file(&path)?
            }
            None => {
                tracing::warn!("no config file found, using defaults");
                Config::default()
            }
        };

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.parse().map_err(|_| ConfigError::Port(port))?;
        }

        Ok(config)
    }
}

/// `ENV=DEBUG` or `ENV=LOCAL` turns on debug logging and relaxed TLS.
pub fn debug_mode() -> bool {
    matches!(std::env::var("ENV").as_deref(), Ok("DEBUG") | Ok("LOCAL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.submit_path, "/api/submit");
        assert_eq!(config.store.url_table, "url");
        assert_eq!(config.misskey.instances, vec!["misskey.io", "misskey.design"]);
        assert_eq!(config.instagram.strategies.len(), 3);
        assert!(config.telegram.channel.is_none());
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let yaml = r#"
telegram:
  bot_token: "123:abc"
  channel: "@relay"
store:
  path: /tmp/relay.redb
instagram:
  strategies: [html, direct_media]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.telegram.channel.as_deref(), Some("@relay"));
        assert_eq!(config.store.path, "/tmp/relay.redb");
        assert_eq!(config.store.like_table, "like");
        assert_eq!(
            config.instagram.strategies,
            vec![InstagramStrategy::Html, InstagramStrategy::DirectMedia]
        );
    }
}

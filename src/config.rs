use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::User;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_BLOB_URL: &str = "http://127.0.0.1:8080";

/// Tuỳ chọn thông báo của người dùng hiện tại.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPrefs {
    #[serde(default = "enabled")]
    pub notify_when_news: bool,
    #[serde(default = "enabled")]
    pub voice: bool,
    #[serde(default = "enabled")]
    pub vibrate: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotifyPrefs {
    fn default() -> Self {
        Self {
            notify_when_news: true,
            voice: true,
            vibrate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_blob_url")]
    pub blob_base_url: String,
    #[serde(default)]
    pub notify: NotifyPrefs,
    #[serde(default)]
    pub users: Vec<User>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_blob_url() -> String {
    DEFAULT_BLOB_URL.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            data_dir: default_data_dir(),
            blob_base_url: default_blob_url(),
            notify: NotifyPrefs::default(),
            users: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("client.db")
    }

    /// Downloaded audio/image blobs, one file per object id.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("client_key.pk")
    }

    /// `CHAT_DATA_DIR` / `CHAT_BLOB_URL` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("CHAT_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = env::var("CHAT_BLOB_URL") {
            if !url.trim().is_empty() {
                self.blob_base_url = url;
            }
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

pub fn persist_bootstrap_node(path: &str, entry: &str) {
    let mut config = load_config(path);
    config.bootstrap_nodes.retain(|node| node != entry);
    config.bootstrap_nodes.insert(0, entry.to_string());

    if let Err(err) = save_config(path, &config) {
        log::error!("Failed to write bootstrap config {}: {err}", path);
    } else {
        log::info!("Persisted bootstrap node {} to {}", entry, path);
    }
}

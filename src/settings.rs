use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `endpoint_url` after loading.
pub const ENDPOINT_ENV: &str = "VOICELINK_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for a single clip; a stalled engine is stopped after this.
    #[serde(default = "default_playback_timeout_ms")]
    pub playback_timeout_ms: u64,
    /// Retry with backoff when the socket drops on its own. Off means the
    /// user reconnects through reset.
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,
    /// Directory for ephemeral playback files. Empty = system temp dir.
    #[serde(default)]
    pub scratch_dir: String,
    /// Device names; empty means the system default.
    #[serde(default)]
    pub input_device: String,
    #[serde(default)]
    pub output_device: String,
    #[serde(default = "default_capture_sample_rate")]
    pub capture_sample_rate: u32,
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_timeout_ms.max(1))
    }

    pub fn scratch_path(&self) -> PathBuf {
        if self.scratch_dir.trim().is_empty() {
            std::env::temp_dir().join("voicelink").join("playback")
        } else {
            PathBuf::from(self.scratch_dir.trim())
        }
    }

    pub fn input_device(&self) -> Option<&str> {
        named_device(&self.input_device)
    }

    pub fn output_device(&self) -> Option<&str> {
        named_device(&self.output_device)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SessionError::Config(format!(
                "endpoint_url must start with ws:// or wss://, got '{}'",
                url
            )));
        }
        if self.capture_sample_rate == 0 {
            return Err(SessionError::Config("capture_sample_rate must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            playback_timeout_ms: default_playback_timeout_ms(),
            auto_reconnect: false,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_retries: default_reconnect_max_retries(),
            scratch_dir: String::new(),
            input_device: String::new(),
            output_device: String::new(),
            capture_sample_rate: default_capture_sample_rate(),
        }
    }
}

fn default_endpoint_url() -> String {
    "ws://127.0.0.1:8888/ws".into()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_playback_timeout_ms() -> u64 {
    120_000
}
fn default_reconnect_base_ms() -> u64 {
    800
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_reconnect_max_retries() -> u32 {
    12
}
fn named_device(name: &str) -> Option<&str> {
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn default_capture_sample_rate() -> u32 {
    16000
}

pub fn settings_path() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("VoiceLink").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".voicelink").join("settings.json"));
    }
    Err(SessionError::Config("Failed to resolve data directory".into()))
}

/// Load settings from the default location, then apply the environment
/// override. Missing or unreadable files fall back to defaults.
pub fn load() -> Settings {
    let mut settings = match settings_path() {
        Ok(path) => load_from(&path),
        Err(_) => Settings::default(),
    };
    apply_env(&mut settings, std::env::var(ENDPOINT_ENV).ok());
    settings
}

pub fn load_from(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!("[settings] ignoring unreadable {}: {}", path.display(), e);
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

fn apply_env(settings: &mut Settings, endpoint: Option<String>) {
    if let Some(url) = endpoint {
        let url = url.trim();
        if !url.is_empty() {
            settings.endpoint_url = url.to_string();
        }
    }
}

pub fn save(settings: &Settings) -> Result<()> {
    save_to(&settings_path()?, settings)
}

pub fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SessionError::Config(format!("Failed to create settings dir: {}", e)))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| SessionError::Config(format!("Failed to serialize settings: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| SessionError::Config(format!("Failed to write settings: {}", e)))?;
    Ok(())
}

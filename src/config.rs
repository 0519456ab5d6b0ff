use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::editor::coords::{clamp_zoom, DEFAULT_ZOOM};
use crate::editor::export::{ExportFormat, ExportQuality};
use crate::recorder::CaptureMode;

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Overrides the socket base derived from `base_url`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_base: None,
            timeout_secs: default_timeout_secs(),
            user_id: None,
        }
    }
}

impl ApiConfig {
    /// Socket base URL, using the HTTP base with its scheme swapped if not set
    pub fn ws_base(&self) -> String {
        if let Some(base) = &self.ws_base {
            return base.trim_end_matches('/').to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("default")
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecorderConfig {
    #[serde(default)]
    pub mode: CaptureMode,
    /// Window id, display id or `WxH+X,Y` area, depending on `mode`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_true")]
    pub microphone: bool,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_timeslice_ms")]
    pub timeslice_ms: u64,
    #[serde(default = "default_finish_grace_ms")]
    pub finish_grace_ms: u64,
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            source: None,
            microphone: true,
            framerate: default_framerate(),
            timeslice_ms: default_timeslice_ms(),
            finish_grace_ms: default_finish_grace_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            ffmpeg_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_framerate() -> u32 {
    30
}

fn default_timeslice_ms() -> u64 {
    1000
}

fn default_finish_grace_ms() -> u64 {
    500
}

fn default_restart_settle_ms() -> u64 {
    300
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EditorConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            default_zoom: default_zoom(),
        }
    }
}

fn default_history_limit() -> usize {
    50
}

fn default_zoom() -> f64 {
    DEFAULT_ZOOM
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub quality: ExportQuality,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            quality: ExportQuality::default(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Config {
    /// Load config from file or default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p.to_path_buf()
        } else {
            Self::default_path()
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))?
        } else {
            Config::default()
        };

        config.apply_env_fallbacks();
        config.editor.default_zoom = clamp_zoom(config.editor.default_zoom);
        Ok(config)
    }

    /// Default config path: ~/.config/reelkit/config.toml
    pub fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("reelkit").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelkit")
            .join("config.toml")
    }

    fn apply_env_fallbacks(&mut self) {
        if let Ok(url) = std::env::var("REELKIT_API_URL") {
            self.api.base_url = url;
        }
        if self.recorder.ffmpeg_path.is_none() {
            self.recorder.ffmpeg_path = std::env::var("REELKIT_FFMPEG").ok();
        }
    }

    pub fn ffmpeg_path(&self) -> String {
        self.recorder
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| "ffmpeg".to_string())
    }

    /// Write config to file
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(())
    }
}

/// Client state that survives restarts.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ClientState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_id: Option<String>,
    /// Topic submitted with `last_job_id`, sent again on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_topic: Option<String>,
}

impl ClientState {
    /// Default state path: <data dir>/reelkit/state.toml
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelkit")
            .join("state.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client state from {:?}", path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse client state from {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {:?}", parent))?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize client state")?;
        std::fs::write(path, toml_str)
            .with_context(|| format!("Failed to write client state to {:?}", path))?;
        Ok(())
    }
}

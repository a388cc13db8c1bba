use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub popup: PopupConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub mute: MuteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Popup look and lifecycle knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupConfig {
    /// Dismiss timer used when a request carries no positive timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// New popups beyond this many live ones are rejected.
    #[serde(default = "default_max_visible")]
    pub max_visible: usize,
    #[serde(default = "default_popup_width")]
    pub width: u32,
    #[serde(default = "default_popup_height")]
    pub height: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
    /// Opacity while the pointer is elsewhere.  Hovered popups are opaque.
    #[serde(default = "default_idle_opacity")]
    pub idle_opacity: f32,
    /// Summary is elided past this many display columns.
    #[serde(default = "default_summary_max_width")]
    pub summary_max_width: usize,
    /// File icons are scaled so their longest side fits this.
    #[serde(default = "default_icon_size")]
    pub icon_size: u32,
}

/// Display area popups are anchored to (bottom-right corner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_screen_width")]
    pub width: u32,
    #[serde(default = "default_screen_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteConfig {
    /// Suppression window started by a popup's mute button.
    #[serde(default = "default_mute_secs")]
    pub button_duration_secs: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_visible: default_max_visible(),
            width: default_popup_width(),
            height: default_popup_height(),
            margin: default_margin(),
            idle_opacity: default_idle_opacity(),
            summary_max_width: default_summary_max_width(),
            icon_size: default_icon_size(),
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: default_screen_width(),
            height: default_screen_height(),
        }
    }
}

impl Default for MuteConfig {
    fn default() -> Self {
        Self {
            button_duration_secs: default_mute_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_visible() -> usize {
    10
}

fn default_popup_width() -> u32 {
    360
}

fn default_popup_height() -> u32 {
    96
}

fn default_margin() -> u32 {
    12
}

fn default_idle_opacity() -> f32 {
    0.85
}

fn default_summary_max_width() -> usize {
    48
}

fn default_icon_size() -> u32 {
    48
}

fn default_screen_width() -> u32 {
    1920
}

fn default_screen_height() -> u32 {
    1080
}

fn default_mute_secs() -> u64 {
    300
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            debug!("Wrote default config to {:?}", path);
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.socket.bind_address, self.socket.port)
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::downloader::DownloadError;

/// Convert a seconds value from config into a Duration; negative, NaN or
/// overflowing values become zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Which site pages are accepted and how page URLs map to the player embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub host: String,
    /// Regular media page path, rewritten to `embed_prefix` before discovery
    pub page_prefix: String,
    pub embed_prefix: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            host: "www.picta.cu".to_string(),
            page_prefix: "/medias/".to_string(),
            embed_prefix: "/embed/".to_string(),
        }
    }
}

/// Timing and selectors for the traffic observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub media_selector: String,
    /// Tried in order; the first non-empty text wins
    pub title_selectors: Vec<String>,
    pub fallback_title: String,
    pub element_timeout_secs: f64,
    /// Wait after the media element shows up
    pub settle_window_secs: f64,
    /// Wait after calling play()
    pub playback_window_secs: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            media_selector: "video".to_string(),
            title_selectors: vec!["h1.title".to_string(), "h1".to_string()],
            fallback_title: "Picta Video".to_string(),
            element_timeout_secs: 20.0,
            settle_window_secs: 5.0,
            playback_window_secs: 3.0,
        }
    }
}

impl DiscoveryConfig {
    pub fn element_timeout(&self) -> Duration {
        secs(self.element_timeout_secs)
    }

    pub fn settle_window(&self) -> Duration {
        secs(self.settle_window_secs)
    }

    pub fn playback_window(&self) -> Duration {
        secs(self.playback_window_secs)
    }
}

/// Network configuration for the HTTP fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,
    /// HTTP or SOCKS5 proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,
    pub connect_timeout_secs: u64,
    /// Largest slice written and reported per progress event
    pub chunk_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
            proxy: None,
            connect_timeout_secs: 30,
            chunk_size: 64 * 1024,
        }
    }
}

/// Headless Chrome driven through chromedriver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path to chromedriver; auto-detected when unset
    pub chromedriver: Option<String>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub startup_timeout_secs: u64,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chromedriver: None,
            headless: true,
            window_width: 1920,
            window_height: 1080,
            startup_timeout_secs: 15,
            extra_args: Vec::new(),
        }
    }
}

/// Whether the selected streams download one after another or together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Sequential,
    #[default]
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub fetch_mode: FetchMode,
    pub output_extension: String,
    /// Codec for a separately downloaded audio track
    pub audio_codec: String,
    pub subtitle_codec: String,
    /// Parent for the private per-download temp directories
    pub temp_root: Option<PathBuf>,
    /// Path to ffmpeg; auto-detected when unset
    pub ffmpeg: Option<String>,
    pub mux_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            fetch_mode: FetchMode::Concurrent,
            output_extension: "mp4".to_string(),
            audio_codec: "aac".to_string(),
            subtitle_codec: "mov_text".to_string(),
            temp_root: None,
            ffmpeg: None,
            mux_timeout_secs: 3600,
        }
    }
}

/// Global configuration loaded from `~/.config/picta-downloader/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub site: SiteConfig,
    pub discovery: DiscoveryConfig,
    pub network: NetworkConfig,
    pub browser: BrowserConfig,
    pub download: DownloadConfig,
}

impl DownloaderConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.network.proxy = proxy;
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.download.fetch_mode = mode;
        self
    }

    pub fn with_temp_root(mut self, root: Option<PathBuf>) -> Self {
        self.download.temp_root = root;
        self
    }

    /// Element timeout, settle window and playback window, in seconds
    pub fn with_discovery_windows(mut self, element: f64, settle: f64, playback: f64) -> Self {
        self.discovery.element_timeout_secs = element;
        self.discovery.settle_window_secs = settle;
        self.discovery.playback_window_secs = playback;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DownloadError> {
        toml::from_str(text).map_err(|e| DownloadError::Config(e.to_string()))
    }

    /// Load config from `path`, or from the default location when it exists,
    /// or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, DownloadError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    tracing::debug!("[config] no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = fs::read_to_string(&path)
            .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("[config] loaded {}", path.display());
        Ok(config)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("picta-downloader").join("config.toml"))
}

/// Where downloads land when the user names no directory
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

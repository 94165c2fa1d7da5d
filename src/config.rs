use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bsky::BSKY_API_BASE;
use crate::markdown::{Format, MediaMode, RenderOptions};

const DEFAULT_ENV_PREFIX: &str = "BSKY_ARCHIVER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub preferences: RenderOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Budget for a whole archive run; zero disables it.
    #[serde(default = "default_archive_timeout", with = "humantime_serde")]
    pub archive_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            archive_timeout: default_archive_timeout(),
        }
    }
}

fn default_base_url() -> String {
    BSKY_API_BASE.to_string()
}

fn default_user_agent() -> String {
    format!("bsky-archiver/{}", crate::VERSION)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_archive_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_workers")]
    pub download_workers: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            download_workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

impl Config {
    /// `None` when the archive timeout is disabled.
    pub fn archive_timeout(&self) -> Option<Duration> {
        Some(self.api.archive_timeout).filter(|timeout| !timeout.is_zero())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Defaults, then the config file (if present), then environment overrides.
pub fn load(options: LoadOptions) -> Result<Config> {
    let path = options.config_file.or_else(default_config_path);
    let mut cfg = match path {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    if cfg.archive.workers == 0 {
        cfg.archive.workers = 1;
    }
    if cfg.archive.download_workers == 0 {
        cfg.archive.download_workers = 1;
    }
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.request_timeout = duration;
            }
        }
        "api.archive_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.archive_timeout = duration;
            }
        }
        "archive.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.archive.workers = parsed;
            }
        }
        "archive.download_workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.archive.download_workers = parsed;
            }
        }
        "preferences.media" => {
            if let Ok(media) = <MediaMode as clap::ValueEnum>::from_str(&value, true) {
                cfg.preferences.media = media;
            }
        }
        "preferences.format" => {
            if let Ok(format) = <Format as clap::ValueEnum>::from_str(&value, true) {
                cfg.preferences.format = format;
            }
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bsky-archiver").join("config.yaml"))
}

/// Persist the media and format choices, keeping the rest of an existing
/// config file untouched.
pub fn save_preferences(path: Option<PathBuf>, preferences: RenderOptions) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.preferences = preferences;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

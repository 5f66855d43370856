use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::strategy::DownloadMode;

/// Thresholds used by the dispatcher when resolving `auto` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Median latency at or below this counts as excellent.
    pub latency_excellent_ms: f64,
    /// Median latency above this counts as a poor network.
    pub latency_good_ms: f64,
    pub loss_excellent: f64,
    pub loss_good: f64,
    /// Circuit breaker looks at outcomes recorded within this window.
    pub breaker_window_secs: u64,
    /// Failure ratio strictly above this trips the breaker.
    pub breaker_failure_ratio: f64,
    /// Fewer outcomes than this never trip the breaker.
    pub breaker_min_samples: usize,
    /// More running jobs than this counts as congested.
    pub congestion_threshold: usize,
    /// Ring-buffer capacity of the outcome history.
    pub history_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            latency_excellent_ms: 150.0,
            latency_good_ms: 350.0,
            loss_excellent: 0.0,
            loss_good: 0.05,
            breaker_window_secs: 300,
            breaker_failure_ratio: 0.3,
            breaker_min_samples: 5,
            congestion_threshold: 2,
            history_capacity: 50,
        }
    }
}

impl DispatchConfig {
    pub fn breaker_window(&self) -> Duration {
        Duration::from_secs(self.breaker_window_secs)
    }
}

/// Reference host the network probe connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub attempts: u32,
    pub cache_ttl_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "www.youtube.com".to_string(),
            port: 443,
            timeout_ms: 1000,
            attempts: 3,
            cache_ttl_secs: 30,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Downloader process supervision parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Number of trailing output lines kept for diagnostics.
    pub tail_lines: usize,
    /// How long a terminated process gets to exit before it is killed.
    pub terminate_grace_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            tail_lines: 120,
            terminate_grace_ms: 1000,
        }
    }
}

/// Global configuration loaded from `~/.config/mdm/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdmConfig {
    /// Maximum number of downloader processes running at once.
    pub max_concurrent_downloads: usize,
    /// Mode used for jobs added without an explicit `--mode`.
    pub default_mode: DownloadMode,
    /// How long `run` waits for jobs to stop on Ctrl-C before killing them.
    pub shutdown_grace_ms: u64,
    /// Retry a failed run with the next weaker strategy before giving up.
    pub runtime_downgrade: bool,
    /// Explicit downloader binary; when unset, `yt-dlp` is looked up on PATH.
    pub yt_dlp_path: Option<PathBuf>,
    /// Default output directory (None = current directory).
    pub download_dir: Option<PathBuf>,
    pub dispatch: DispatchConfig,
    pub probe: ProbeConfig,
    pub executor: ExecutorSection,
}

impl Default for MdmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            default_mode: DownloadMode::Auto,
            shutdown_grace_ms: 2000,
            runtime_downgrade: false,
            yt_dlp_path: None,
            download_dir: None,
            dispatch: DispatchConfig::default(),
            probe: ProbeConfig::default(),
            executor: ExecutorSection::default(),
        }
    }
}

impl MdmConfig {
    /// Concurrency limit, never below 1.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg).context("serialize default config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        fs::write(&path, toml).with_context(|| format!("write config: {}", path.display()))?;
        tracing::info!(path = %path.display(), "created default config");
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(&path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: MdmConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}

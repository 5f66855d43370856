//! Download strategies: immutable parameter presets for one downloader invocation.
//!
//! A strategy never changes after construction. Adapting to the network means picking
//! a different preset (or a derived copy via [`Strategy::with_concurrent_fragments`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::options::{JobOptions, NetworkTuning};

/// Mode requested by the user for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Many parallel fragments, large buffers.
    Speed,
    /// Single stream, unbounded retries.
    Stable,
    /// Fail-fast timeouts with inter-request sleeps for hostile networks.
    Harsh,
    /// Pick one of the above from network conditions and recent history.
    #[default]
    Auto,
}

impl DownloadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadMode::Speed => "speed",
            DownloadMode::Stable => "stable",
            DownloadMode::Harsh => "harsh",
            DownloadMode::Auto => "auto",
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" | "aggressive" => Ok(DownloadMode::Speed),
            "stable" | "conservative" => Ok(DownloadMode::Stable),
            "harsh" | "hostile" => Ok(DownloadMode::Harsh),
            "auto" | "automatic" => Ok(DownloadMode::Auto),
            other => Err(format!(
                "unknown mode '{other}' (expected speed, stable, harsh or auto)"
            )),
        }
    }
}

/// Retry budget handed to the downloader: a fixed count or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryCount {
    Finite(u32),
    Infinite,
}

impl fmt::Display for RetryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCount::Finite(n) => write!(f, "{n}"),
            RetryCount::Infinite => f.write_str("infinite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

/// Immutable bundle of execution parameters for one downloader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    mode: DownloadMode,
    label: &'static str,
    concurrent_fragments: u32,
    socket_timeout_secs: u32,
    retries: RetryCount,
    fragment_retries: RetryCount,
    sleep_interval_secs: u32,
    max_sleep_interval_secs: u32,
    buffer_size: &'static str,
    http_chunk_size: Option<&'static str>,
    force_ipv4: bool,
    resize_buffer: bool,
    skip_unavailable_fragments: bool,
    risk: RiskLevel,
}

/// Aggressive preset: many fragments, big buffers, bounded retries.
pub const SPEED: Strategy = Strategy {
    mode: DownloadMode::Speed,
    label: "speed",
    concurrent_fragments: 16,
    socket_timeout_secs: 30,
    retries: RetryCount::Finite(10),
    fragment_retries: RetryCount::Finite(10),
    sleep_interval_secs: 0,
    max_sleep_interval_secs: 0,
    buffer_size: "16M",
    http_chunk_size: Some("10M"),
    force_ipv4: false,
    resize_buffer: false,
    skip_unavailable_fragments: false,
    risk: RiskLevel::High,
};

/// Conservative preset: one fragment at a time, never gives up.
pub const STABLE: Strategy = Strategy {
    mode: DownloadMode::Stable,
    label: "stable",
    concurrent_fragments: 1,
    socket_timeout_secs: 10,
    retries: RetryCount::Infinite,
    fragment_retries: RetryCount::Infinite,
    sleep_interval_secs: 0,
    max_sleep_interval_secs: 0,
    buffer_size: "1M",
    http_chunk_size: None,
    force_ipv4: true,
    resize_buffer: true,
    skip_unavailable_fragments: true,
    risk: RiskLevel::Low,
};

/// Hostile-network preset: fail fast per connection, back off between requests.
pub const HARSH: Strategy = Strategy {
    mode: DownloadMode::Harsh,
    label: "harsh",
    concurrent_fragments: 1,
    socket_timeout_secs: 5,
    retries: RetryCount::Infinite,
    fragment_retries: RetryCount::Infinite,
    sleep_interval_secs: 2,
    max_sleep_interval_secs: 5,
    buffer_size: "512K",
    http_chunk_size: None,
    force_ipv4: true,
    resize_buffer: false,
    skip_unavailable_fragments: false,
    risk: RiskLevel::Low,
};

impl Strategy {
    /// Preset for an explicit mode. `Auto` has no preset of its own.
    pub fn for_mode(mode: DownloadMode) -> Option<&'static Strategy> {
        match mode {
            DownloadMode::Speed => Some(&SPEED),
            DownloadMode::Stable => Some(&STABLE),
            DownloadMode::Harsh => Some(&HARSH),
            DownloadMode::Auto => None,
        }
    }

    /// Next weaker preset: speed -> stable -> harsh -> none.
    pub fn fallback(&self) -> Option<&'static Strategy> {
        match self.mode {
            DownloadMode::Speed => Some(&STABLE),
            DownloadMode::Stable => Some(&HARSH),
            DownloadMode::Harsh | DownloadMode::Auto => None,
        }
    }

    /// Copy of this strategy with a different fragment count (at least 1).
    pub fn with_concurrent_fragments(&self, n: u32) -> Strategy {
        Strategy {
            concurrent_fragments: n.max(1),
            ..*self
        }
    }

    pub fn mode(&self) -> DownloadMode {
        self.mode
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn concurrent_fragments(&self) -> u32 {
        self.concurrent_fragments
    }

    pub fn socket_timeout_secs(&self) -> u32 {
        self.socket_timeout_secs
    }

    pub fn retries(&self) -> RetryCount {
        self.retries
    }

    pub fn fragment_retries(&self) -> RetryCount {
        self.fragment_retries
    }

    pub fn sleep_interval_secs(&self) -> u32 {
        self.sleep_interval_secs
    }

    pub fn buffer_size(&self) -> &'static str {
        self.buffer_size
    }

    pub fn force_ipv4(&self) -> bool {
        self.force_ipv4
    }

    pub fn risk(&self) -> RiskLevel {
        self.risk
    }

    /// Write this strategy's parameters into the job's option set.
    /// Replaces the whole network tuning block; nothing is read back from `options`.
    pub fn apply_to(&self, options: &mut JobOptions) {
        options.network = NetworkTuning {
            socket_timeout: Some(self.socket_timeout_secs),
            retries: Some(self.retries),
            fragment_retries: Some(self.fragment_retries),
            concurrent_fragments: (self.concurrent_fragments > 1).then_some(self.concurrent_fragments),
            sleep_interval: (self.sleep_interval_secs > 0).then_some(self.sleep_interval_secs),
            max_sleep_interval: (self.max_sleep_interval_secs > 0)
                .then_some(self.max_sleep_interval_secs),
            force_ipv4: self.force_ipv4,
            buffer_size: Some(self.buffer_size.to_string()),
            http_chunk_size: self.http_chunk_size.map(str::to_string),
            resize_buffer: self.resize_buffer,
            skip_unavailable_fragments: self.skip_unavailable_fragments,
        };
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (fragments={}, timeout={}s, retries={})",
            self.label, self.concurrent_fragments, self.socket_timeout_secs, self.retries
        )
    }
}

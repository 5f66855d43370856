//! Mode resolution: turn a requested [`DownloadMode`] into a concrete [`Strategy`].
//!
//! Explicit modes map straight to presets. `auto` consults the network probe, the
//! recent failure history (circuit breaker), and the number of running jobs.

mod history;

pub use history::DispatchHistory;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::DispatchConfig;
use crate::options::JobOptions;
use crate::probe::{NetworkProbe, NetworkStatus};
use crate::strategy::{DownloadMode, Strategy, HARSH, SPEED, STABLE};

/// Latency used for an unreachable network in threshold comparisons.
const UNREACHABLE_LATENCY_MS: f64 = 999.0;

/// Why a strategy was chosen (for logs and `mdm probe`).
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    SingleStreamOnly,
    Explicit(DownloadMode),
    ProbeFailed,
    Unreachable,
    PoorNetwork { latency_ms: f64, loss: f64 },
    CircuitBroken,
    Congested { running: usize },
    ExcellentNetwork,
    GoodNetwork,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::SingleStreamOnly => f.write_str("options need a single-stream pipeline"),
            Reason::Explicit(mode) => write!(f, "explicit mode {mode}"),
            Reason::ProbeFailed => f.write_str("network probe failed"),
            Reason::Unreachable => f.write_str("probe target unreachable"),
            Reason::PoorNetwork { latency_ms, loss } => {
                write!(f, "poor network (latency {latency_ms:.0}ms, loss {:.0}%)", loss * 100.0)
            }
            Reason::CircuitBroken => f.write_str("recent failure rate too high"),
            Reason::Congested { running } => write!(f, "{running} jobs already running"),
            Reason::ExcellentNetwork => f.write_str("excellent network"),
            Reason::GoodNetwork => f.write_str("good network"),
        }
    }
}

/// Outcome of a resolve call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub strategy: &'static Strategy,
    pub reason: Reason,
}

pub struct Dispatcher {
    config: DispatchConfig,
    probe: Arc<dyn NetworkProbe>,
    history: Mutex<DispatchHistory>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, probe: Arc<dyn NetworkProbe>) -> Self {
        let history = DispatchHistory::new(config.history_capacity, config.breaker_window());
        Self {
            config,
            probe,
            history: Mutex::new(history),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Strategy for a job. Blocking when `mode` is `auto` (runs the probe).
    pub fn resolve(&self, mode: DownloadMode, options: &JobOptions, running: usize) -> &'static Strategy {
        self.resolve_with_reason(mode, options, running).strategy
    }

    pub fn resolve_with_reason(
        &self,
        mode: DownloadMode,
        options: &JobOptions,
        running: usize,
    ) -> Resolution {
        let resolution = if options.requires_single_stream() {
            Resolution {
                strategy: &STABLE,
                reason: Reason::SingleStreamOnly,
            }
        } else if let Some(preset) = Strategy::for_mode(mode) {
            Resolution {
                strategy: preset,
                reason: Reason::Explicit(mode),
            }
        } else {
            match self.probe.probe() {
                Ok(status) => self.resolve_auto(&status, running),
                Err(e) => {
                    tracing::warn!("network probe failed, assuming hostile network: {}", e);
                    Resolution {
                        strategy: &HARSH,
                        reason: Reason::ProbeFailed,
                    }
                }
            }
        };
        tracing::info!(
            mode = %mode,
            strategy = resolution.strategy.label(),
            running,
            "resolved strategy: {}",
            resolution.reason
        );
        resolution
    }

    /// `auto` decision for a given measurement.
    pub fn resolve_auto(&self, status: &NetworkStatus, running: usize) -> Resolution {
        if !status.reachable {
            return Resolution {
                strategy: &HARSH,
                reason: Reason::Unreachable,
            };
        }
        let cfg = &self.config;
        let latency_ms = status.latency_ms().unwrap_or(UNREACHABLE_LATENCY_MS);
        let loss = status.loss;

        if latency_ms > cfg.latency_good_ms || loss > cfg.loss_good {
            return Resolution {
                strategy: &HARSH,
                reason: Reason::PoorNetwork { latency_ms, loss },
            };
        }
        if self.circuit_broken() {
            return Resolution {
                strategy: &STABLE,
                reason: Reason::CircuitBroken,
            };
        }
        if running > cfg.congestion_threshold {
            return Resolution {
                strategy: &STABLE,
                reason: Reason::Congested { running },
            };
        }
        if latency_ms <= cfg.latency_excellent_ms && loss <= cfg.loss_excellent {
            return Resolution {
                strategy: &SPEED,
                reason: Reason::ExcellentNetwork,
            };
        }
        Resolution {
            strategy: &STABLE,
            reason: Reason::GoodNetwork,
        }
    }

    /// Record one finished job's outcome.
    pub fn report_result(&self, success: bool) {
        self.history.lock().record(success);
    }

    pub fn circuit_broken(&self) -> bool {
        self.history.lock().is_tripped_at(
            Instant::now(),
            self.config.breaker_min_samples,
            self.config.breaker_failure_ratio,
        )
    }

    /// Next weaker strategy for a mid-flight downgrade after a runtime failure.
    pub fn runtime_fallback(&self, current: &Strategy) -> Option<&'static Strategy> {
        current.fallback()
    }

    pub fn invalidate_probe(&self) {
        self.probe.invalidate_cache();
    }
}

#[cfg(test)]
mod tests;

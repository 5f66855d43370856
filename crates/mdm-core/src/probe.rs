//! Lightweight network probe: a few short TCP connects to a reference host.
//!
//! Blocking by nature (uses `TcpStream::connect_timeout`); async callers run it on
//! `spawn_blocking`. Results are cached for a fixed TTL.

use parking_lot::Mutex;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::ProbeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid probe target '{0}'")]
    InvalidTarget(String),
}

/// Point-in-time network measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatus {
    /// Median connect time over successful attempts; None when nothing connected.
    pub latency: Option<Duration>,
    /// Failed attempts / total attempts.
    pub loss: f64,
    pub reachable: bool,
    pub captured_at: Instant,
}

impl NetworkStatus {
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.map(|d| d.as_secs_f64() * 1000.0)
    }
}

/// Source of network measurements for the dispatcher.
pub trait NetworkProbe: Send + Sync {
    /// Current status; may be served from cache.
    fn probe(&self) -> Result<NetworkStatus, ProbeError>;
    /// Force the next `probe()` to measure again.
    fn invalidate_cache(&self);
}

/// Median of the samples; the mean of the two middle values for even counts.
fn median(samples: &mut [Duration]) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    samples.sort();
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Some(samples[mid])
    } else {
        Some((samples[mid - 1] + samples[mid]) / 2)
    }
}

/// Open `attempts` independent connections to `host:port`, each bounded by `timeout`.
/// Resolution failures count as failed attempts.
pub fn probe_host(
    host: &str,
    port: u16,
    timeout: Duration,
    attempts: u32,
) -> Result<NetworkStatus, ProbeError> {
    if host.trim().is_empty() || port == 0 {
        return Err(ProbeError::InvalidTarget(format!("{host}:{port}")));
    }

    let addr: Option<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            tracing::debug!(host, "probe: resolve failed: {}", e);
            None
        }
    };

    let mut samples = Vec::with_capacity(attempts as usize);
    let mut failures = 0u32;
    for _ in 0..attempts {
        let Some(addr) = addr else {
            failures += 1;
            continue;
        };
        let started = Instant::now();
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                samples.push(started.elapsed());
                drop(stream);
            }
            Err(_) => failures += 1,
        }
    }

    let loss = if attempts == 0 {
        1.0
    } else {
        failures as f64 / attempts as f64
    };
    let status = NetworkStatus {
        latency: median(&mut samples),
        loss,
        reachable: !samples.is_empty(),
        captured_at: Instant::now(),
    };
    tracing::debug!(
        host,
        port,
        latency_ms = ?status.latency_ms(),
        loss = status.loss,
        reachable = status.reachable,
        "probe finished"
    );
    Ok(status)
}

/// TCP-connect probe with a TTL cache.
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
    attempts: u32,
    ttl: Duration,
    cached: Mutex<Option<NetworkStatus>>,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, attempts: u32, ttl: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            attempts,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self::new(
            cfg.host.clone(),
            cfg.port,
            cfg.timeout(),
            cfg.attempts,
            cfg.cache_ttl(),
        )
    }
}

impl NetworkProbe for TcpProbe {
    fn probe(&self) -> Result<NetworkStatus, ProbeError> {
        if let Some(status) = self.cached.lock().as_ref() {
            if status.captured_at.elapsed() < self.ttl {
                return Ok(status.clone());
            }
        }
        let status = probe_host(&self.host, self.port, self.timeout, self.attempts)?;
        *self.cached.lock() = Some(status.clone());
        Ok(status)
    }

    fn invalidate_cache(&self) {
        *self.cached.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn median_odd_and_even() {
        let ms = Duration::from_millis;
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [ms(30), ms(10), ms(20)]), Some(ms(20)));
        assert_eq!(median(&mut [ms(40), ms(10), ms(20), ms(30)]), Some(ms(25)));
    }

    #[test]
    fn local_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let status = probe_host("127.0.0.1", port, Duration::from_secs(1), 3).unwrap();
        assert!(status.reachable);
        assert_eq!(status.loss, 0.0);
        assert!(status.latency.is_some());
    }

    #[test]
    fn closed_port_is_unreachable() {
        let port = closed_port();
        let status = probe_host("127.0.0.1", port, Duration::from_millis(300), 2).unwrap();
        assert!(!status.reachable);
        assert_eq!(status.loss, 1.0);
        assert!(status.latency.is_none());
    }

    #[test]
    fn zero_attempts_counts_as_total_loss() {
        let status = probe_host("127.0.0.1", 9, Duration::from_millis(100), 0).unwrap();
        assert!(!status.reachable);
        assert_eq!(status.loss, 1.0);
    }

    #[test]
    fn empty_host_is_an_error() {
        assert!(probe_host("", 443, Duration::from_millis(100), 1).is_err());
    }

    #[test]
    fn cache_serves_until_invalidated() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(1), 1, Duration::from_secs(60));
        let first = probe.probe().unwrap();
        let second = probe.probe().unwrap();
        assert_eq!(first.captured_at, second.captured_at);

        probe.invalidate_cache();
        let third = probe.probe().unwrap();
        assert!(third.captured_at > first.captured_at);
    }
}

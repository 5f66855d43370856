use super::*;
use crate::options::AudioExtraction;
use crate::probe::ProbeError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Probe that returns a canned measurement and counts calls.
struct FixedProbe {
    status: Option<NetworkStatus>,
    calls: AtomicUsize,
}

impl FixedProbe {
    fn new(latency_ms: u64, loss: f64) -> Arc<Self> {
        Arc::new(Self {
            status: Some(NetworkStatus {
                latency: Some(Duration::from_millis(latency_ms)),
                loss,
                reachable: true,
                captured_at: Instant::now(),
            }),
            calls: AtomicUsize::new(0),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            status: Some(NetworkStatus {
                latency: None,
                loss: 1.0,
                reachable: false,
                captured_at: Instant::now(),
            }),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            status: None,
            calls: AtomicUsize::new(0),
        })
    }
}

impl NetworkProbe for FixedProbe {
    fn probe(&self) -> Result<NetworkStatus, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.status
            .clone()
            .ok_or_else(|| ProbeError::InvalidTarget("test".into()))
    }

    fn invalidate_cache(&self) {}
}

fn dispatcher(probe: Arc<FixedProbe>) -> Dispatcher {
    Dispatcher::new(DispatchConfig::default(), probe)
}

fn audio_only() -> JobOptions {
    JobOptions {
        extract_audio: Some(AudioExtraction {
            codec: "mp3".into(),
            quality_kbps: Some(192),
        }),
        ..Default::default()
    }
}

#[test]
fn auto_excellent_network_is_speed() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    for _ in 0..5 {
        assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 0), &SPEED);
    }
}

#[test]
fn auto_high_latency_is_harsh_regardless_of_history() {
    let d = dispatcher(FixedProbe::new(500, 0.0));
    assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 0), &HARSH);
    for _ in 0..10 {
        d.report_result(false);
    }
    assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 5), &HARSH);
}

#[test]
fn auto_lossy_network_is_harsh() {
    let d = dispatcher(FixedProbe::new(50, 1.0 / 3.0));
    assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 0), &HARSH);
}

#[test]
fn auto_good_but_not_excellent_is_stable() {
    let d = dispatcher(FixedProbe::new(250, 0.0));
    let r = d.resolve_with_reason(DownloadMode::Auto, &JobOptions::default(), 0);
    assert_eq!(r.strategy, &STABLE);
    assert_eq!(r.reason, Reason::GoodNetwork);
}

#[test]
fn unreachable_is_harsh() {
    let d = dispatcher(FixedProbe::unreachable());
    let r = d.resolve_with_reason(DownloadMode::Auto, &JobOptions::default(), 0);
    assert_eq!(r.strategy, &HARSH);
    assert_eq!(r.reason, Reason::Unreachable);
}

#[test]
fn probe_error_is_absorbed_as_harsh() {
    let d = dispatcher(FixedProbe::failing());
    let r = d.resolve_with_reason(DownloadMode::Auto, &JobOptions::default(), 0);
    assert_eq!(r.strategy, &HARSH);
    assert_eq!(r.reason, Reason::ProbeFailed);
}

#[test]
fn circuit_breaker_forces_stable() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    d.report_result(true);
    d.report_result(true);
    d.report_result(true);
    d.report_result(false);
    d.report_result(false);
    assert!(d.circuit_broken());
    let r = d.resolve_with_reason(DownloadMode::Auto, &JobOptions::default(), 0);
    assert_eq!(r.strategy, &STABLE);
    assert_eq!(r.reason, Reason::CircuitBroken);
}

#[test]
fn breaker_needs_minimum_samples() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    for _ in 0..4 {
        d.report_result(false);
    }
    assert!(!d.circuit_broken());
    assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 0), &SPEED);
}

#[test]
fn congestion_forces_stable() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    assert_eq!(d.resolve(DownloadMode::Auto, &JobOptions::default(), 2), &SPEED);
    let r = d.resolve_with_reason(DownloadMode::Auto, &JobOptions::default(), 3);
    assert_eq!(r.strategy, &STABLE);
    assert_eq!(r.reason, Reason::Congested { running: 3 });
}

#[test]
fn audio_only_forces_stable_even_for_speed() {
    let probe = FixedProbe::new(50, 0.0);
    let d = dispatcher(Arc::clone(&probe));
    assert_eq!(d.resolve(DownloadMode::Speed, &audio_only(), 0), &STABLE);
    assert_eq!(d.resolve(DownloadMode::Auto, &audio_only(), 0), &STABLE);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn premuxed_numeric_format_forces_stable() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    let opts = JobOptions {
        format: Some("18".into()),
        ..Default::default()
    };
    assert_eq!(d.resolve(DownloadMode::Speed, &opts, 0), &STABLE);
}

#[test]
fn explicit_modes_skip_the_probe() {
    let probe = FixedProbe::failing();
    let d = dispatcher(Arc::clone(&probe));
    let opts = JobOptions::default();
    assert_eq!(d.resolve(DownloadMode::Harsh, &opts, 0), &HARSH);
    assert_eq!(d.resolve(DownloadMode::Speed, &opts, 9), &SPEED);
    assert_eq!(d.resolve(DownloadMode::Stable, &opts, 0), &STABLE);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn runtime_fallback_follows_chain() {
    let d = dispatcher(FixedProbe::new(50, 0.0));
    assert_eq!(d.runtime_fallback(&SPEED), Some(&STABLE));
    assert_eq!(d.runtime_fallback(&STABLE), Some(&HARSH));
    assert_eq!(d.runtime_fallback(&HARSH), None);
    let tuned = SPEED.with_concurrent_fragments(4);
    assert_eq!(d.runtime_fallback(&tuned), Some(&STABLE));
}

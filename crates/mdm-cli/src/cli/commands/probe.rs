//! `mdm probe` – measure the network and show what automatic mode would pick.

use anyhow::{Context, Result};
use mdm_core::config::MdmConfig;
use mdm_core::dispatcher::{Dispatcher, Reason};
use mdm_core::probe::{NetworkProbe, TcpProbe};
use mdm_core::strategy::HARSH;
use std::sync::Arc;

pub async fn run_probe(cfg: &MdmConfig) -> Result<()> {
    let probe = Arc::new(TcpProbe::from_config(&cfg.probe));
    let dispatcher = Dispatcher::new(cfg.dispatch.clone(), probe.clone());
    println!("Probing {}:{} ({} attempts)...", cfg.probe.host, cfg.probe.port, cfg.probe.attempts);

    let measured = tokio::task::spawn_blocking(move || probe.probe())
        .await
        .context("probe task")?;
    match measured {
        Ok(status) => {
            let latency = status
                .latency_ms()
                .map(|ms| format!("{ms:.0} ms"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "Latency: {latency}  Loss: {:.0}%  Reachable: {}",
                status.loss * 100.0,
                if status.reachable { "yes" } else { "no" }
            );
            let resolution = dispatcher.resolve_auto(&status, 0);
            println!("Strategy: {} ({})", resolution.strategy, resolution.reason);
        }
        Err(e) => {
            println!("Probe failed: {e}");
            println!("Strategy: {} ({})", HARSH, Reason::ProbeFailed);
        }
    }
    Ok(())
}

//! Vigil server binary.

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use vigil_healthcheck::monitor::CheckMonitor;
use vigil_healthcheck::topology::SharedTopology;
use vigil_server::{Config, Notifier, StatusServer};

/// Buffer for in-flight alerts; monitors drop alerts rather than block.
const ALERT_CHANNEL_SIZE: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    let level = config.logging.level.as_deref().unwrap_or("info");
    match config.logging.format.as_deref() {
        Some("json") => vigil_common::logging::init_json(level),
        _ => vigil_common::logging::init_with_level(level),
    }

    info!("Vigil server starting");
    config.log_summary();

    let topology = SharedTopology::new(config.topology());
    let (alerts_tx, alerts_rx) = mpsc::channel(ALERT_CHANNEL_SIZE);
    tokio::spawn(Notifier::new(alerts_rx).run());

    let mut handles = Vec::new();
    for plan in config.monitor_plans() {
        let checker = plan
            .build_checker()
            .with_context(|| format!("building checker for {}", plan.label))?;
        let (monitor, handle) = CheckMonitor::new(
            checker,
            plan.monitor.clone(),
            plan.key,
            plan.label.clone(),
            topology.clone(),
            alerts_tx.clone(),
        );
        if !plan.enabled {
            handle.set_enabled(false);
        }
        handles.push(handle);
        tokio::spawn(monitor.run());
    }

    let server = StatusServer::bind(config.status.listen_addr(), topology.clone())
        .await
        .context("binding status listener")?;

    tokio::select! {
        result = server.run() => {
            result.context("status server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            for handle in &handles {
                handle.shutdown();
            }
        }
    }

    info!("Vigil server stopped");
    Ok(())
}

//! Alert notifier: consumes liveness alerts from the check monitors.

use tokio::sync::mpsc;
use tracing::{info, warn};
use vigil_healthcheck::types::{AlertEvent, ServerState};

/// Reports liveness transitions.
///
/// Delivery is best-effort: monitors push events with `try_send` and never
/// block on alerting. The monitors only emit an event when a transition
/// actually happened, so repeated failures of a dead backend produce no
/// alert storm here.
pub struct Notifier {
    alerts_rx: mpsc::Receiver<AlertEvent>,
}

impl Notifier {
    pub fn new(alerts_rx: mpsc::Receiver<AlertEvent>) -> Self {
        Self { alerts_rx }
    }

    /// Run until every alert sender is gone.
    pub async fn run(mut self) {
        info!("notifier task started");
        while let Some(event) = self.alerts_rx.recv().await {
            match event.current {
                ServerState::Up => info!(
                    server = %event.server,
                    reason = %event.reason,
                    "server transitioned UP"
                ),
                ServerState::Down => warn!(
                    server = %event.server,
                    previous = %event.previous,
                    reason = %event.reason,
                    "server transitioned DOWN"
                ),
            }
        }
        info!("notifier task stopped");
    }
}

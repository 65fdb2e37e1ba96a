//! Monitor loop: scheduling, retry policy and liveness transitions for one
//! checked backend.

use crate::checkers::Checker;
use crate::topology::{LivenessTransition, ServerKey, SharedTopology};
use crate::types::{AlertEvent, CheckFailure, MonitorConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cursor and retry counter for one active checker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckState {
    /// Index of the target checked on the next invocation.
    pub target_idx: usize,
    /// Failures so far against the current target.
    pub retry_count: u32,
}

/// What the failure epilog decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Backend already down: no retries, wait the regular interval.
    AlreadyDown,
    /// Retry the same target after the retry delay.
    Retry,
    /// Retries exhausted: mark the backend down, wait the regular interval.
    Exhausted,
}

impl CheckState {
    /// Apply a passed target.
    ///
    /// Advances the cursor and resets the retry counter; returns true when
    /// the cursor wrapped, i.e. every target of this cycle has now passed.
    pub fn on_target_passed(&mut self, target_count: usize) -> bool {
        self.target_idx += 1;
        self.retry_count = 0;
        if self.target_idx >= target_count {
            self.target_idx = 0;
            true
        } else {
            false
        }
    }

    /// Apply a failed target under the retry policy.
    ///
    /// A backend already known dead is never retried. The cursor is left in
    /// place so the next cycle resumes at the failing target.
    pub fn on_target_failed(&mut self, alive: bool, max_retries: u32) -> FailureDisposition {
        if !alive {
            self.retry_count = 0;
            return FailureDisposition::AlreadyDown;
        }
        if self.retry_count < max_retries {
            self.retry_count += 1;
            FailureDisposition::Retry
        } else {
            self.retry_count = 0;
            FailureDisposition::Exhausted
        }
    }
}

/// Administrative handle to a running monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    /// Enable or disable the checker. A disabled checker keeps its schedule
    /// but performs no I/O.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop the monitor task at its next wakeup.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Drives one checker against one real server forever.
pub struct CheckMonitor {
    checker: Arc<dyn Checker>,
    config: MonitorConfig,
    server: ServerKey,
    label: String,
    topology: SharedTopology,
    alerts: mpsc::Sender<AlertEvent>,
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: CheckState,
}

impl CheckMonitor {
    pub fn new(
        checker: Arc<dyn Checker>,
        config: MonitorConfig,
        server: ServerKey,
        label: String,
        topology: SharedTopology,
        alerts: mpsc::Sender<AlertEvent>,
    ) -> (Self, MonitorHandle) {
        let enabled = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let handle = MonitorHandle {
            enabled: enabled.clone(),
            cancel: cancel.clone(),
        };
        let monitor = Self {
            checker,
            config,
            server,
            label,
            topology,
            alerts,
            enabled,
            cancel,
            state: CheckState::default(),
        };
        (monitor, handle)
    }

    /// Run until cancelled. The first check fires one full interval after
    /// startup.
    pub async fn run(mut self) {
        let mut delay = self.config.interval;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(server = %self.label, "check monitor stopping");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Disabled checkers reschedule without touching the network.
            if !self.enabled.load(Ordering::Relaxed) {
                delay = self.config.interval;
                continue;
            }

            delay = self.run_once().await;
        }
    }

    /// One scheduler invocation: probe the current target and apply the
    /// epilog. Returns the delay until the next invocation.
    async fn run_once(&mut self) -> Duration {
        let index = self.state.target_idx;
        match self.checker.check_target(index).await {
            Ok(()) => self.on_success(index).await,
            Err(failure) => self.on_failure(index, failure).await,
        }
    }

    async fn on_success(&mut self, index: usize) -> Duration {
        if !self.topology.is_alive(self.server).await {
            info!(
                server = %self.label,
                target = index + 1,
                kind = self.checker.kind(),
                "target check succeeded"
            );
        }

        if self.state.on_target_passed(self.checker.target_count()) {
            // Full cycle complete.
            if let Some(transition) = self.topology.set_alive(self.server, true).await {
                info!(server = %self.label, "remote server succeeded on service");
                self.notify(transition, "check succeeded on service".to_string());
            }
        }
        self.config.interval
    }

    async fn on_failure(&mut self, index: usize, failure: CheckFailure) -> Duration {
        let alive = self.topology.is_alive(self.server).await;
        match self.state.on_target_failed(alive, self.config.max_retries) {
            FailureDisposition::AlreadyDown => {
                debug!(
                    server = %self.label,
                    target = index + 1,
                    error = %failure,
                    "check failed on server already down"
                );
                self.config.interval
            }
            FailureDisposition::Retry => {
                info!(
                    server = %self.label,
                    target = index + 1,
                    retry = self.state.retry_count,
                    error = %failure,
                    "check failed, scheduling retry"
                );
                self.config.retry_delay
            }
            FailureDisposition::Exhausted => {
                if self.config.max_retries > 0 {
                    info!(
                        server = %self.label,
                        tries = self.config.max_retries + 1,
                        "check failed after retries exhausted"
                    );
                }
                if let Some(transition) = self.topology.set_alive(self.server, false).await {
                    self.notify(transition, format!("check failed on service: {failure}"));
                }
                self.config.interval
            }
        }
    }

    /// Best effort: alerting must never stall the check path.
    fn notify(&self, transition: LivenessTransition, reason: String) {
        let event = AlertEvent {
            server: self.label.clone(),
            previous: transition.previous,
            current: transition.current,
            reason,
        };
        if let Err(e) = self.alerts.try_send(event) {
            warn!(server = %self.label, error = %e, "dropping alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{RealServer, Topology, VirtualServer};
    use crate::types::ServerState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backend_goes_down_after_exactly_max_retries_plus_one() {
        let max_retries = 3;
        let mut state = CheckState::default();

        // First failure plus three retries are tolerated.
        for attempt in 0..=max_retries {
            let disposition = state.on_target_failed(true, max_retries);
            if attempt < max_retries {
                assert_eq!(disposition, FailureDisposition::Retry, "attempt {attempt}");
            } else {
                assert_eq!(disposition, FailureDisposition::Exhausted);
            }
        }
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn down_backend_never_accumulates_retries() {
        let mut state = CheckState::default();
        state.retry_count = 2;

        assert_eq!(
            state.on_target_failed(false, 5),
            FailureDisposition::AlreadyDown
        );
        assert_eq!(state.retry_count, 0);

        // Still no retries on repeated failures while down.
        assert_eq!(
            state.on_target_failed(false, 5),
            FailureDisposition::AlreadyDown
        );
    }

    #[test]
    fn zero_retries_exhausts_immediately() {
        let mut state = CheckState::default();
        assert_eq!(state.on_target_failed(true, 0), FailureDisposition::Exhausted);
    }

    #[test]
    fn cursor_wraps_when_cycle_completes() {
        let mut state = CheckState::default();
        state.retry_count = 1;

        assert!(!state.on_target_passed(3));
        assert_eq!(state.target_idx, 1);
        assert_eq!(state.retry_count, 0);

        assert!(!state.on_target_passed(3));
        assert!(state.on_target_passed(3));
        assert_eq!(state.target_idx, 0);
    }

    #[test]
    fn failure_keeps_cursor_in_place() {
        let mut state = CheckState { target_idx: 2, retry_count: 0 };
        state.on_target_failed(true, 1);
        assert_eq!(state.target_idx, 2);
    }

    /// Checker stub that fails every probe.
    struct AlwaysFailing {
        probes: AtomicU32,
    }

    #[async_trait]
    impl Checker for AlwaysFailing {
        fn kind(&self) -> &'static str {
            "stub"
        }

        fn target_count(&self) -> usize {
            1
        }

        async fn check_target(&self, _index: usize) -> Result<(), CheckFailure> {
            self.probes.fetch_add(1, Ordering::Relaxed);
            Err(CheckFailure::EmptyResponse)
        }
    }

    fn one_server_topology() -> SharedTopology {
        SharedTopology::new(Topology {
            virtual_servers: vec![VirtualServer::new(
                "10.0.0.1".parse().unwrap(),
                80,
                1,
                vec![RealServer {
                    address: "127.0.0.1".parse().unwrap(),
                    port: 80,
                    alive: true,
                }],
            )],
        })
    }

    #[tokio::test]
    async fn failing_monitor_emits_one_down_alert() {
        let topology = one_server_topology();
        let key = ServerKey { vs: 0, rs: 0 };
        let checker = Arc::new(AlwaysFailing {
            probes: AtomicU32::new(0),
        });
        let (alerts_tx, mut alerts_rx) = mpsc::channel(8);

        let config = MonitorConfig {
            interval: Duration::from_millis(150),
            max_retries: 1,
            retry_delay: Duration::from_millis(5),
        };
        let (monitor, handle) = CheckMonitor::new(
            checker.clone(),
            config,
            key,
            "127.0.0.1:80".to_string(),
            topology.clone(),
            alerts_tx,
        );
        tokio::spawn(monitor.run());

        let alert = tokio::time::timeout(Duration::from_secs(2), alerts_rx.recv())
            .await
            .expect("timed out waiting for down alert")
            .expect("alert channel closed");
        assert_eq!(alert.current, ServerState::Down);
        assert_eq!(alert.previous, ServerState::Up);
        // max_retries = 1: first failure plus one retry.
        assert_eq!(checker.probes.load(Ordering::Relaxed), 2);
        assert!(!topology.is_alive(key).await);

        // Further failures while down: no retries, no more alerts.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(alerts_rx.try_recv().is_err());

        handle.shutdown();
    }

    #[tokio::test]
    async fn disabled_monitor_performs_no_probes() {
        let topology = one_server_topology();
        let checker = Arc::new(AlwaysFailing {
            probes: AtomicU32::new(0),
        });
        let (alerts_tx, _alerts_rx) = mpsc::channel(8);

        let config = MonitorConfig {
            interval: Duration::from_millis(10),
            max_retries: 0,
            retry_delay: Duration::from_millis(5),
        };
        let (monitor, handle) = CheckMonitor::new(
            checker.clone(),
            config,
            ServerKey { vs: 0, rs: 0 },
            "127.0.0.1:80".to_string(),
            topology,
            alerts_tx,
        );
        handle.set_enabled(false);
        tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(checker.probes.load(Ordering::Relaxed), 0);

        handle.shutdown();
    }
}

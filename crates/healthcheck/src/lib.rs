//! Active health checking for the Vigil load-balancer control plane.
//!
//! Each configured real server is driven by a [`monitor::CheckMonitor`]
//! task that probes the backend, applies the retry/failover policy and
//! records liveness transitions in the shared
//! [`topology::SharedTopology`]. Probes are performed by
//! [`checkers::Checker`] implementations:
//!
//! - [`checkers::HttpChecker`] — HTTP or HTTPS GET against a list of URLs,
//!   validating status codes and/or MD5 body digests;
//! - [`checkers::TcpChecker`] — plain TCP connect.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use vigil_healthcheck::checkers::HttpChecker;
//! use vigil_healthcheck::monitor::CheckMonitor;
//! use vigil_healthcheck::topology::{ServerKey, SharedTopology, Topology};
//! use vigil_healthcheck::types::{CheckTarget, ConnectOptions, MonitorConfig, Protocol};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = ConnectOptions {
//!     address: "192.0.2.10:80".parse()?,
//!     timeout: Duration::from_secs(3),
//!     virtualhost: None,
//! };
//! let checker = Arc::new(HttpChecker::new(
//!     Protocol::Http,
//!     vec![CheckTarget::with_status("/healthz", 200)],
//!     conn,
//! )?);
//!
//! let topology = SharedTopology::new(Topology::default());
//! let (alerts_tx, _alerts_rx) = mpsc::channel(128);
//! let (monitor, handle) = CheckMonitor::new(
//!     checker,
//!     MonitorConfig::default(),
//!     ServerKey { vs: 0, rs: 0 },
//!     "192.0.2.10:80".to_string(),
//!     topology,
//!     alerts_tx,
//! );
//! tokio::spawn(monitor.run());
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod monitor;
pub mod response;
pub mod tls;
pub mod topology;
pub mod types;

pub use checkers::{Checker, HttpChecker, TcpChecker};
pub use monitor::{CheckMonitor, CheckState, MonitorHandle};
pub use topology::{ServerKey, SharedTopology, Topology};
pub use types::{
    AlertEvent, CheckFailure, CheckTarget, ConnectOptions, MonitorConfig, Protocol, ServerState,
};

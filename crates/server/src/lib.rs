//! Vigil server daemon.
//!
//! Loads the checked topology from YAML configuration, runs one
//! [`vigil_healthcheck::monitor::CheckMonitor`] task per real server, and
//! exposes the live topology over a small TCP status protocol:
//!
//! - a client sends a 3-byte command;
//! - `sta` returns the topology as JSON, `sya` as YAML;
//! - anything else is logged and produces no response;
//! - responses are framed by connection lifetime.
//!
//! # Components
//!
//! - **Config**: YAML configuration with validation and default search paths
//! - **StatusServer**: accept loop plus one task per status client
//! - **Snapshot**: topology rendering into a growable output buffer
//! - **Notifier**: consumes liveness alerts from the check monitors

pub mod config;
pub mod notifier;
pub mod peer;
pub mod server;
pub mod snapshot;

pub use config::{Config, ConfigError, DEFAULT_STATUS_PORT, MonitorPlan};
pub use notifier::Notifier;
pub use server::StatusServer;
pub use snapshot::{SnapshotBuffer, SnapshotError, SnapshotFormat};

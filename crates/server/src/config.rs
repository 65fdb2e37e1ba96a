//! Configuration loading and validation for the Vigil server.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError, ValidationErrors};
use vigil_healthcheck::checkers::{Checker, HttpChecker, TcpChecker};
use vigil_healthcheck::topology::{RealServer, ServerKey, Topology, VirtualServer};
use vigil_healthcheck::types::{CheckTarget, ConnectOptions, MonitorConfig, Protocol};

/// Compiled-in fallback for the status listener port.
pub const DEFAULT_STATUS_PORT: u16 = 5999;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub status: StatusSettings,

    #[serde(default)]
    pub defaults: CheckDefaults,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub virtual_servers: Vec<VirtualServerSettings>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.status.validate()?;
        self.defaults.validate()?;

        let mut errors = ValidationErrors::new();
        for vs in &self.virtual_servers {
            if vs.quorum < 1 {
                errors.add("virtual_servers", ValidationError::new("quorum_below_one"));
            }
            if vs.real_servers.is_empty() {
                errors.add("virtual_servers", ValidationError::new("no_real_servers"));
            }
            for rs in &vs.real_servers {
                if let Err(e) = validate_check(&rs.check) {
                    errors.add("real_servers", e);
                }
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Status listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StatusSettings {
    /// Bind address for the status listener.
    pub bind: IpAddr,

    #[validate(range(min = 1))]
    pub port: u16,
}

impl StatusSettings {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Check timing defaults, overridable per real server
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckDefaults {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_check_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_io_timeout")]
    pub timeout: Duration,

    #[validate(range(max = 32))]
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// One configured virtual server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualServerSettings {
    pub address: IpAddr,
    pub port: u16,

    #[serde(default = "default_quorum")]
    pub quorum: u32,

    #[serde(default)]
    pub real_servers: Vec<RealServerSettings>,
}

/// One configured real server and its check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealServerSettings {
    pub address: IpAddr,
    pub port: u16,

    #[serde(default)]
    pub check: CheckSettings,
}

/// Kind of check run against a real server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    #[default]
    Tcp,
    Http,
    Ssl,
}

/// Per-server check settings; timing fields fall back to [`CheckDefaults`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSettings {
    #[serde(default)]
    pub kind: CheckKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub virtualhost: Option<String>,

    #[serde(default, with = "humantime_serde::option")]
    pub interval: Option<Duration>,

    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default, with = "humantime_serde::option")]
    pub retry_delay: Option<Duration>,

    #[serde(default)]
    pub targets: Vec<TargetSettings>,
}

/// One checked URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    pub path: String,

    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub status_code: Option<u16>,
}

// Default implementations

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_STATUS_PORT,
        }
    }
}

impl Default for CheckDefaults {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: None,
            format: None,
        }
    }
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            kind: CheckKind::Tcp,
            enabled: true,
            virtualhost: None,
            interval: None,
            timeout: None,
            max_retries: None,
            retry_delay: None,
            targets: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status: StatusSettings::default(),
            defaults: CheckDefaults::default(),
            logging: LoggingSettings::default(),
            virtual_servers: Vec::new(),
        }
    }
}

fn default_quorum() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

// Custom validators

fn validate_check_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if millis < 100 || millis > 3_600_000 {
        return Err(ValidationError::new("check_interval_out_of_range"));
    }
    Ok(())
}

fn validate_io_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 10 || millis > 60_000 {
        return Err(ValidationError::new("io_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_check(check: &CheckSettings) -> Result<(), ValidationError> {
    match check.kind {
        CheckKind::Tcp => Ok(()),
        CheckKind::Http | CheckKind::Ssl => {
            if check.targets.is_empty() {
                return Err(ValidationError::new("no_targets"));
            }
            for target in &check.targets {
                if target.path.is_empty() || !target.path.starts_with('/') {
                    return Err(ValidationError::new("invalid_target_path"));
                }
                if let Some(digest) = &target.digest {
                    validate_digest(digest)?;
                }
                if let Some(code) = target.status_code {
                    if !(100..=599).contains(&code) {
                        return Err(ValidationError::new("status_code_out_of_range"));
                    }
                }
            }
            Ok(())
        }
    }
}

fn validate_digest(digest: &str) -> Result<(), ValidationError> {
    let well_formed = digest.len() == 32
        && digest
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("digest_not_lowercase_md5_hex"))
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/vigil/vigil.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./vigil.yaml"));

        paths
            .into_iter()
            .find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/vigil/vigil.yaml"))
    }

    /// Build the initial topology.
    ///
    /// Real servers start alive; failed checks take them down.
    pub fn topology(&self) -> Topology {
        let virtual_servers = self
            .virtual_servers
            .iter()
            .map(|vs| {
                let real_servers = vs
                    .real_servers
                    .iter()
                    .map(|rs| RealServer {
                        address: rs.address,
                        port: rs.port,
                        alive: true,
                    })
                    .collect();
                VirtualServer::new(vs.address, vs.port, vs.quorum, real_servers)
            })
            .collect();
        Topology { virtual_servers }
    }

    /// One monitor plan per configured real server.
    pub fn monitor_plans(&self) -> Vec<MonitorPlan> {
        let mut plans = Vec::new();
        for (vs_idx, vs) in self.virtual_servers.iter().enumerate() {
            for (rs_idx, rs) in vs.real_servers.iter().enumerate() {
                let check = &rs.check;
                let address = SocketAddr::new(rs.address, rs.port);
                plans.push(MonitorPlan {
                    key: ServerKey {
                        vs: vs_idx,
                        rs: rs_idx,
                    },
                    label: address.to_string(),
                    kind: check.kind,
                    enabled: check.enabled,
                    targets: check
                        .targets
                        .iter()
                        .map(|t| CheckTarget {
                            path: t.path.clone(),
                            digest: t.digest.clone(),
                            status_code: t.status_code,
                        })
                        .collect(),
                    conn: ConnectOptions {
                        address,
                        timeout: check.timeout.unwrap_or(self.defaults.timeout),
                        virtualhost: check.virtualhost.clone(),
                    },
                    monitor: MonitorConfig {
                        interval: check.interval.unwrap_or(self.defaults.interval),
                        max_retries: check.max_retries.unwrap_or(self.defaults.max_retries),
                        retry_delay: check.retry_delay.unwrap_or(self.defaults.retry_delay),
                    },
                });
            }
        }
        plans
    }

    /// Log the loaded check topology.
    pub fn log_summary(&self) {
        info!(
            virtual_servers = self.virtual_servers.len(),
            status_port = self.status.port,
            "configuration loaded"
        );
        for plan in self.monitor_plans() {
            info!(
                server = %plan.label,
                kind = ?plan.kind,
                enabled = plan.enabled,
                targets = plan.targets.len(),
                interval = ?plan.monitor.interval,
                max_retries = plan.monitor.max_retries,
                "configured check"
            );
        }
    }
}

/// Materialized plan for one real server's monitor.
#[derive(Debug, Clone)]
pub struct MonitorPlan {
    pub key: ServerKey,
    pub label: String,
    pub kind: CheckKind,
    pub enabled: bool,
    pub targets: Vec<CheckTarget>,
    pub conn: ConnectOptions,
    pub monitor: MonitorConfig,
}

impl MonitorPlan {
    /// Construct the checker implementation for this plan.
    pub fn build_checker(&self) -> vigil_common::Result<Arc<dyn Checker>> {
        match self.kind {
            CheckKind::Tcp => Ok(Arc::new(TcpChecker::new(self.conn.clone()))),
            CheckKind::Http => self.build_http(Protocol::Http),
            CheckKind::Ssl => self.build_http(Protocol::Ssl),
        }
    }

    fn build_http(&self, protocol: Protocol) -> vigil_common::Result<Arc<dyn Checker>> {
        HttpChecker::new(protocol, self.targets.clone(), self.conn.clone())
            .map(|checker| Arc::new(checker) as Arc<dyn Checker>)
            .map_err(vigil_common::Error::healthcheck)
    }
}

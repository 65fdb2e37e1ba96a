//! Topology snapshot rendering into a growable output buffer.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::io;
use thiserror::Error;
use vigil_healthcheck::topology::{QuorumState, Topology};

/// Buffer growth increment.
pub const GROWTH_INCREMENT: usize = 4096;

/// Snapshot wire formats selectable over the status protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Structured-data format.
    Json,
    /// Human-readable indented format.
    Yaml,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The topology holds no virtual servers; there is nothing to render.
    #[error("no data")]
    NoData,

    #[error("render failed: {0}")]
    Render(String),
}

/// Append-only output buffer growing in fixed-size increments.
///
/// Capacity is raised before any write that could exceed it, so previously
/// written bytes are never lost or overwritten.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    buf: BytesMut,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(GROWTH_INCREMENT),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Grow capacity in [`GROWTH_INCREMENT`] steps until `additional` more
    /// bytes fit.
    fn ensure(&mut self, additional: usize) {
        let spare = self.buf.capacity() - self.buf.len();
        if spare < additional {
            let shortfall = additional - spare;
            let increments = shortfall.div_ceil(GROWTH_INCREMENT);
            self.buf.reserve(increments * GROWTH_INCREMENT);
        }
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        self.ensure(data.len());
        self.buf.extend_from_slice(data);
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for SnapshotBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One real server as rendered to status clients.
#[derive(Debug, Serialize)]
pub struct RealServerSnapshot {
    pub address: String,
    pub port: u16,
    pub alive: bool,
}

/// One virtual server as rendered to status clients.
#[derive(Debug, Serialize)]
pub struct VirtualServerSnapshot {
    pub address: String,
    pub port: u16,
    pub quorum_state: QuorumState,
    pub quorum_up: bool,
    pub quorum: u32,
    pub real_servers: Vec<RealServerSnapshot>,
}

/// Root of the rendered document.
#[derive(Debug, Serialize)]
pub struct TopologySnapshot {
    pub virtual_servers: Vec<VirtualServerSnapshot>,
}

impl From<&Topology> for TopologySnapshot {
    fn from(topology: &Topology) -> Self {
        let virtual_servers = topology
            .virtual_servers
            .iter()
            .map(|vs| VirtualServerSnapshot {
                address: vs.address.to_string(),
                port: vs.port,
                quorum_state: vs.quorum_state,
                quorum_up: vs.quorum_up(),
                quorum: vs.quorum,
                real_servers: vs
                    .real_servers
                    .iter()
                    .map(|rs| RealServerSnapshot {
                        address: rs.address.to_string(),
                        port: rs.port,
                        alive: rs.alive,
                    })
                    .collect(),
            })
            .collect();
        Self { virtual_servers }
    }
}

/// Render `topology` in `format`.
///
/// An empty topology is an explicit no-data outcome, never an empty or
/// malformed document. A render failure leaves the topology untouched and
/// aborts only this snapshot.
pub fn render(topology: &Topology, format: SnapshotFormat) -> Result<Bytes, SnapshotError> {
    if topology.virtual_servers.is_empty() {
        return Err(SnapshotError::NoData);
    }

    let snapshot = TopologySnapshot::from(topology);
    let mut buf = SnapshotBuffer::new();
    match format {
        SnapshotFormat::Json => serde_json::to_writer(&mut buf, &snapshot)
            .map_err(|e| SnapshotError::Render(e.to_string()))?,
        SnapshotFormat::Yaml => serde_yaml::to_writer(&mut buf, &snapshot)
            .map_err(|e| SnapshotError::Render(e.to_string()))?,
    }
    Ok(buf.freeze())
}

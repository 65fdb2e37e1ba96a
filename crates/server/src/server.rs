//! Status-protocol TCP server.
//!
//! Accepts an unbounded set of clients and serves topology snapshots on
//! demand. Each connection is owned by its own task and tracked in a
//! concurrent map keyed by a monotonically increasing connection id, so the
//! state of a closed connection can never bleed into a new one.

use crate::peer::{PeerProtocol, Request};
use crate::snapshot::{self, SnapshotError};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use vigil_healthcheck::topology::SharedTopology;

/// Read buffer for peer commands.
const RECV_BUFFER_LENGTH: usize = 1024;

/// Entry tracked for every connected status client.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub remote: SocketAddr,
}

/// Serves topology snapshots over the status protocol.
pub struct StatusServer {
    listener: TcpListener,
    topology: SharedTopology,
    peers: Arc<DashMap<u64, PeerInfo>>,
    next_peer: AtomicU64,
}

impl StatusServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, topology: SharedTopology) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "status server listening");
        Ok(Self {
            listener,
            topology,
            peers: Arc::new(DashMap::new()),
            next_peer: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of currently connected status clients.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Accept loop.
    ///
    /// An accept error is fatal: it means the listening socket itself is
    /// broken. Per-peer errors only close that peer.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, remote) = self.listener.accept().await?;
            let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
            self.peers.insert(id, PeerInfo { remote });
            debug!(id, %remote, peers = self.peers.len(), "status client connected");

            let topology = self.topology.clone();
            let peers = self.peers.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_peer(stream, &topology).await {
                    debug!(id, %remote, error = %e, "status client error");
                }
                if let Some((_, info)) = peers.remove(&id) {
                    debug!(id, remote = %info.remote, "status client disconnected");
                }
            });
        }
    }
}

/// Drive one peer through the command/response protocol until it
/// disconnects. The send buffer is owned here and dropped with the task.
async fn handle_peer(mut stream: TcpStream, topology: &SharedTopology) -> std::io::Result<()> {
    let mut protocol = PeerProtocol::new();
    let mut buf = [0u8; RECV_BUFFER_LENGTH];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            // Peer disconnected.
            return Ok(());
        }

        match protocol.on_data(&buf[..n]) {
            Some(Request::Snapshot(format)) => {
                let snap = topology.snapshot().await;
                match snapshot::render(&snap, format) {
                    Ok(body) => stream.write_all(&body).await?,
                    Err(SnapshotError::NoData) => {
                        debug!("status request against empty topology");
                    }
                    Err(e) => {
                        warn!(error = %e, "snapshot render failed");
                    }
                }
            }
            Some(Request::Unknown(cmd)) => {
                warn!(cmd = %String::from_utf8_lossy(&cmd), "unknown status command");
            }
            None => {}
        }
    }
}

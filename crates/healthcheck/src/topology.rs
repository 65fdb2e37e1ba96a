//! Virtual-server / real-server topology shared between the check engine
//! and the status server.

use crate::types::ServerState;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Quorum state of a virtual server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumState {
    /// Enough live real servers to serve traffic.
    Alive,
    /// Below quorum.
    Down,
}

/// A concrete backend instance being health-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealServer {
    pub address: IpAddr,
    pub port: u16,
    pub alive: bool,
}

/// A logical service grouping real servers behind a shared address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualServer {
    pub address: IpAddr,
    pub port: u16,

    /// Minimum number of live real servers required to serve.
    pub quorum: u32,

    pub quorum_state: QuorumState,
    pub real_servers: Vec<RealServer>,
}

impl VirtualServer {
    pub fn new(address: IpAddr, port: u16, quorum: u32, real_servers: Vec<RealServer>) -> Self {
        let mut vs = Self {
            address,
            port,
            quorum,
            quorum_state: QuorumState::Down,
            real_servers,
        };
        vs.refresh_quorum();
        vs
    }

    /// Number of live real servers.
    pub fn alive_count(&self) -> u32 {
        self.real_servers.iter().filter(|rs| rs.alive).count() as u32
    }

    pub fn quorum_up(&self) -> bool {
        self.quorum_state == QuorumState::Alive
    }

    fn refresh_quorum(&mut self) {
        self.quorum_state = if self.alive_count() >= self.quorum {
            QuorumState::Alive
        } else {
            QuorumState::Down
        };
    }
}

/// Index of one real server within the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerKey {
    pub vs: usize,
    pub rs: usize,
}

/// A liveness transition that actually changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessTransition {
    pub previous: ServerState,
    pub current: ServerState,
}

/// The full checked topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub virtual_servers: Vec<VirtualServer>,
}

impl Topology {
    pub fn server(&self, key: ServerKey) -> Option<&RealServer> {
        self.virtual_servers
            .get(key.vs)
            .and_then(|vs| vs.real_servers.get(key.rs))
    }

    /// Whether the real server at `key` is currently live. Unknown keys
    /// report dead.
    pub fn is_alive(&self, key: ServerKey) -> bool {
        self.server(key).map(|rs| rs.alive).unwrap_or(false)
    }

    /// Set the liveness of one real server and refresh its virtual server's
    /// quorum.
    ///
    /// Idempotent: returns `None` when the server is already in the
    /// requested state, so a transition happens at most once per terminal
    /// evaluation.
    pub fn set_alive(&mut self, key: ServerKey, alive: bool) -> Option<LivenessTransition> {
        let vs = self.virtual_servers.get_mut(key.vs)?;
        let rs = vs.real_servers.get_mut(key.rs)?;
        if rs.alive == alive {
            return None;
        }
        rs.alive = alive;
        vs.refresh_quorum();
        let (previous, current) = if alive {
            (ServerState::Down, ServerState::Up)
        } else {
            (ServerState::Up, ServerState::Down)
        };
        Some(LivenessTransition { previous, current })
    }
}

/// Topology handle shared between the checker tasks and the status server.
///
/// Checkers take short write locks for liveness transitions; the status
/// server clones an atomic snapshot under a read lock, so it never observes
/// a partially-updated record.
#[derive(Debug, Clone, Default)]
pub struct SharedTopology {
    inner: Arc<RwLock<Topology>>,
}

impl SharedTopology {
    pub fn new(topology: Topology) -> Self {
        Self {
            inner: Arc::new(RwLock::new(topology)),
        }
    }

    pub async fn is_alive(&self, key: ServerKey) -> bool {
        self.inner.read().await.is_alive(key)
    }

    pub async fn set_alive(&self, key: ServerKey, alive: bool) -> Option<LivenessTransition> {
        self.inner.write().await.set_alive(key, alive)
    }

    /// Snapshot copy for rendering.
    pub async fn snapshot(&self) -> Topology {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_server_topology(quorum: u32) -> Topology {
        let real_servers = vec![
            RealServer {
                address: "192.0.2.10".parse().unwrap(),
                port: 80,
                alive: true,
            },
            RealServer {
                address: "192.0.2.11".parse().unwrap(),
                port: 80,
                alive: true,
            },
        ];
        Topology {
            virtual_servers: vec![VirtualServer::new(
                "10.0.0.1".parse().unwrap(),
                80,
                quorum,
                real_servers,
            )],
        }
    }

    #[test]
    fn quorum_follows_liveness() {
        let mut topology = two_server_topology(2);
        assert!(topology.virtual_servers[0].quorum_up());

        topology.set_alive(ServerKey { vs: 0, rs: 0 }, false);
        assert_eq!(topology.virtual_servers[0].alive_count(), 1);
        assert_eq!(topology.virtual_servers[0].quorum_state, QuorumState::Down);

        topology.set_alive(ServerKey { vs: 0, rs: 0 }, true);
        assert!(topology.virtual_servers[0].quorum_up());
    }

    #[test]
    fn set_alive_is_idempotent() {
        let mut topology = two_server_topology(1);
        let key = ServerKey { vs: 0, rs: 0 };

        let transition = topology.set_alive(key, false).unwrap();
        assert_eq!(transition.previous, ServerState::Up);
        assert_eq!(transition.current, ServerState::Down);

        // Same state again: no transition.
        assert!(topology.set_alive(key, false).is_none());

        let transition = topology.set_alive(key, true).unwrap();
        assert_eq!(transition.current, ServerState::Up);
        assert!(topology.set_alive(key, true).is_none());
    }

    #[test]
    fn unknown_key_reports_dead() {
        let mut topology = two_server_topology(1);
        let key = ServerKey { vs: 7, rs: 0 };
        assert!(!topology.is_alive(key));
        assert!(topology.set_alive(key, false).is_none());
    }

    #[tokio::test]
    async fn shared_topology_snapshot_is_isolated() {
        let shared = SharedTopology::new(two_server_topology(1));
        let snapshot = shared.snapshot().await;

        shared.set_alive(ServerKey { vs: 0, rs: 0 }, false).await;

        // The snapshot taken earlier is unaffected.
        assert!(snapshot.is_alive(ServerKey { vs: 0, rs: 0 }));
        assert!(!shared.is_alive(ServerKey { vs: 0, rs: 0 }).await);
    }
}

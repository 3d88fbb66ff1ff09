//! DHT engine configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use super::id::NodeId;
use crate::constants::{
    DEFAULT_PORT, DHT_ALPHA, DHT_BOOTSTRAP_NODES, DHT_BOOTSTRAP_RETRY_INTERVAL,
    DHT_BUCKET_REFRESH_TIMEOUT, DHT_MAX_ITERATIONS, DHT_MAX_PEERS_PER_TORRENT,
    DHT_MIN_SEND_INTERVAL, DHT_PEERS_EARLY_RETURN, DHT_PEER_ANNOUNCE_LIFETIME, DHT_QUERY_TIMEOUT,
    DHT_REFRESH_CHECK_INTERVAL, DHT_TICK_INTERVAL, DHT_TOKEN_ROTATION_INTERVAL,
    MAX_PENDING_DHT_QUERIES,
};

/// DHT configuration
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Local UDP address, used by [`DhtEngine::bind`](super::DhtEngine::bind)
    pub bind_addr: SocketAddr,
    /// Fixed node id; a random one when unset
    pub node_id: Option<NodeId>,
    /// `host:port` seeds resolved during bootstrap
    pub bootstrap_nodes: Vec<String>,
    /// Time after which an unanswered query completes as a timeout
    pub query_timeout: Duration,
    /// Message loop scheduling interval
    pub tick_interval: Duration,
    /// Queries allowed in flight before sending pauses
    pub max_in_flight: usize,
    /// Minimum spacing between outgoing datagrams
    pub min_send_interval: Duration,
    /// Idle time after which a bucket is refreshed
    pub bucket_refresh_timeout: Duration,
    /// How often buckets are checked for staleness
    pub refresh_check_interval: Duration,
    /// Write-token secret rotation period
    pub token_rotation_interval: Duration,
    /// Parallel queries per lookup round
    pub alpha: usize,
    /// Lookup rounds before giving up
    pub max_iterations: usize,
    /// Peers after which a get_peers lookup stops early
    pub peers_early_return: usize,
    /// Stored peers per info hash
    pub max_peers_per_torrent: usize,
    /// Lifetime of an announced peer
    pub peer_announce_lifetime: Duration,
    /// Pause between bootstrap attempts while the table stays empty
    pub bootstrap_retry_interval: Duration,
    /// Port sent in announce_peer; `None` sets `implied_port` instead
    pub announce_port: Option<u16>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            node_id: None,
            bootstrap_nodes: DHT_BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
            query_timeout: DHT_QUERY_TIMEOUT,
            tick_interval: DHT_TICK_INTERVAL,
            max_in_flight: MAX_PENDING_DHT_QUERIES,
            min_send_interval: DHT_MIN_SEND_INTERVAL,
            bucket_refresh_timeout: DHT_BUCKET_REFRESH_TIMEOUT,
            refresh_check_interval: DHT_REFRESH_CHECK_INTERVAL,
            token_rotation_interval: DHT_TOKEN_ROTATION_INTERVAL,
            alpha: DHT_ALPHA,
            max_iterations: DHT_MAX_ITERATIONS,
            peers_early_return: DHT_PEERS_EARLY_RETURN,
            max_peers_per_torrent: DHT_MAX_PEERS_PER_TORRENT,
            peer_announce_lifetime: DHT_PEER_ANNOUNCE_LIFETIME,
            bootstrap_retry_interval: DHT_BOOTSTRAP_RETRY_INTERVAL,
            announce_port: None,
        }
    }
}

impl DhtConfig {
    /// Configuration for a node that only talks to the nodes it is given
    pub fn isolated(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            bootstrap_nodes: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_node_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }
}

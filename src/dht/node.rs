use super::id::{NodeId, ID_LEN};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::time::{Duration, Instant};

/// Consecutive failures after which a node is considered bad.
pub const MAX_FAILURES: u32 = 4;

/// How long after its last response a node stays good.
pub const GOOD_NODE_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Length of a compact node record: id, IPv4 address, port.
pub const COMPACT_NODE_LEN: usize = ID_LEN + 6;

/// Liveness of a node, derived from its failure count and last contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Good,
    Questionable,
    Bad,
}

/// A DHT participant.
///
/// Two nodes are equal when their ids are equal, whatever their address or
/// liveness.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Option<Instant>,
    pub failed_count: u32,
    /// Write token this node handed us in its last `get_peers` response.
    pub token: Option<Bytes>,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: None,
            failed_count: 0,
            token: None,
        }
    }

    pub fn seen(&mut self) {
        self.last_seen = Some(Instant::now());
        self.failed_count = 0;
    }

    pub fn failed(&mut self) {
        self.failed_count = self.failed_count.saturating_add(1);
    }

    pub fn state(&self) -> NodeState {
        if self.failed_count >= MAX_FAILURES {
            return NodeState::Bad;
        }

        match self.last_seen {
            None => NodeState::Unknown,
            Some(at) if at.elapsed() < GOOD_NODE_WINDOW => NodeState::Good,
            Some(_) => NodeState::Questionable,
        }
    }

    pub fn is_bad(&self) -> bool {
        self.state() == NodeState::Bad
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != COMPACT_NODE_LEN {
            return None;
        }

        let id = NodeId::from_bytes(&data[..ID_LEN]).ok()?;
        let addr = compact_addr_from_bytes(&data[ID_LEN..])?;

        Some(Self::new(id, addr))
    }

    /// The 26-byte compact form, or `None` for IPv6 nodes.
    pub fn to_compact(&self) -> Option<[u8; COMPACT_NODE_LEN]> {
        let mut compact = [0u8; COMPACT_NODE_LEN];
        compact[..ID_LEN].copy_from_slice(&self.id.0);
        compact[ID_LEN..].copy_from_slice(&compact_addr(&self.addr)?);
        Some(compact)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

/// Compact peer info: 4-byte IPv4 address followed by a big-endian port.
pub fn compact_addr(addr: &SocketAddr) -> Option<[u8; 6]> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut data = [0u8; 6];
            data[..4].copy_from_slice(&v4.ip().octets());
            data[4..].copy_from_slice(&v4.port().to_be_bytes());
            Some(data)
        }
        SocketAddr::V6(_) => None,
    }
}

pub fn compact_addr_from_bytes(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

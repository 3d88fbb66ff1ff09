use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::time::{Duration, Instant};

struct AnnouncedPeer {
    addr: SocketAddr,
    announced_at: Instant,
}

/// Peers that announced themselves to us, per info hash.
pub struct PeerStore {
    peers: HashMap<[u8; 20], Vec<AnnouncedPeer>>,
    lifetime: Duration,
    max_per_torrent: usize,
}

impl PeerStore {
    pub fn new(lifetime: Duration, max_per_torrent: usize) -> Self {
        Self {
            peers: HashMap::new(),
            lifetime,
            max_per_torrent,
        }
    }

    /// Records an announcement. A repeat announce refreshes the entry.
    pub fn add_peer(&mut self, info_hash: [u8; 20], addr: SocketAddr) {
        let now = Instant::now();
        let lifetime = self.lifetime;
        let peers = self.peers.entry(info_hash).or_default();

        peers.retain(|p| p.addr != addr && now.duration_since(p.announced_at) < lifetime);

        if peers.len() < self.max_per_torrent {
            peers.push(AnnouncedPeer {
                addr,
                announced_at: now,
            });
        }
    }

    pub fn get_peers(&mut self, info_hash: &[u8; 20]) -> Vec<SocketAddr> {
        let now = Instant::now();
        let lifetime = self.lifetime;

        let Some(peers) = self.peers.get_mut(info_hash) else {
            return Vec::new();
        };
        peers.retain(|p| now.duration_since(p.announced_at) < lifetime);

        let found: Vec<SocketAddr> = peers.iter().map(|p| p.addr).collect();
        if found.is_empty() {
            self.peers.remove(info_hash);
        }
        found
    }

    /// Drops expired announcements for every torrent.
    pub fn expire(&mut self) {
        let now = Instant::now();
        let lifetime = self.lifetime;
        self.peers.retain(|_, peers| {
            peers.retain(|p| now.duration_since(p.announced_at) < lifetime);
            !peers.is_empty()
        });
    }

    pub fn torrent_count(&self) -> usize {
        self.peers.len()
    }
}

//! Protocol constants and tuning parameters.
//!
//! These are the defaults behind [`DhtConfig`](crate::dht::DhtConfig). Most
//! follow BEP-5 or the values used by libtorrent and Transmission.

use std::time::Duration;

// ============================================================================
// Ports
// ============================================================================

/// Default DHT listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Routing table
// ============================================================================

/// DHT bucket size (k value in Kademlia)
pub const DHT_BUCKET_SIZE: usize = 8;

/// A bucket untouched for this long gets a refresh query
pub const DHT_BUCKET_REFRESH_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How often buckets are checked for staleness
pub const DHT_REFRESH_CHECK_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// Message loop
// ============================================================================

/// DHT query timeout
pub const DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Scheduling interval of the message loop
pub const DHT_TICK_INTERVAL: Duration = Duration::from_millis(5);

/// Maximum queries awaiting a response at once
pub const MAX_PENDING_DHT_QUERIES: usize = 64;

/// Minimum spacing between two outgoing datagrams
pub const DHT_MIN_SEND_INTERVAL: Duration = Duration::ZERO;

// ============================================================================
// Lookups
// ============================================================================

/// DHT alpha value (parallel queries per lookup round)
pub const DHT_ALPHA: usize = 3;

/// Maximum DHT lookup iterations
pub const DHT_MAX_ITERATIONS: usize = 10;

/// Number of peers for early return in DHT lookup
pub const DHT_PEERS_EARLY_RETURN: usize = 50;

// ============================================================================
// Tokens and announced peers
// ============================================================================

/// Write-token secret rotation period
pub const DHT_TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long an announced peer is served to get_peers queries
pub const DHT_PEER_ANNOUNCE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Cap on stored peers per info hash
pub const DHT_MAX_PEERS_PER_TORRENT: usize = 1000;

// ============================================================================
// Bootstrap
// ============================================================================

/// Well-known DHT bootstrap nodes
pub const DHT_BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "router.utorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "dht.libtorrent.org:25401",
];

/// Delay before bootstrapping again when it left the table empty
pub const DHT_BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(30);

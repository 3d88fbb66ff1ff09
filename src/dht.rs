//! Distributed Hash Table (BEP-5)
//!
//! This module implements the Kademlia-based DHT used by BitTorrent
//! for trackerless peer discovery.
//!
//! [`DhtEngine`] owns the routing table, token secrets, announced peers and
//! the [`MessageLoop`] on a single task. Everything else in this module is
//! the building blocks it is made of:
//!
//! - [`NodeId`] and [`IdBound`]: 160-bit identifiers and bucket bounds
//! - [`Node`], [`Bucket`] and [`RoutingTable`]: the k-bucket table
//! - [`TokenManager`]: write tokens for `announce_peer`
//! - [`DhtMessage`]: the KRPC wire codec
//! - [`Transport`] and [`Inbound`]: the datagram boundary

mod bucket;
mod config;
mod engine;
mod error;
mod handler;
mod id;
mod lookup;
mod message;
mod message_loop;
mod node;
mod peer_store;
mod routing;
mod token;
mod transport;

pub use bucket::{Bucket, BUCKET_SIZE};
pub use config::DhtConfig;
pub use engine::{DhtEngine, DhtEvent, DhtState};
pub use error::DhtError;
pub use handler::LocalNode;
pub use id::{IdBound, NodeId, ID_LEN};
pub use message::{error_code, DhtMessage, KrpcError, MessageBody, Query, Response, TransactionId};
pub use message_loop::{MessageLoop, QueryCompleted, QueryOutcome};
pub use node::{Node, NodeState, COMPACT_NODE_LEN};
pub use peer_store::PeerStore;
pub use routing::RoutingTable;
pub use token::TokenManager;
pub use transport::{Inbound, Transport};

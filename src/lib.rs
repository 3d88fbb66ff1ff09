//! rbit-dht - BitTorrent Mainline DHT
//!
//! A Kademlia DHT node speaking the BitTorrent KRPC protocol, following
//! BEP-5.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 routing table, message loop and engine
//! - [`constants`] - Protocol defaults and tuning parameters

pub mod bencode;
pub mod constants;
pub mod dht;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{
    Bucket, DhtConfig, DhtEngine, DhtError, DhtEvent, DhtMessage, DhtState, IdBound, Inbound,
    KrpcError, MessageBody, MessageLoop, Node, NodeId, NodeState, PeerStore, Query, QueryCompleted,
    QueryOutcome, Response, RoutingTable, TokenManager, TransactionId, Transport,
};

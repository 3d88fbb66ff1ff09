use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::bucket::BUCKET_SIZE;
use super::engine::DhtEvent;
use super::error::DhtError;
use super::id::NodeId;
use super::message::{KrpcError, Query, Response};
use super::message_loop::{QueryCompleted, QueryOutcome};
use super::node::Node;
use super::peer_store::PeerStore;
use super::routing::RoutingTable;
use super::token::TokenManager;

/// State the message loop dispatches into: our routing table, write-token
/// secrets and the peers announced to us.
///
/// Lives on the engine task only.
pub struct LocalNode {
    pub table: RoutingTable,
    pub tokens: TokenManager,
    pub peers: PeerStore,
}

impl LocalNode {
    pub fn new(table: RoutingTable, tokens: TokenManager, peers: PeerStore) -> Self {
        Self {
            table,
            tokens,
            peers,
        }
    }

    pub fn id(&self) -> NodeId {
        *self.table.local_id()
    }

    /// Records that `id` at `source` just talked to us, inserting it when
    /// unknown.
    pub fn observe(&mut self, id: NodeId, source: SocketAddr) {
        if self.table.node_seen(&id) {
            return;
        }
        if id == self.id() {
            trace!("ignoring message carrying our own id from {}", source);
            return;
        }

        let mut node = Node::new(id, source);
        node.seen();

        match self.table.try_add(node) {
            Ok(()) => debug!("added node {} at {}", id, source),
            Err(node) => {
                self.table.offer_replacement(node);
            }
        }
    }

    /// Answers an inbound query from `source`.
    pub fn handle_query(&mut self, source: SocketAddr, query: Query) -> Result<Response, KrpcError> {
        let mut response = Response::new(self.id());

        match query {
            Query::Ping => {}
            Query::FindNode { target } => {
                response.nodes = self.table.closest(&target, BUCKET_SIZE);
            }
            Query::GetPeers { info_hash } => {
                response.values = self.peers.get_peers(&info_hash);
                response.token = Some(self.tokens.generate_token(&source));
                response.nodes = self.table.closest(&NodeId::from(info_hash), BUCKET_SIZE);
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                if !self.tokens.verify_token(&source, &token) {
                    debug!("rejecting announce_peer from {}: bad token", source);
                    return Err(DhtError::InvalidToken.into());
                }

                let port = if implied_port { source.port() } else { port };
                let peer = SocketAddr::new(source.ip(), port);
                self.peers.add_peer(info_hash, peer);
                debug!("{} announced for {:02x?}", peer, &info_hash[..4]);
            }
            Query::Unknown(method) => return Err(KrpcError::method_unknown(&method)),
        }

        Ok(response)
    }

    /// Applies the side effects of a finished outbound query.
    ///
    /// Returns contacts from a `find_node` answer that we do not know yet
    /// and have room for; the caller pings them so they enter the table
    /// through the normal receive path.
    pub fn query_completed(
        &mut self,
        completed: &QueryCompleted,
        events: &broadcast::Sender<DhtEvent>,
    ) -> Vec<Node> {
        match &completed.outcome {
            QueryOutcome::Timeout => {
                let id = completed
                    .node_id
                    .or_else(|| self.table.find_by_addr(&completed.destination).map(|n| n.id));
                if let Some(id) = id {
                    if let Some(state) = self.table.node_failed(&id) {
                        trace!("{} timed out, now {:?}", id, state);
                    }
                }
                Vec::new()
            }
            QueryOutcome::Error(e) => {
                debug!(
                    "{} query to {} failed: {}",
                    completed.query.method(),
                    completed.destination,
                    e
                );
                Vec::new()
            }
            QueryOutcome::Response(response) => {
                if let Some(token) = &response.token {
                    if let Some(node) = self.table.find_node_mut(&response.id) {
                        node.token = Some(token.clone());
                    }
                }

                match &completed.query {
                    Query::FindNode { .. } => self.unknown_contacts(&response.nodes),
                    Query::GetPeers { info_hash } => {
                        if !response.values.is_empty() {
                            // No subscribers is fine.
                            let _ = events.send(DhtEvent::PeersFound {
                                info_hash: *info_hash,
                                peers: response.values.clone(),
                            });
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    fn unknown_contacts(&self, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|n| self.table.find_node(&n.id).is_none() && self.table.can_accept(&n.id))
            .cloned()
            .collect()
    }

    /// Compact records of every non-bad node and bucket replacement.
    pub fn save_nodes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for bucket in self.table.buckets() {
            let nodes = bucket.nodes().iter().filter(|n| !n.is_bad());
            for node in nodes.chain(bucket.replacement()) {
                if let Some(compact) = node.to_compact() {
                    data.extend_from_slice(&compact);
                }
            }
        }
        data
    }

    /// Inserts previously saved nodes as unknown, keeping the overflow as
    /// replacements. Returns how many entered a bucket proper.
    pub fn load_nodes(&mut self, nodes: Vec<Node>) -> usize {
        let mut added = 0;
        for node in nodes {
            match self.table.try_add(node) {
                Ok(()) => added += 1,
                Err(node) => {
                    self.table.offer_replacement(node);
                }
            }
        }
        added
    }
}

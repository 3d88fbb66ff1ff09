use std::collections::HashSet;
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

use super::bucket::BUCKET_SIZE;
use super::config::DhtConfig;
use super::engine::Handle;
use super::error::DhtError;
use super::id::NodeId;
use super::message::Query;
use super::message_loop::QueryOutcome;
use super::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupKind {
    FindNode,
    GetPeers,
}

/// A node that answered during a lookup, with the write token it gave us.
#[derive(Debug, Clone)]
pub(crate) struct Responder {
    pub node: Node,
    pub token: Option<Bytes>,
}

#[derive(Debug, Default)]
pub(crate) struct LookupResult {
    pub peers: Vec<SocketAddr>,
    /// Closest first.
    pub responders: Vec<Responder>,
}

/// Walks toward `target`, querying `alpha` of the closest unqueried nodes
/// per round.
///
/// A round that turns up nothing closer than the best node already known
/// widens the next one to every unqueried candidate; a second such round
/// ends the walk. It also ends once every candidate has been asked, after
/// `max_iterations` rounds, or, for `get_peers`, once enough peers were
/// found.
pub(crate) async fn run(
    handle: &Handle,
    target: NodeId,
    kind: LookupKind,
    config: &DhtConfig,
) -> Result<LookupResult, DhtError> {
    let local_id = handle.local_id();
    let query = match kind {
        LookupKind::FindNode => Query::FindNode { target },
        LookupKind::GetPeers => Query::GetPeers { info_hash: target.0 },
    };

    let mut candidates = handle.closest(target, BUCKET_SIZE).await?;
    let mut queried: HashSet<NodeId> = HashSet::new();
    let mut known_peers: HashSet<SocketAddr> = HashSet::new();
    let mut result = LookupResult::default();
    let mut stalled = false;

    for round in 0..config.max_iterations {
        let width = if stalled { BUCKET_SIZE } else { config.alpha };
        let batch: Vec<Node> = candidates
            .iter()
            .filter(|n| !queried.contains(&n.id))
            .take(width)
            .cloned()
            .collect();
        if batch.is_empty() {
            break;
        }

        let best_before = candidates.first().map(|n| n.id);
        queried.extend(batch.iter().map(|n| n.id));

        let replies = futures::future::join_all(
            batch
                .iter()
                .map(|n| handle.query(n.addr, Some(n.id), query.clone())),
        )
        .await;

        for (node, reply) in batch.into_iter().zip(replies) {
            let QueryOutcome::Response(response) = reply?.outcome else {
                continue;
            };

            for peer in response.values {
                if known_peers.insert(peer) {
                    result.peers.push(peer);
                }
            }
            for contact in response.nodes {
                if contact.id != local_id && !candidates.contains(&contact) {
                    candidates.push(contact);
                }
            }
            result.responders.push(Responder {
                node,
                token: response.token,
            });
        }

        candidates.sort_by(|a, b| target.distance_cmp(&a.id, &b.id));
        candidates.truncate(BUCKET_SIZE);

        if kind == LookupKind::GetPeers && result.peers.len() >= config.peers_early_return {
            debug!("lookup for {} stopped early with {} peers", target, result.peers.len());
            break;
        }
        if candidates.first().map(|n| n.id) != best_before {
            stalled = false;
        } else if stalled {
            debug!("lookup for {} converged after {} rounds", target, round + 1);
            break;
        } else {
            stalled = true;
        }
    }

    result
        .responders
        .sort_by(|a, b| target.distance_cmp(&a.node.id, &b.node.id));
    Ok(result)
}

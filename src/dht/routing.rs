use std::net::SocketAddr;

use tracing::debug;

use super::bucket::Bucket;
use super::id::{IdBound, NodeId};
use super::node::{Node, NodeState};

/// Buckets partitioning `[0, 2^160)`, ordered by their lower bound.
///
/// Only the bucket holding our own id is ever split, so the table is dense
/// around `local_id` and coarse elsewhere.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: vec![Bucket::new()],
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut [Bucket] {
        &mut self.buckets
    }

    /// Index of the bucket whose range contains `id`.
    fn bucket_index(&self, id: &NodeId) -> usize {
        let id = IdBound::from(*id);
        self.buckets.partition_point(|b| b.max() <= id)
    }

    pub fn bucket_for(&self, id: &NodeId) -> &Bucket {
        &self.buckets[self.bucket_index(id)]
    }

    /// Inserts `node`, splitting our own bucket as needed.
    ///
    /// Returns false if the id is ours, already present, or its bucket is
    /// full and may not split.
    pub fn add(&mut self, node: Node) -> bool {
        self.try_add(node).is_ok()
    }

    pub(crate) fn try_add(&mut self, node: Node) -> Result<(), Node> {
        if node.id == self.local_id {
            return Err(node);
        }

        let idx = self.bucket_index(&node.id);
        let bucket = &mut self.buckets[idx];
        if bucket.contains(&node.id) {
            return Err(node);
        }

        let node = match bucket.try_add(node) {
            Ok(()) => return Ok(()),
            Err(node) => node,
        };

        if !(bucket.can_contain(&self.local_id) && bucket.can_split()) {
            return Err(node);
        }

        let bucket = self.buckets.remove(idx);
        match bucket.split() {
            Ok((left, right)) => {
                debug!(
                    "split bucket into {:?}..{:?} ({} nodes) and {:?}..{:?} ({} nodes)",
                    left.min(),
                    left.max(),
                    left.len(),
                    right.min(),
                    right.max(),
                    right.len()
                );
                self.buckets.insert(idx, right);
                self.buckets.insert(idx, left);
            }
            Err(bucket) => {
                self.buckets.insert(idx, bucket);
                return Err(node);
            }
        }

        self.try_add(node)
    }

    /// Keeps a node that could not be inserted as its bucket's stand-by.
    pub fn offer_replacement(&mut self, node: Node) -> bool {
        if node.id == self.local_id {
            return false;
        }

        let idx = self.bucket_index(&node.id);
        let bucket = &mut self.buckets[idx];
        if bucket.contains(&node.id) {
            return false;
        }

        bucket.set_replacement(node);
        true
    }

    /// Whether inserting `id` now would succeed.
    pub fn can_accept(&self, id: &NodeId) -> bool {
        if id == &self.local_id {
            return false;
        }

        let bucket = self.bucket_for(id);
        if bucket.contains(id) {
            return false;
        }

        !bucket.is_full()
            || bucket.nodes().iter().any(Node::is_bad)
            || (bucket.can_contain(&self.local_id) && bucket.can_split())
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        self.buckets.iter().find_map(|b| b.get(id))
    }

    pub fn find_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.buckets.iter_mut().find_map(|b| b.get_mut(id))
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<&Node> {
        self.nodes().find(|n| &n.addr == addr)
    }

    /// Marks a node as having answered and touches its bucket.
    pub fn node_seen(&mut self, id: &NodeId) -> bool {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        match bucket.get_mut(id) {
            Some(node) => {
                node.seen();
                bucket.changed();
                true
            }
            None => false,
        }
    }

    /// Counts a failed query against a node. A node that turns bad is
    /// swapped for its bucket's replacement when there is one.
    pub fn node_failed(&mut self, id: &NodeId) -> Option<NodeState> {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let node = bucket.get_mut(id)?;
        node.failed();
        let state = node.state();

        if state == NodeState::Bad && bucket.promote_replacement() {
            debug!("replaced bad node {} with its bucket's replacement", id);
        }
        Some(state)
    }

    /// Nodes of the bucket containing `target` and of its two neighbours,
    /// sorted by distance to `target`.
    pub fn get_closest(&self, target: &NodeId) -> Vec<Node> {
        let idx = self.bucket_index(target);
        let first = idx.saturating_sub(1);
        let last = (idx + 1).min(self.buckets.len() - 1);

        let mut nodes: Vec<Node> = self.buckets[first..=last]
            .iter()
            .flat_map(|b| b.nodes().iter().cloned())
            .collect();
        nodes.sort_by(|a, b| target.distance_cmp(&a.id, &b.id));
        nodes
    }

    /// Up to `count` non-bad nodes from [`RoutingTable::get_closest`].
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes = self.get_closest(target);
        nodes.retain(|n| !n.is_bad());
        nodes.truncate(count);
        nodes
    }

    /// The k closest nodes by brute force over the whole table.
    pub fn closest_exhaustive(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes().filter(|n| !n.is_bad()).cloned().collect();
        nodes.sort_by(|a, b| target.distance_cmp(&a.id, &b.id));
        nodes.truncate(count);
        nodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(|b| b.nodes().iter())
    }

    pub fn count_nodes(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn clear(&mut self) {
        self.buckets = vec![Bucket::new()];
    }

    /// Whether the table holds enough nodes to answer lookups on its own.
    pub fn needs_bootstrap(&self) -> bool {
        self.count_nodes() == 0
    }
}

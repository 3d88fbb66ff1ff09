use super::id::{IdBound, NodeId};
use super::node::Node;
use tokio::time::Instant;

/// Capacity of a bucket (Kademlia's k).
pub const BUCKET_SIZE: usize = 8;

/// Up to [`BUCKET_SIZE`] nodes whose ids fall in `[min, max)`, plus one
/// stand-by replacement.
#[derive(Debug, Clone)]
pub struct Bucket {
    min: IdBound,
    max: IdBound,
    nodes: Vec<Node>,
    replacement: Option<Node>,
    last_changed: Instant,
}

impl Bucket {
    /// A bucket spanning the whole identifier space.
    pub fn new() -> Self {
        Self::with_range(IdBound::ZERO, IdBound::END)
    }

    pub fn with_range(min: IdBound, max: IdBound) -> Self {
        Self {
            min,
            max,
            nodes: Vec::with_capacity(BUCKET_SIZE),
            replacement: None,
            last_changed: Instant::now(),
        }
    }

    pub fn min(&self) -> IdBound {
        self.min
    }

    pub fn max(&self) -> IdBound {
        self.max
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= BUCKET_SIZE
    }

    pub fn replacement(&self) -> Option<&Node> {
        self.replacement.as_ref()
    }

    pub fn set_replacement(&mut self, node: Node) {
        self.replacement = Some(node);
    }

    pub fn last_changed(&self) -> Instant {
        self.last_changed
    }

    pub fn changed(&mut self) {
        self.last_changed = Instant::now();
    }

    pub fn can_contain(&self, id: &NodeId) -> bool {
        let id = IdBound::from(*id);
        self.min <= id && id < self.max
    }

    /// True while the range still holds more than `BUCKET_SIZE` ids.
    pub fn can_split(&self) -> bool {
        self.max
            .checked_sub(&self.min)
            .is_some_and(|span| span > IdBound::from_u64(BUCKET_SIZE as u64))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    /// Adds `node` if there is room or a bad node to evict.
    pub fn add(&mut self, node: Node) -> bool {
        self.try_add(node).is_ok()
    }

    /// Like [`Bucket::add`], handing the node back on failure.
    pub(crate) fn try_add(&mut self, node: Node) -> Result<(), Node> {
        if !self.can_contain(&node.id) {
            return Err(node);
        }

        if self.nodes.len() < BUCKET_SIZE {
            self.nodes.push(node);
            self.changed();
            return Ok(());
        }

        match self.nodes.iter().position(Node::is_bad) {
            Some(pos) => {
                self.nodes[pos] = node;
                self.changed();
                Ok(())
            }
            None => Err(node),
        }
    }

    /// Replaces a bad node with the stand-by replacement, if both exist.
    pub fn promote_replacement(&mut self) -> bool {
        let Some(pos) = self.nodes.iter().position(Node::is_bad) else {
            return false;
        };
        let Some(replacement) = self.replacement.take() else {
            return false;
        };

        self.nodes[pos] = replacement;
        self.changed();
        true
    }

    /// Splits at the median of the range.
    ///
    /// Nodes move to the child whose range contains them. The replacement
    /// joins its child's node list when that child has room, otherwise it
    /// stays that child's replacement. Returns the bucket unchanged if the
    /// range is too small to split.
    pub fn split(self) -> Result<(Bucket, Bucket), Bucket> {
        if !self.can_split() {
            return Err(self);
        }

        let median = IdBound::midpoint(&self.min, &self.max);
        let mut left = Bucket::with_range(self.min, median);
        let mut right = Bucket::with_range(median, self.max);

        for node in self.nodes {
            let child = if left.can_contain(&node.id) {
                &mut left
            } else {
                &mut right
            };
            child.nodes.push(node);
        }

        if let Some(node) = self.replacement {
            let child = if left.can_contain(&node.id) {
                &mut left
            } else {
                &mut right
            };
            if let Err(node) = child.try_add(node) {
                child.replacement = Some(node);
            }
        }

        left.last_changed = self.last_changed;
        right.last_changed = self.last_changed;
        Ok((left, right))
    }

    /// Least recently seen first; never-seen nodes sort before all others.
    pub fn sort_by_last_seen(&mut self) {
        self.nodes.sort_by_key(|n| n.last_seen);
    }

    /// A uniformly random id inside this bucket's range.
    pub fn random_id(&self) -> NodeId {
        let span = self.max.checked_sub(&self.min).unwrap_or(IdBound::ZERO);
        self.min
            .checked_add(&span.random_below())
            .and_then(|b| b.to_node_id())
            .unwrap_or_else(NodeId::random)
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

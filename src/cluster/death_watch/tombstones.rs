use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::cluster::unique_node::UniqueNode;


/// The set of nodes that were confirmed down, bounded by a capacity. When the capacity is
///  exceeded, the node that was tombstoned longest ago is forgotten.
///
/// NB: A [UniqueNode] never comes back once it is down, so a watch on a down node can only be
///  in flight for a short while after the node went down. Evicting old entries therefore does
///  not affect watchers in practice, as long as the capacity is well above the number of nodes
///  going down while a watch is in flight.
pub struct Tombstones {
    capacity: usize,
    nodes: FxHashSet<UniqueNode>,
    insertion_order: VecDeque<UniqueNode>,
}
impl Tombstones {
    pub fn new(capacity: usize) -> Tombstones {
        Tombstones {
            capacity: capacity.max(1),
            nodes: FxHashSet::default(),
            insertion_order: VecDeque::new(),
        }
    }

    /// returns true iff the node was not tombstoned before
    pub fn insert(&mut self, node: UniqueNode) -> bool {
        if !self.nodes.insert(node) {
            return false;
        }
        self.insertion_order.push_back(node);

        while self.insertion_order.len() > self.capacity {
            if let Some(evicted) = self.insertion_order.pop_front() {
                debug!("evicting tombstone for {:?}", evicted);
                self.nodes.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, node: &UniqueNode) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, trace};

use crate::cluster::actor_ref::{ActorAddress, SystemMessage, WatcherRef};
use crate::cluster::death_watch::tombstones::Tombstones;
use crate::cluster::membership::{MemberStatus, Membership, MembershipChange};
use crate::cluster::unique_node::UniqueNode;


/// Callback for a watch on a remote node. It is invoked at most once, in a task of its own.
pub type NodeTerminatedFn = Arc<dyn Fn(UniqueNode) -> Pin<Box<dyn Future<Output=()> + Send>> + Send + Sync>;

pub fn node_terminated_fn<F, Fut>(f: F) -> NodeTerminatedFn
where
    F: Fn(UniqueNode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output=()> + Send + 'static,
{
    Arc::new(move |node| Box::pin(f(node)))
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum NodeDeathWatcherError {
    #[error("watcher {watcher:?} is not local to node {local_node:?}")]
    WatcherActorWasNotLocal {
        watcher: ActorAddress,
        local_node: UniqueNode,
    },
}


/// The [NodeDeathWatcher] notifies local watchers when a remote node they depend on is written
///  off. Watchers register with it instead of each of them tracking cluster membership.
///
/// It remembers nodes that went down ('tombstones'): a watch on a node that is already down is
///  answered immediately, since the down event it would wait for has already passed.
///
/// All methods are meant to be called from a single message loop (see
///  [crate::cluster::death_watch::NodeDeathWatcherShell]), so the order in which watches and
///  membership changes arrive decides the outcome, and every watcher is notified exactly once.
pub struct NodeDeathWatcher {
    self_node: UniqueNode,
    membership: Membership,
    tombstones: Tombstones,
    remote_watchers: FxHashMap<UniqueNode, FxHashMap<ActorAddress, WatcherRef>>,
    remote_watch_callbacks: FxHashMap<UniqueNode, FxHashMap<ActorAddress, NodeTerminatedFn>>,
    /// reverse index for removing a watcher's registrations
    watched_nodes: FxHashMap<ActorAddress, FxHashSet<UniqueNode>>,
}
impl NodeDeathWatcher {
    pub fn new(self_node: UniqueNode, tombstone_capacity: usize) -> NodeDeathWatcher {
        NodeDeathWatcher {
            self_node,
            membership: Membership::empty(),
            tombstones: Tombstones::new(tombstone_capacity),
            remote_watchers: FxHashMap::default(),
            remote_watch_callbacks: FxHashMap::default(),
            watched_nodes: FxHashMap::default(),
        }
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Registers a local actor's interest in `remote_node`. The actor is sent
    ///  [SystemMessage::NodeTerminated] once the node goes down.
    ///
    /// Panics if the watcher is not a local actor: other nodes run death watchers of their own,
    ///  so a remote watcher here is a bug in the hosting runtime.
    pub fn on_actor_watched(&mut self, watcher: WatcherRef, remote_node: UniqueNode) {
        if self.is_known_down(&remote_node) {
            debug!("{:?} watched {:?} which is already down - notifying immediately", watcher.address(), remote_node);
            watcher.send_system_message(SystemMessage::NodeTerminated(remote_node));
            return;
        }

        if !watcher.address().is_local_to(&self.self_node) {
            let err = NodeDeathWatcherError::WatcherActorWasNotLocal {
                watcher: watcher.address().clone(),
                local_node: self.self_node,
            };
            panic!("attempted to register a non-local actor with the node death watcher: {}", err);
        }

        let address = watcher.address().clone();
        self.remote_watchers.entry(remote_node)
            .or_default()
            .insert(address.clone(), watcher);
        self.watched_nodes.entry(address)
            .or_default()
            .insert(remote_node);
    }

    /// Registers `on_terminated` to be called once `remote_node` goes down, replacing a previous
    ///  registration of the same watcher for that node.
    pub fn on_node_watched(&mut self, remote_node: UniqueNode, watcher: ActorAddress, on_terminated: NodeTerminatedFn) {
        if self.is_known_down(&remote_node) {
            debug!("{:?} watched {:?} which is already down - notifying immediately", watcher, remote_node);
            tokio::spawn(on_terminated(remote_node));
            return;
        }

        if self.remote_watch_callbacks.entry(remote_node)
            .or_default()
            .insert(watcher.clone(), on_terminated)
            .is_some()
        {
            trace!("replaced watch of {:?} on {:?}", watcher, remote_node);
        }
        self.watched_nodes.entry(watcher)
            .or_default()
            .insert(remote_node);
    }

    pub fn on_remove_watcher(&mut self, watcher: &ActorAddress) {
        let nodes = match self.watched_nodes.remove(watcher) {
            Some(nodes) => nodes,
            None => return,
        };

        for node in nodes {
            remove_registration(&mut self.remote_watchers, &node, watcher);
            remove_registration(&mut self.remote_watch_callbacks, &node, watcher);
        }
    }

    pub fn on_membership_snapshot(&mut self, snapshot: &Membership) {
        for change in Membership::diff(&self.membership, snapshot).changes {
            self.on_membership_changed(&change);
        }
    }

    pub fn on_membership_changed(&mut self, change: &MembershipChange) {
        let change = match self.membership.apply_membership_change(change) {
            Some(c) => c,
            None => {
                trace!("no effective change: {:?}", change);
                return;
            }
        };

        if let Some(replaced) = &change.replaced {
            self.handle_node_down(replaced.node);
        }

        // 'removed' counts as well: a node may be removed without this watcher seeing it 'down'
        if change.is_at_least(MemberStatus::Down) {
            self.handle_node_down(change.node);
        }
    }

    /// Notifies all watchers of `node` and tombstones it. Calling this repeatedly for the same
    ///  node has no further effect.
    pub fn handle_node_down(&mut self, node: UniqueNode) {
        if let Some(watchers) = self.remote_watchers.remove(&node) {
            for (address, watcher) in watchers {
                debug!("notifying {:?} of termination of {:?}", address, node);
                watcher.send_system_message(SystemMessage::NodeTerminated(node));
                self.unindex(&address, &node);
            }
        }

        if let Some(callbacks) = self.remote_watch_callbacks.remove(&node) {
            for (address, on_terminated) in callbacks {
                debug!("notifying {:?} of termination of {:?}", address, node);
                tokio::spawn(on_terminated(node));
                self.unindex(&address, &node);
            }
        }

        if self.tombstones.insert(node) {
            debug!("tombstoned {:?}", node);
        }
    }

    fn unindex(&mut self, watcher: &ActorAddress, node: &UniqueNode) {
        if let Some(nodes) = self.watched_nodes.get_mut(watcher) {
            nodes.remove(node);
            if nodes.is_empty() {
                self.watched_nodes.remove(watcher);
            }
        }
    }

    /// A node's tombstone may have been evicted while the node is still 'down' in the membership.
    ///  Either one means the node went down already.
    fn is_known_down(&self, node: &UniqueNode) -> bool {
        if self.tombstones.contains(node) {
            return true;
        }
        match self.membership.member(node) {
            Some(m) if m.status.is_terminal() => {
                debug!("tombstone for {:?} was evicted, but it is still down in the membership", node);
                true
            }
            _ => false,
        }
    }

    pub fn is_tombstoned(&self, node: &UniqueNode) -> bool {
        self.tombstones.contains(node)
    }

    pub fn is_watching(&self, watcher: &ActorAddress, node: &UniqueNode) -> bool {
        self.watched_nodes.get(watcher)
            .map(|nodes| nodes.contains(node))
            .unwrap_or(false)
    }

    /// number of registrations (of either kind) for a node
    pub fn num_watchers(&self, node: &UniqueNode) -> usize {
        self.remote_watchers.get(node).map(|w| w.len()).unwrap_or(0)
            + self.remote_watch_callbacks.get(node).map(|w| w.len()).unwrap_or(0)
    }

    pub fn num_watched_nodes(&self) -> usize {
        self.remote_watchers.keys()
            .chain(self.remote_watch_callbacks.keys())
            .collect::<FxHashSet<_>>()
            .len()
    }
}

fn remove_registration<T>(registrations: &mut FxHashMap<UniqueNode, FxHashMap<ActorAddress, T>>, node: &UniqueNode, watcher: &ActorAddress) {
    if let Some(for_node) = registrations.get_mut(node) {
        for_node.remove(watcher);
        if for_node.is_empty() {
            registrations.remove(node);
        }
    }
}

use std::fmt::{Debug, Formatter};

use tokio::sync::mpsc;
use tracing::debug;

use crate::cluster::unique_node::UniqueNode;


/// Identifies an actor in the cluster: the node it lives on, and its path on that node.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ActorAddress {
    pub node: UniqueNode,
    pub path: String,
}
impl ActorAddress {
    pub fn new(node: UniqueNode, path: impl Into<String>) -> ActorAddress {
        ActorAddress {
            node,
            path: path.into(),
        }
    }

    pub fn is_local_to(&self, node: &UniqueNode) -> bool {
        self.node == *node
    }
}
impl Debug for ActorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{}", self.node, self.path)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SystemMessage {
    /// a node hosting actors watched by the recipient was written off
    NodeTerminated(UniqueNode),
}

/// A reference to a local actor's system mailbox.
#[derive(Clone)]
pub struct WatcherRef {
    address: ActorAddress,
    mailbox: mpsc::UnboundedSender<SystemMessage>,
}
impl Debug for WatcherRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "WatcherRef({:?})", self.address)
    }
}
impl WatcherRef {
    pub fn new(address: ActorAddress, mailbox: mpsc::UnboundedSender<SystemMessage>) -> WatcherRef {
        WatcherRef {
            address,
            mailbox,
        }
    }

    pub fn address(&self) -> &ActorAddress {
        &self.address
    }

    pub fn send_system_message(&self, msg: SystemMessage) {
        if self.mailbox.send(msg).is_err() {
            debug!("dead letter: {:?} was not delivered to {:?}", msg, self.address);
        }
    }
}

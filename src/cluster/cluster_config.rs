use crate::cluster::unique_node::UniqueNode;

#[derive(Debug)]
pub struct ClusterConfig {
    pub self_node: UniqueNode,

    /// Upper bound for the number of downed nodes the death watcher remembers. Watches on a
    ///  remembered node are answered immediately; the oldest entries are evicted first.
    pub tombstone_capacity: usize,
    pub death_watcher_mailbox_size: usize,

    pub downing_timer_mailbox_size: usize,

    pub cluster_event_buffer_size: usize,
}

impl ClusterConfig {
    pub fn new(self_node: UniqueNode) -> ClusterConfig {
        ClusterConfig {
            self_node,
            tombstone_capacity: 10_000,
            death_watcher_mailbox_size: 1024,
            downing_timer_mailbox_size: 128,
            cluster_event_buffer_size: 128,
        }
    }
}

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::cluster::actor_ref::{ActorAddress, WatcherRef};
use crate::cluster::cluster_config::ClusterConfig;
use crate::cluster::cluster_events::{ClusterEvent, ClusterEventNotifier};
use crate::cluster::death_watch::node_death_watcher::{node_terminated_fn, NodeDeathWatcher, NodeTerminatedFn};
use crate::cluster::membership::{Membership, MembershipChange};
use crate::cluster::unique_node::UniqueNode;

pub mod node_death_watcher;
pub mod tombstones;


pub enum NodeDeathWatcherMessage {
    RemoteActorWatched {
        watcher: WatcherRef,
        remote_node: UniqueNode,
    },
    RemoteNodeWatched {
        remote_node: UniqueNode,
        watcher: ActorAddress,
        on_terminated: NodeTerminatedFn,
    },
    RemoveWatcher {
        watcher: ActorAddress,
    },
    MembershipSnapshot(Membership),
    MembershipChange(MembershipChange),
}
impl Debug for NodeDeathWatcherMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use NodeDeathWatcherMessage::*;

        match self {
            RemoteActorWatched { watcher, remote_node } => write!(f, "RemoteActorWatched({:?} -> {:?})", watcher.address(), remote_node),
            RemoteNodeWatched { remote_node, watcher, .. } => write!(f, "RemoteNodeWatched({:?} -> {:?})", watcher, remote_node),
            RemoveWatcher { watcher } => write!(f, "RemoveWatcher({:?})", watcher),
            MembershipSnapshot(membership) => write!(f, "MembershipSnapshot({} members)", membership.len()),
            MembershipChange(change) => write!(f, "MembershipChange({:?})", change),
        }
    }
}


/// The handle through which the rest of the process talks to its node death watcher. It is
///  cheap to clone, and all messages sent through it are processed in order.
#[derive(Clone, Debug)]
pub struct NodeDeathWatcherHandle {
    sender: mpsc::Sender<NodeDeathWatcherMessage>,
}
impl NodeDeathWatcherHandle {
    /// legacy API: the watcher is sent a system message when the node terminates
    pub async fn watch_remote_actor(&self, watcher: WatcherRef, remote_node: UniqueNode) -> anyhow::Result<()> {
        self.send(NodeDeathWatcherMessage::RemoteActorWatched { watcher, remote_node }).await
    }

    pub async fn watch_node<F, Fut>(&self, remote_node: UniqueNode, watcher: ActorAddress, on_terminated: F) -> anyhow::Result<()>
    where
        F: Fn(UniqueNode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output=()> + Send + 'static,
    {
        self.send(NodeDeathWatcherMessage::RemoteNodeWatched {
            remote_node,
            watcher,
            on_terminated: node_terminated_fn(on_terminated),
        }).await
    }

    pub async fn remove_watcher(&self, watcher: ActorAddress) -> anyhow::Result<()> {
        self.send(NodeDeathWatcherMessage::RemoveWatcher { watcher }).await
    }

    /// Feeds a membership snapshot directly, bypassing the cluster event subscription
    pub async fn membership_snapshot(&self, membership: Membership) -> anyhow::Result<()> {
        self.send(NodeDeathWatcherMessage::MembershipSnapshot(membership)).await
    }

    /// Feeds a membership change directly, bypassing the cluster event subscription
    pub async fn membership_change(&self, change: MembershipChange) -> anyhow::Result<()> {
        self.send(NodeDeathWatcherMessage::MembershipChange(change)).await
    }

    async fn send(&self, msg: NodeDeathWatcherMessage) -> anyhow::Result<()> {
        self.sender.send(msg).await
            .map_err(|e| anyhow!("node death watcher is not running, dropping {:?}", e.0))
    }
}


/// Runs a [NodeDeathWatcher] in its own message loop, fed by its handle and by cluster events.
pub struct NodeDeathWatcherShell {
    watcher: NodeDeathWatcher,
    recv: mpsc::Receiver<NodeDeathWatcherMessage>,
    cluster_events: broadcast::Receiver<ClusterEvent>,
    notifier: Arc<ClusterEventNotifier>,
}
impl NodeDeathWatcherShell {
    /// Subscribes to cluster events and seeds the watcher with the current membership, so that
    ///  nodes that are down already are tombstoned from the start.
    pub async fn new(config: Arc<ClusterConfig>, notifier: Arc<ClusterEventNotifier>) -> (NodeDeathWatcherShell, NodeDeathWatcherHandle) {
        let (snapshot, cluster_events) = notifier.subscribe().await;

        let mut watcher = NodeDeathWatcher::new(config.self_node, config.tombstone_capacity);
        watcher.on_membership_snapshot(&snapshot);

        let (sender, recv) = mpsc::channel(config.death_watcher_mailbox_size);

        let shell = NodeDeathWatcherShell {
            watcher,
            recv,
            cluster_events,
            notifier,
        };
        (shell, NodeDeathWatcherHandle { sender })
    }

    pub async fn run(self) {
        let NodeDeathWatcherShell { mut watcher, mut recv, mut cluster_events, notifier } = self;

        loop {
            select! {
                msg = recv.recv() => {
                    match msg {
                        Some(msg) => on_message(&mut watcher, msg),
                        None => {
                            debug!("all node death watcher handles were dropped - shutting down");
                            return;
                        }
                    }
                }
                evt = cluster_events.recv() => {
                    match evt {
                        Ok(evt) => on_cluster_event(&mut watcher, evt),
                        Err(RecvError::Lagged(num_missed)) => {
                            warn!("node death watcher missed {} cluster events - re-synchronizing from snapshot", num_missed);
                            let snapshot = notifier.snapshot().await;
                            watcher.on_membership_snapshot(&snapshot);
                        }
                        Err(RecvError::Closed) => {
                            error!("cluster event stream was closed - shutting down node death watcher");
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn on_message(watcher: &mut NodeDeathWatcher, msg: NodeDeathWatcherMessage) {
    use NodeDeathWatcherMessage::*;

    debug!("received: {:?}", msg);
    match msg {
        RemoteActorWatched { watcher: watcher_ref, remote_node } => {
            watcher.on_actor_watched(watcher_ref, remote_node)
        }
        RemoteNodeWatched { remote_node, watcher: watcher_address, on_terminated } => {
            watcher.on_node_watched(remote_node, watcher_address, on_terminated)
        }
        RemoveWatcher { watcher: watcher_address } => {
            watcher.on_remove_watcher(&watcher_address)
        }
        MembershipSnapshot(membership) => {
            watcher.on_membership_snapshot(&membership)
        }
        MembershipChange(change) => {
            watcher.on_membership_changed(&change)
        }
    }
}

fn on_cluster_event(watcher: &mut NodeDeathWatcher, evt: ClusterEvent) {
    match evt {
        ClusterEvent::Snapshot(membership) => watcher.on_membership_snapshot(&membership),
        ClusterEvent::MembershipChange(change) => watcher.on_membership_changed(&change),
        // reachability is the downing strategy's business: only 'down' matters here
        ClusterEvent::ReachabilityChange(_) | ClusterEvent::LeadershipChange(_) => {}
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::actor_ref::SystemMessage;
    use crate::cluster::membership::MemberStatus::*;
    use crate::test_util::node::{test_address, test_node_from_number};
    use rstest::rstest;
    use std::time::Duration;
    use tokio::time;

    const MYSELF: u16 = 1;

    async fn new_cluster() -> Arc<ClusterEventNotifier> {
        let notifier = Arc::new(ClusterEventNotifier::new(16));
        for n in [1, 2, 3] {
            notifier.join(test_node_from_number(n)).await;
            notifier.mark(&test_node_from_number(n), Up).await.unwrap();
        }
        notifier
    }

    async fn start(notifier: Arc<ClusterEventNotifier>) -> NodeDeathWatcherHandle {
        let config = Arc::new(ClusterConfig::new(test_node_from_number(MYSELF)));
        let (shell, handle) = NodeDeathWatcherShell::new(config, notifier).await;
        tokio::spawn(shell.run());
        handle
    }

    fn tracking(tracker: &mpsc::UnboundedSender<UniqueNode>) -> impl Fn(UniqueNode) -> std::future::Ready<()> + Send + Sync + 'static {
        let tracker = tracker.clone();
        move |node| {
            let _ = tracker.send(node);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_then_down_via_cluster_events() {
        let notifier = new_cluster().await;
        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
        notifier.mark(&test_node_from_number(2), Down).await.unwrap();

        assert_eq!(recv.recv().await, Some(test_node_from_number(2)));

        notifier.mark(&test_node_from_number(2), Removed).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        assert!(recv.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_watch_is_answered_immediately() {
        let notifier = new_cluster().await;
        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        notifier.mark(&test_node_from_number(3), Down).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        handle.watch_node(test_node_from_number(3), test_address(MYSELF, "late"), tracking(&send)).await.unwrap();
        assert_eq!(recv.recv().await, Some(test_node_from_number(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_down_before_startup_is_tombstoned() {
        let notifier = new_cluster().await;
        notifier.mark(&test_node_from_number(2), Down).await.unwrap();

        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
        assert_eq!(recv.recv().await, Some(test_node_from_number(2)));
    }

    /// every interleaving of 'watch' and 'down' in the watcher's queue results in exactly one
    ///  notification
    #[rstest]
    #[case::watch_first(true)]
    #[case::down_first(false)]
    #[tokio::test(start_paused = true)]
    async fn test_race_between_watch_and_down(#[case] watch_first: bool) {
        let notifier = new_cluster().await;
        let handle = start(notifier).await;
        let (send, mut recv) = mpsc::unbounded_channel();
        let down = MembershipChange::new(test_node_from_number(2), Some(Up), Down);

        if watch_first {
            handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
            handle.membership_change(down).await.unwrap();
        }
        else {
            handle.membership_change(down).await.unwrap();
            handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
        }
        handle.membership_change(down).await.unwrap();

        assert_eq!(recv.recv().await, Some(test_node_from_number(2)));
        time::sleep(Duration::from_secs(1)).await;
        assert!(recv.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_watcher() {
        let notifier = new_cluster().await;
        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
        handle.watch_node(test_node_from_number(3), test_address(MYSELF, "b"), tracking(&send)).await.unwrap();
        handle.remove_watcher(test_address(MYSELF, "a")).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        notifier.mark(&test_node_from_number(2), Down).await.unwrap();
        notifier.mark(&test_node_from_number(3), Down).await.unwrap();

        assert_eq!(recv.recv().await, Some(test_node_from_number(3)));
        time::sleep(Duration::from_secs(1)).await;
        assert!(recv.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_remote_actor() {
        let notifier = new_cluster().await;
        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        handle.watch_remote_actor(WatcherRef::new(test_address(MYSELF, "a"), send), test_node_from_number(2)).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        notifier.mark(&test_node_from_number(2), Down).await.unwrap();

        assert_eq!(recv.recv().await, Some(SystemMessage::NodeTerminated(test_node_from_number(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_after_lag() {
        let notifier = Arc::new(ClusterEventNotifier::new(2));
        for n in 1..=10 {
            notifier.join(test_node_from_number(n)).await;
        }
        let handle = start(notifier.clone()).await;
        let (send, mut recv) = mpsc::unbounded_channel();

        handle.watch_node(test_node_from_number(2), test_address(MYSELF, "a"), tracking(&send)).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        // more events than the broadcast buffer holds, without giving the watcher a chance to run
        for n in 2..=10 {
            notifier.mark(&test_node_from_number(n), Up).await.unwrap();
        }
        notifier.mark(&test_node_from_number(2), Down).await.unwrap();
        for n in 3..=10 {
            notifier.mark(&test_node_from_number(n), Leaving).await.unwrap();
        }

        assert_eq!(recv.recv().await, Some(test_node_from_number(2)));
    }

    #[tokio::test]
    async fn test_handle_fails_when_stopped() {
        let notifier = new_cluster().await;
        let config = Arc::new(ClusterConfig::new(test_node_from_number(MYSELF)));
        let (shell, handle) = NodeDeathWatcherShell::new(config, notifier).await;
        drop(shell);

        assert!(handle.remove_watcher(test_address(MYSELF, "a")).await.is_err());
    }
}

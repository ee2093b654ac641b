use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::cluster::cluster_control::ClusterControl;
use crate::cluster::membership::{LeadershipChange, Member, MemberStatus, Membership, MembershipChange, MembershipError, Reachability, ReachabilityChange};
use crate::cluster::unique_node::UniqueNode;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterEvent {
    /// the full membership, sent to (re-)synchronize a subscriber
    Snapshot(Membership),
    MembershipChange(MembershipChange),
    ReachabilityChange(ReachabilityChange),
    LeadershipChange(LeadershipChange),
}


/// The [ClusterEventNotifier] is the local source of truth for membership as far as this crate
///  is concerned: the membership layer feeds changes into it, and it publishes the *effective*
///  changes to all subscribers in the order they were applied.
///
/// Subscribers receive the current snapshot together with their subscription, so there is no
///  gap between the snapshot and the first event.
pub struct ClusterEventNotifier {
    sender: broadcast::Sender<ClusterEvent>,
    membership: RwLock<Membership>,
}
impl ClusterEventNotifier {
    pub fn new(buffer_size: usize) -> ClusterEventNotifier {
        let (sender, _) = broadcast::channel(buffer_size);

        ClusterEventNotifier {
            sender,
            membership: Default::default(),
        }
    }

    pub async fn subscribe(&self) -> (Membership, broadcast::Receiver<ClusterEvent>) {
        // holding the read lock ensures no event is sent between taking the snapshot and subscribing
        let membership = self.membership.read().await;
        (membership.clone(), self.sender.subscribe())
    }

    pub async fn snapshot(&self) -> Membership {
        self.membership.read().await.clone()
    }

    pub async fn join(&self, node: UniqueNode) -> Option<MembershipChange> {
        let mut membership = self.membership.write().await;
        let change = membership.join(node);
        if let Some(change) = change {
            self.send_event(ClusterEvent::MembershipChange(change));
        }
        change
    }

    pub async fn mark(&self, node: &UniqueNode, status: MemberStatus) -> Result<Option<MembershipChange>, MembershipError> {
        let mut membership = self.membership.write().await;
        let change = membership.mark(node, status)?;
        if let Some(change) = change {
            self.send_event(ClusterEvent::MembershipChange(change));
        }
        Ok(change)
    }

    pub async fn apply_membership_change(&self, change: &MembershipChange) -> Option<MembershipChange> {
        let mut membership = self.membership.write().await;
        let change = membership.apply_membership_change(change);
        if let Some(change) = change {
            self.send_event(ClusterEvent::MembershipChange(change));
        }
        change
    }

    pub async fn set_reachability(&self, node: &UniqueNode, reachability: Reachability) -> Result<Option<Member>, MembershipError> {
        let mut membership = self.membership.write().await;
        let member = match membership.member(node) {
            Some(m) => m.with_reachability(reachability),
            None => return Err(MembershipError::UnknownNode(*node)),
        };

        let updated = membership.apply_reachability_change(&ReachabilityChange { member });
        if let Some(member) = updated {
            self.send_event(ClusterEvent::ReachabilityChange(ReachabilityChange { member }));
        }
        Ok(updated)
    }

    pub async fn set_leader(&self, node: Option<&UniqueNode>) -> Result<Option<LeadershipChange>, MembershipError> {
        let mut membership = self.membership.write().await;
        let new_leader = match node {
            Some(n) => Some(*membership.member(n).ok_or(MembershipError::NonMemberLeaderSelected(*n))?),
            None => None,
        };

        let change = membership.apply_leadership_change(new_leader)?;
        if let Some(change) = change {
            self.send_event(ClusterEvent::LeadershipChange(change));
        }
        Ok(change)
    }

    fn send_event(&self, event: ClusterEvent) {
        trace!("event: {:?}", event);
        // an error only means that there are currently no subscribers
        let _ = self.sender.send(event);
    }
}

/// In-process control plane: a down request is applied to the notifier's membership directly,
///  and the resulting change is published like any other.
#[async_trait]
impl ClusterControl for ClusterEventNotifier {
    async fn request_down(&self, member: &Member) -> anyhow::Result<()> {
        match self.mark(&member.node, MemberStatus::Down).await? {
            Some(change) => debug!("marked {:?} as down: {:?}", member.node, change),
            None => debug!("{:?} is already down", member.node),
        }
        Ok(())
    }
}

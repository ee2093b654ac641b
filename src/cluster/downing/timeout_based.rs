use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::cluster::cluster_events::ClusterEvent;
use crate::cluster::downing::downing_strategy::{DowningStrategy, DowningStrategyDirective, DowningStrategyMessage, TimerKey};
use crate::cluster::membership::{LeadershipChange, Member, MemberStatus, Membership, ReachabilityChange};
use crate::cluster::unique_node::UniqueNode;


#[derive(Debug, Clone)]
pub struct TimeoutBasedDowningStrategySettings {
    /// how long a member must remain unreachable before it is declared down
    pub down_unreachable_members_after: Duration,
}
impl Default for TimeoutBasedDowningStrategySettings {
    fn default() -> Self {
        TimeoutBasedDowningStrategySettings {
            down_unreachable_members_after: Duration::from_secs(1),
        }
    }
}


/// [TimeoutBasedDowningStrategy] declares a member down once it has been unreachable for a
///  configured period, without it becoming reachable again in between.
///
/// Only the leader acts on the decision. Other nodes remember members whose timeout expired, and
///  mark them down if and when they become leader themselves.
///
/// NB: This strategy does not protect against network partitions: each side of a partition may
///  elect a leader of its own, and both would down the other side.
#[derive(Debug)]
pub struct TimeoutBasedDowningStrategy {
    settings: TimeoutBasedDowningStrategySettings,
    self_node: UniqueNode,
    membership: Membership,
    /// members with a running timer
    unreachable: BTreeMap<UniqueNode, Member>,
    /// members whose timer expired while this node was not the leader
    pending_down: BTreeMap<UniqueNode, Member>,
}
impl TimeoutBasedDowningStrategy {
    pub fn new(settings: TimeoutBasedDowningStrategySettings, self_node: UniqueNode) -> TimeoutBasedDowningStrategy {
        TimeoutBasedDowningStrategy {
            settings,
            self_node,
            membership: Membership::empty(),
            unreachable: Default::default(),
            pending_down: Default::default(),
        }
    }

    fn is_leader(&self) -> bool {
        self.membership.is_leader(&self.self_node)
    }

    /// Replaces the membership, and reconciles tracked members with it: timers of members that
    ///  are no longer candidates for downing are canceled, and timers are started for unreachable
    ///  members that are not tracked yet.
    fn on_snapshot(&mut self, snapshot: &Membership) -> DowningStrategyDirective {
        self.membership = snapshot.clone();
        let mut directives = Vec::new();

        let membership = &self.membership;
        let stale = self.unreachable.keys()
            .filter(|node| !is_downing_candidate(membership, node))
            .copied()
            .collect::<Vec<_>>();
        for node in stale {
            debug!("{:?} is no longer unreachable after re-synchronizing", node);
            self.unreachable.remove(&node);
            directives.push(DowningStrategyDirective::CancelTimer { key: TimerKey::for_node(&node) });
        }
        self.pending_down.retain(|node, _| is_downing_candidate(membership, node));

        for member in self.membership.members() {
            if is_downing_candidate(&self.membership, &member.node)
                && !self.unreachable.contains_key(&member.node)
                && !self.pending_down.contains_key(&member.node)
            {
                self.unreachable.insert(member.node, *member);
                directives.push(self.start_timer(*member));
            }
        }

        if self.is_leader() && !self.pending_down.is_empty() {
            directives.push(self.mark_pending_as_down());
        }

        DowningStrategyDirective::all(directives)
    }

    fn start_timer(&self, member: Member) -> DowningStrategyDirective {
        DowningStrategyDirective::StartTimer {
            key: TimerKey::for_node(&member.node),
            message: DowningStrategyMessage::Timeout(member),
            delay: self.settings.down_unreachable_members_after,
        }
    }

    fn mark_pending_as_down(&mut self) -> DowningStrategyDirective {
        info!("this node is leader - downing members that timed out before: {:?}", self.pending_down.keys());
        let members = std::mem::take(&mut self.pending_down)
            .into_values()
            .collect();
        DowningStrategyDirective::MarkAsDown(members)
    }

    fn on_member_written_off(&mut self, node: &UniqueNode) -> DowningStrategyDirective {
        self.pending_down.remove(node);
        if self.unreachable.remove(node).is_some() {
            debug!("{:?} was written off elsewhere - no need to down it", node);
            DowningStrategyDirective::CancelTimer { key: TimerKey::for_node(node) }
        }
        else {
            DowningStrategyDirective::None
        }
    }

    fn on_leadership_change(&mut self, change: &LeadershipChange) -> anyhow::Result<DowningStrategyDirective> {
        self.membership.apply_leadership_change(change.new_leader)?;

        if self.is_leader() && !self.pending_down.is_empty() {
            return Ok(self.mark_pending_as_down());
        }
        Ok(DowningStrategyDirective::None)
    }

    fn on_reachability_change(&mut self, change: &ReachabilityChange) -> DowningStrategyDirective {
        let node = change.member.node;
        if self.membership.member(&node).is_none() {
            debug!("reachability change for {:?} which is not a member - ignoring", node);
            return DowningStrategyDirective::None;
        }
        self.membership.apply_reachability_change(change);

        // the event's status may be stale, the membership's is current
        let member = match self.membership.member(&node) {
            Some(m) => *m,
            None => return DowningStrategyDirective::None,
        };
        if member.status.is_terminal() {
            return DowningStrategyDirective::None;
        }

        if member.is_reachable() {
            self.pending_down.remove(&node);
            if self.unreachable.remove(&node).is_some() {
                return DowningStrategyDirective::CancelTimer { key: TimerKey::for_node(&node) };
            }
            DowningStrategyDirective::None
        }
        else if self.unreachable.contains_key(&node) || self.pending_down.contains_key(&node) {
            trace!("{:?} is already tracked as unreachable", node);
            DowningStrategyDirective::None
        }
        else {
            self.unreachable.insert(node, member);
            self.start_timer(member)
        }
    }
}

/// true iff the node is a member that is unreachable and not yet written off
fn is_downing_candidate(membership: &Membership, node: &UniqueNode) -> bool {
    membership.member(node)
        .map(|m| !m.is_reachable() && !m.status.is_terminal())
        .unwrap_or(false)
}

impl DowningStrategy for TimeoutBasedDowningStrategy {
    fn on_cluster_event(&mut self, event: &ClusterEvent) -> anyhow::Result<DowningStrategyDirective> {
        match event {
            ClusterEvent::Snapshot(snapshot) => Ok(self.on_snapshot(snapshot)),
            ClusterEvent::MembershipChange(change) => {
                let change = match self.membership.apply_membership_change(change) {
                    Some(c) => c,
                    None => return Ok(DowningStrategyDirective::None),
                };

                let mut directives = Vec::new();
                if let Some(replaced) = &change.replaced {
                    directives.push(self.on_member_written_off(&replaced.node));
                }
                if change.is_at_least(MemberStatus::Down) {
                    directives.push(self.on_member_written_off(&change.node));
                }
                Ok(DowningStrategyDirective::all(directives))
            }
            ClusterEvent::ReachabilityChange(change) => Ok(self.on_reachability_change(change)),
            ClusterEvent::LeadershipChange(change) => self.on_leadership_change(change),
        }
    }

    fn on_timeout(&mut self, member: &Member) -> DowningStrategyDirective {
        let member = match self.unreachable.remove(&member.node) {
            Some(m) => m,
            None => {
                debug!("timeout for {:?} which is no longer tracked - ignoring", member.node);
                return DowningStrategyDirective::None;
            }
        };
        if !is_downing_candidate(&self.membership, &member.node) {
            debug!("timeout for {:?} which is no longer unreachable - ignoring", member.node);
            return DowningStrategyDirective::None;
        }

        if self.is_leader() {
            info!("{:?} was unreachable for {:?} - downing it", member.node, self.settings.down_unreachable_members_after);
            DowningStrategyDirective::mark_as_down(member)
        }
        else {
            debug!("{:?} was unreachable for {:?}, but this node is not the leader - deferring", member.node, self.settings.down_unreachable_members_after);
            self.pending_down.insert(member.node, member);
            DowningStrategyDirective::None
        }
    }
}

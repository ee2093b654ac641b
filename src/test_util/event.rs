use crate::cluster::cluster_events::ClusterEvent;
use crate::cluster::membership::{LeadershipChange, MemberStatus, Membership, MembershipChange, Reachability, ReachabilityChange};
use crate::test_util::node::{test_member, test_node_from_number};


/// A snapshot with the given members (all reachable) and leader. Panics if the leader is not
///  one of the members.
pub fn test_snapshot_evt(members: &[(u16, MemberStatus)], leader: Option<u16>) -> ClusterEvent {
    let mut membership = Membership::empty();
    for &(n, status) in members {
        membership.apply_membership_change(&MembershipChange::new(test_node_from_number(n), None, status));
    }
    if let Some(leader) = leader {
        let leader = *membership.member(&test_node_from_number(leader))
            .unwrap_or_else(|| panic!("leader {} is not a member", leader));
        if let Err(e) = membership.apply_leadership_change(Some(leader)) {
            panic!("{}", e);
        }
    }
    ClusterEvent::Snapshot(membership)
}

pub fn test_status_evt(number: u16, from: MemberStatus, to: MemberStatus) -> ClusterEvent {
    ClusterEvent::MembershipChange(MembershipChange::new(test_node_from_number(number), Some(from), to))
}

pub fn test_down_evt(number: u16) -> ClusterEvent {
    test_status_evt(number, MemberStatus::Up, MemberStatus::Down)
}

/// reachability change for a member that is 'up'
pub fn test_reachability_evt(number: u16, is_reachable: bool) -> ClusterEvent {
    let reachability = if is_reachable { Reachability::Reachable } else { Reachability::Unreachable };
    ClusterEvent::ReachabilityChange(ReachabilityChange {
        member: test_member(number, MemberStatus::Up).with_reachability(reachability),
    })
}

/// leadership change between members that are 'up'
pub fn test_leader_evt(old_leader: Option<u16>, new_leader: Option<u16>) -> ClusterEvent {
    ClusterEvent::LeadershipChange(LeadershipChange {
        old_leader: old_leader.map(|n| test_member(n, MemberStatus::Up)),
        new_leader: new_leader.map(|n| test_member(n, MemberStatus::Up)),
    })
}

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use tracing::{trace, warn};

use crate::cluster::unique_node::UniqueNode;


/// see https://doc.akka.io/docs/akka/current/typed/cluster-membership.html
///
/// The order of the variants is significant: comparisons test a status' rank, so
///  `status >= MemberStatus::Down` matches both `Down` and `Removed`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MemberStatus {
    /// A node has registered its wish to join the cluster, but it is not yet a full member
    Joining = 1,
    /// The regular state for a node that is 'up and running'. Note that reachability is
    ///  orthogonal to the status, so a node can be 'up' but (temporarily) unreachable.
    Up = 2,
    /// A node transitions to 'Leaving' when it starts to leave the cluster gracefully, typically
    ///  as part of its shutdown.
    Leaving = 3,
    /// 'Down' is not part of a node's regular lifecycle, it is assigned to nodes that the
    ///  cluster decided to write off (e.g. after they were unreachable for too long). The
    ///  transition to 'Down' is irreversible.
    Down = 4,
    /// Tombstone status: the node ceases to exist for all intents and purposes. Members are
    ///  dropped from a [Membership] once they are removed.
    Removed = 5,
}
impl MemberStatus {
    pub fn is_at_least(&self, status: MemberStatus) -> bool {
        *self >= status
    }

    /// 'down' or 'removed', i.e. the node is written off
    pub fn is_terminal(&self) -> bool {
        self.is_at_least(MemberStatus::Down)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Member {
    pub node: UniqueNode,
    pub status: MemberStatus,
    pub reachability: Reachability,
}
impl Member {
    pub fn new(node: UniqueNode, status: MemberStatus) -> Member {
        Member {
            node,
            status,
            reachability: Reachability::Reachable,
        }
    }

    pub fn with_reachability(self, reachability: Reachability) -> Member {
        Member { reachability, ..self }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }
}

/// A single member's transition between two snapshots of a [Membership]. `previous_status` is
///  `None` for a member that was not known before.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MembershipChange {
    pub node: UniqueNode,
    pub previous_status: Option<MemberStatus>,
    pub status: MemberStatus,
    /// set if `node` took over the endpoint of an older incarnation, which is written off as
    ///  part of this change
    pub replaced: Option<Member>,
}
impl MembershipChange {
    pub fn new(node: UniqueNode, previous_status: Option<MemberStatus>, status: MemberStatus) -> MembershipChange {
        MembershipChange {
            node,
            previous_status,
            status,
            replaced: None,
        }
    }

    pub fn is_at_least(&self, status: MemberStatus) -> bool {
        self.status.is_at_least(status)
    }

    pub fn is_replacement(&self) -> bool {
        self.replaced.is_some()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReachabilityChange {
    /// the member with its *new* reachability
    pub member: Member,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LeadershipChange {
    pub old_leader: Option<Member>,
    pub new_leader: Option<Member>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MembershipDiff {
    pub changes: Vec<MembershipChange>,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MembershipError {
    #[error("node {0:?} is not a member of the cluster")]
    UnknownNode(UniqueNode),
    #[error("attempted to select non-member {0:?} as leader")]
    NonMemberLeaderSelected(UniqueNode),
}


/// A snapshot of all known members of the cluster, keyed (and ordered) by [UniqueNode].
///
/// Status transitions are monotonous: a [Membership] silently ignores any attempt to move a
///  member backward in its lifecycle.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Membership {
    members: BTreeMap<UniqueNode, Member>,
    leader: Option<UniqueNode>,
}
impl Membership {
    pub fn empty() -> Membership {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, node: &UniqueNode) -> Option<&Member> {
        self.members.get(node)
    }

    pub fn members(&self) -> impl Iterator<Item=&Member> {
        self.members.values()
    }

    /// returns the member currently registered for an endpoint, regardless of its incarnation
    pub fn member_at_endpoint(&self, node: &UniqueNode) -> Option<&Member> {
        self.members.values()
            .find(|m| m.node.endpoint == node.endpoint)
    }

    pub fn leader(&self) -> Option<&Member> {
        self.leader.as_ref()
            .and_then(|l| self.members.get(l))
    }

    pub fn is_leader(&self, node: &UniqueNode) -> bool {
        self.leader.as_ref() == Some(node)
    }

    /// Adds a node as 'joining'. If an older incarnation of the node is still registered for
    ///  the same endpoint, it is replaced (and dropped from the membership).
    pub fn join(&mut self, node: UniqueNode) -> Option<MembershipChange> {
        if self.members.contains_key(&node) {
            return None;
        }

        let replaced = self.member_at_endpoint(&node)
            .copied()
            .filter(|m| m.node.is_other_incarnation_of(&node));
        if let Some(replaced) = &replaced {
            self.drop_member(&replaced.node);
        }

        self.members.insert(node, Member::new(node, MemberStatus::Joining));
        Some(MembershipChange {
            node,
            previous_status: None,
            status: MemberStatus::Joining,
            replaced,
        })
    }

    /// Moves a known member to a new status, returning the effective change (if any). Moving a
    ///  member backward in its lifecycle is not an effective change.
    pub fn mark(&mut self, node: &UniqueNode, status: MemberStatus) -> Result<Option<MembershipChange>, MembershipError> {
        let existing = match self.members.get_mut(node) {
            Some(m) => m,
            None => return Err(MembershipError::UnknownNode(*node)),
        };

        if existing.status >= status {
            trace!("ignoring transition of {:?} from {:?} to {:?}", node, existing.status, status);
            return Ok(None);
        }

        if status == MemberStatus::Removed {
            return Ok(self.remove_completely(node));
        }

        let previous_status = existing.status;
        existing.status = status;
        Ok(Some(MembershipChange::new(*node, Some(previous_status), status)))
    }

    pub fn mark_down(&mut self, node: &UniqueNode) -> Result<Option<MembershipChange>, MembershipError> {
        self.mark(node, MemberStatus::Down)
    }

    /// Drops a member from the membership, returning the corresponding 'removed' change if the
    ///  member was known.
    pub fn remove_completely(&mut self, node: &UniqueNode) -> Option<MembershipChange> {
        self.drop_member(node)
            .map(|m| MembershipChange::new(*node, Some(m.status), MemberStatus::Removed))
    }

    fn drop_member(&mut self, node: &UniqueNode) -> Option<Member> {
        if self.leader.as_ref() == Some(node) {
            self.leader = None;
        }
        self.members.remove(node)
    }

    /// Applies a change that was observed elsewhere (e.g. received from the membership layer).
    ///  The returned change reflects what actually changed in this snapshot: `None` if the
    ///  change is a duplicate, stale or would move a member backward.
    pub fn apply_membership_change(&mut self, change: &MembershipChange) -> Option<MembershipChange> {
        let replaced = change.replaced
            .and_then(|r| self.drop_member(&r.node));

        if change.status == MemberStatus::Removed {
            return match self.remove_completely(&change.node) {
                Some(removal) => Some(MembershipChange { replaced, ..removal }),
                None => replaced.map(|r| MembershipChange {
                    node: change.node,
                    previous_status: None,
                    status: MemberStatus::Removed,
                    replaced: Some(r),
                }),
            };
        }

        match self.members.entry(change.node) {
            Entry::Occupied(mut e) => {
                let previous_status = e.get().status;
                if previous_status > change.status {
                    warn!("rejecting backward transition of {:?} from {:?} to {:?}", change.node, previous_status, change.status);
                    return None;
                }
                if previous_status == change.status && replaced.is_none() {
                    return None;
                }
                e.get_mut().status = change.status;
                Some(MembershipChange {
                    node: change.node,
                    previous_status: Some(previous_status),
                    status: change.status,
                    replaced,
                })
            }
            Entry::Vacant(e) => {
                e.insert(Member::new(change.node, change.status));
                Some(MembershipChange {
                    node: change.node,
                    previous_status: None,
                    status: change.status,
                    replaced,
                })
            }
        }
    }

    /// returns the updated member if its reachability actually changed
    pub fn apply_reachability_change(&mut self, change: &ReachabilityChange) -> Option<Member> {
        let member = self.members.get_mut(&change.member.node)?;
        if member.reachability == change.member.reachability {
            return None;
        }
        member.reachability = change.member.reachability;
        Some(*member)
    }

    pub fn apply_leadership_change(&mut self, new_leader: Option<Member>) -> Result<Option<LeadershipChange>, MembershipError> {
        if let Some(l) = &new_leader {
            if !self.members.contains_key(&l.node) {
                return Err(MembershipError::NonMemberLeaderSelected(l.node));
            }
        }

        let new_leader_node = new_leader.map(|l| l.node);
        if new_leader_node == self.leader {
            return Ok(None);
        }

        let old_leader = self.leader().copied();
        self.leader = new_leader_node;
        Ok(Some(LeadershipChange {
            old_leader,
            new_leader: self.leader().copied(),
        }))
    }

    /// Calculates the changes that turn `from` into `to`, ordered by node. Members missing in
    ///  `to` are reported as 'removed'.
    pub fn diff(from: &Membership, to: &Membership) -> MembershipDiff {
        let mut changes = Vec::new();

        for (node, member) in &to.members {
            match from.members.get(node) {
                Some(previous) if previous.status == member.status => {}
                Some(previous) => changes.push(MembershipChange::new(*node, Some(previous.status), member.status)),
                None => changes.push(MembershipChange::new(*node, None, member.status)),
            }
        }

        for (node, previous) in &from.members {
            if !to.members.contains_key(node) {
                changes.push(MembershipChange::new(*node, Some(previous.status), MemberStatus::Removed));
            }
        }

        MembershipDiff { changes }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::node::{test_member, test_node_from_number, test_replacement_node};
    use rstest::rstest;
    use MemberStatus::*;

    fn membership_with(members: &[(u16, MemberStatus)]) -> Membership {
        let mut membership = Membership::empty();
        for &(n, status) in members {
            membership.apply_membership_change(&MembershipChange::new(test_node_from_number(n), None, status));
        }
        membership
    }

    #[rstest]
    #[case(Joining, Joining, true)]
    #[case(Up, Joining, true)]
    #[case(Joining, Up, false)]
    #[case(Leaving, Down, false)]
    #[case(Down, Down, true)]
    #[case(Removed, Down, true)]
    fn test_status_is_at_least(#[case] status: MemberStatus, #[case] threshold: MemberStatus, #[case] expected: bool) {
        assert_eq!(status.is_at_least(threshold), expected);
    }

    #[rstest]
    #[case(Joining, false)]
    #[case(Up, false)]
    #[case(Leaving, false)]
    #[case(Down, true)]
    #[case(Removed, true)]
    fn test_status_is_terminal(#[case] status: MemberStatus, #[case] expected: bool) {
        assert_eq!(status.is_terminal(), expected);
    }

    #[test]
    fn test_status_primitive_conversion() {
        assert_eq!(u8::from(Down), 4);
        assert_eq!(MemberStatus::try_from(2u8).unwrap(), Up);
        assert!(MemberStatus::try_from(9u8).is_err());
    }

    #[rstest]
    #[case::forward(Up, Down, Some(Some(Up)))]
    #[case::skip(Joining, Leaving, Some(Some(Joining)))]
    #[case::same(Up, Up, None)]
    #[case::backward(Down, Up, None)]
    #[case::backward_from_leaving(Leaving, Joining, None)]
    fn test_apply_membership_change_is_monotonous(#[case] initial: MemberStatus, #[case] new_status: MemberStatus, #[case] expected_previous: Option<Option<MemberStatus>>) {
        let mut membership = membership_with(&[(1, initial)]);
        let node = test_node_from_number(1);

        let change = membership.apply_membership_change(&MembershipChange::new(node, Some(initial), new_status));
        assert_eq!(change.map(|c| c.previous_status), expected_previous);

        let expected_status = if expected_previous.is_some() { new_status } else { initial };
        assert_eq!(membership.member(&node).unwrap().status, expected_status);
    }

    #[test]
    fn test_apply_membership_change_unknown_node() {
        let mut membership = Membership::empty();
        let node = test_node_from_number(3);

        let change = membership.apply_membership_change(&MembershipChange::new(node, Some(Up), Down));
        assert_eq!(change, Some(MembershipChange::new(node, None, Down)));
        assert_eq!(membership.member(&node), Some(&Member::new(node, Down)));
    }

    #[test]
    fn test_apply_membership_change_removal() {
        let mut membership = membership_with(&[(1, Up), (2, Down)]);

        let change = membership.apply_membership_change(&MembershipChange::new(test_node_from_number(2), Some(Down), Removed));
        assert_eq!(change, Some(MembershipChange::new(test_node_from_number(2), Some(Down), Removed)));
        assert!(membership.member(&test_node_from_number(2)).is_none());
        assert_eq!(membership.len(), 1);

        // removing an unknown node is not an effective change
        let change = membership.apply_membership_change(&MembershipChange::new(test_node_from_number(2), Some(Down), Removed));
        assert_eq!(change, None);
    }

    #[rstest]
    #[case::forward(Up, Down, Ok(Some(MembershipChange::new(test_node_from_number(1), Some(Up), Down))))]
    #[case::same(Down, Down, Ok(None))]
    #[case::backward(Leaving, Up, Ok(None))]
    #[case::removed(Down, Removed, Ok(Some(MembershipChange::new(test_node_from_number(1), Some(Down), Removed))))]
    fn test_mark(#[case] initial: MemberStatus, #[case] status: MemberStatus, #[case] expected: Result<Option<MembershipChange>, MembershipError>) {
        let mut membership = membership_with(&[(1, initial)]);
        assert_eq!(membership.mark(&test_node_from_number(1), status), expected);
    }

    #[test]
    fn test_mark_unknown_node() {
        let mut membership = membership_with(&[(1, Up)]);
        assert_eq!(
            membership.mark_down(&test_node_from_number(2)),
            Err(MembershipError::UnknownNode(test_node_from_number(2))),
        );
    }

    #[test]
    fn test_join() {
        let mut membership = Membership::empty();
        let node = test_node_from_number(1);

        assert_eq!(membership.join(node), Some(MembershipChange::new(node, None, Joining)));
        assert_eq!(membership.join(node), None);
        assert_eq!(membership.member(&node).unwrap().status, Joining);
    }

    #[test]
    fn test_join_replaces_old_incarnation() {
        let mut membership = membership_with(&[(1, Up), (2, Up)]);
        let old = test_node_from_number(1);
        let new = test_replacement_node(1);

        let change = membership.join(new).unwrap();
        assert_eq!(change.node, new);
        assert_eq!(change.replaced, Some(test_member(1, Up)));
        assert!(change.is_replacement());

        assert!(membership.member(&old).is_none());
        assert_eq!(membership.member(&new).unwrap().status, Joining);
        assert_eq!(membership.len(), 2);
    }

    #[test]
    fn test_apply_replacement() {
        let mut membership = membership_with(&[(1, Up)]);
        let change = MembershipChange {
            node: test_replacement_node(1),
            previous_status: None,
            status: Up,
            replaced: Some(test_member(1, Up)),
        };

        let effective = membership.apply_membership_change(&change).unwrap();
        assert_eq!(effective.replaced, Some(test_member(1, Up)));
        assert!(membership.member(&test_node_from_number(1)).is_none());

        // applying it again is a duplicate
        assert_eq!(membership.apply_membership_change(&change), None);
    }

    #[test]
    fn test_apply_reachability_change() {
        let mut membership = membership_with(&[(1, Up)]);
        let unreachable = test_member(1, Up).with_reachability(Reachability::Unreachable);

        assert_eq!(membership.apply_reachability_change(&ReachabilityChange { member: unreachable }), Some(unreachable));
        assert_eq!(membership.apply_reachability_change(&ReachabilityChange { member: unreachable }), None);
        assert!(!membership.member(&test_node_from_number(1)).unwrap().is_reachable());

        let unknown = test_member(7, Up).with_reachability(Reachability::Unreachable);
        assert_eq!(membership.apply_reachability_change(&ReachabilityChange { member: unknown }), None);
    }

    #[test]
    fn test_apply_leadership_change() {
        let mut membership = membership_with(&[(1, Up), (2, Up)]);

        let change = membership.apply_leadership_change(Some(test_member(1, Up))).unwrap();
        assert_eq!(change, Some(LeadershipChange { old_leader: None, new_leader: Some(test_member(1, Up)) }));
        assert!(membership.is_leader(&test_node_from_number(1)));

        assert_eq!(membership.apply_leadership_change(Some(test_member(1, Up))), Ok(None));

        let change = membership.apply_leadership_change(Some(test_member(2, Up))).unwrap();
        assert_eq!(change, Some(LeadershipChange { old_leader: Some(test_member(1, Up)), new_leader: Some(test_member(2, Up)) }));
        assert!(!membership.is_leader(&test_node_from_number(1)));
    }

    #[test]
    fn test_apply_leadership_change_non_member() {
        let mut membership = membership_with(&[(1, Up)]);
        assert_eq!(
            membership.apply_leadership_change(Some(test_member(5, Up))),
            Err(MembershipError::NonMemberLeaderSelected(test_node_from_number(5))),
        );
        assert!(membership.leader().is_none());
    }

    #[test]
    fn test_removing_leader_clears_leadership() {
        let mut membership = membership_with(&[(1, Up), (2, Up)]);
        membership.apply_leadership_change(Some(test_member(1, Up))).unwrap();

        membership.remove_completely(&test_node_from_number(1));
        assert!(membership.leader().is_none());
    }

    #[rstest]
    #[case::empty(vec![], vec![], vec![])]
    #[case::added(vec![], vec![(1, Up)], vec![MembershipChange::new(test_node_from_number(1), None, Up)])]
    #[case::unchanged(vec![(1, Up)], vec![(1, Up)], vec![])]
    #[case::changed(vec![(1, Up), (2, Up)], vec![(1, Up), (2, Down)], vec![MembershipChange::new(test_node_from_number(2), Some(Up), Down)])]
    #[case::removed(vec![(1, Up), (2, Leaving)], vec![(1, Up)], vec![MembershipChange::new(test_node_from_number(2), Some(Leaving), Removed)])]
    #[case::mixed(vec![(1, Joining), (3, Up)], vec![(1, Up), (2, Joining)], vec![
        MembershipChange::new(test_node_from_number(1), Some(Joining), Up),
        MembershipChange::new(test_node_from_number(2), None, Joining),
        MembershipChange::new(test_node_from_number(3), Some(Up), Removed),
    ])]
    fn test_diff(#[case] from: Vec<(u16, MemberStatus)>, #[case] to: Vec<(u16, MemberStatus)>, #[case] expected: Vec<MembershipChange>) {
        let from = membership_with(&from);
        let to = membership_with(&to);
        assert_eq!(Membership::diff(&from, &to).changes, expected);
    }

    #[test]
    fn test_diff_applied_yields_target() {
        let from = membership_with(&[(1, Joining), (2, Up), (4, Leaving)]);
        let to = membership_with(&[(1, Up), (2, Down), (3, Joining)]);

        let mut membership = from.clone();
        for change in Membership::diff(&from, &to).changes {
            membership.apply_membership_change(&change);
        }
        assert_eq!(membership, to);
    }
}

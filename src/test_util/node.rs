use std::net::{Ipv4Addr, SocketAddrV4};

use crate::cluster::actor_ref::ActorAddress;
use crate::cluster::membership::{Member, MemberStatus};
use crate::cluster::unique_node::UniqueNode;


/// convenience method for unit test code: create a [UniqueNode] based on a number, the same number
///  generating the same node and different numbers different nodes
pub fn test_node_from_number(number: u16) -> UniqueNode {
    UniqueNode {
        endpoint: SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into(),
        instance_id: number.into(),
    }
}

/// a restarted incarnation of [test_node_from_number] on the same endpoint
pub fn test_replacement_node(number: u16) -> UniqueNode {
    UniqueNode {
        instance_id: u64::from(number) + 1000,
        ..test_node_from_number(number)
    }
}

pub fn test_member(number: u16, status: MemberStatus) -> Member {
    Member::new(test_node_from_number(number), status)
}

pub fn test_address(number: u16, path: &str) -> ActorAddress {
    ActorAddress::new(test_node_from_number(number), path)
}

use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;


/// A node's membership in a cluster is monotonous, so a node can never rejoin once it left (or
///  was downed). To allow a restarted process to rejoin from the same network address, a u64
///  instance id is added to the endpoint for disambiguation.
///
/// No two members ever share a [UniqueNode], not even after a restart on the same endpoint.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct UniqueNode {
    pub endpoint: SocketAddr,
    pub instance_id: u64,
}
impl Hash for UniqueNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instance_id.hash(state);
        match self.endpoint {
            SocketAddr::V4(s) => s.ip().to_bits().hash(state),
            SocketAddr::V6(s) => s.ip().to_bits().hash(state),
        };
        self.endpoint.port().hash(state);
    }
}

impl Debug for UniqueNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}#{}]", self.endpoint, self.instance_id)
    }
}

impl Display for UniqueNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.endpoint, self.instance_id)
    }
}

impl UniqueNode {
    pub fn new(endpoint: SocketAddr, instance_id: u64) -> UniqueNode {
        UniqueNode {
            endpoint,
            instance_id,
        }
    }

    /// true iff `other` is a different incarnation of a process on the same endpoint
    pub fn is_other_incarnation_of(&self, other: &UniqueNode) -> bool {
        self.endpoint == other.endpoint && self.instance_id != other.instance_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rustc_hash::FxHashSet;

    #[rstest]
    #[case::same("127.0.0.1:1000", 1, "127.0.0.1:1000", 1, false)]
    #[case::restarted("127.0.0.1:1000", 1, "127.0.0.1:1000", 2, true)]
    #[case::other_port("127.0.0.1:1000", 1, "127.0.0.1:1001", 2, false)]
    #[case::other_ip("127.0.0.1:1000", 1, "[2001:db8::1]:1000", 2, false)]
    fn test_is_other_incarnation_of(#[case] a_addr: &str, #[case] a_id: u64, #[case] b_addr: &str, #[case] b_id: u64, #[case] expected: bool) {
        let a = UniqueNode::new(a_addr.parse().unwrap(), a_id);
        let b = UniqueNode::new(b_addr.parse().unwrap(), b_id);
        assert_eq!(a.is_other_incarnation_of(&b), expected);
        assert_eq!(b.is_other_incarnation_of(&a), expected);
    }

    #[test]
    fn test_hash_distinguishes_incarnations() {
        let mut set = FxHashSet::default();
        set.insert(UniqueNode::new("127.0.0.1:1000".parse().unwrap(), 1));
        set.insert(UniqueNode::new("127.0.0.1:1000".parse().unwrap(), 2));
        set.insert(UniqueNode::new("127.0.0.1:1000".parse().unwrap(), 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_debug() {
        let node = UniqueNode::new("10.0.0.1:7355".parse().unwrap(), 42);
        assert_eq!(format!("{:?}", node), "[10.0.0.1:7355#42]");
        assert_eq!(format!("{}", node), "10.0.0.1:7355#42");
    }
}

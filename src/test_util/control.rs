use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cluster::cluster_control::ClusterControl;
use crate::cluster::membership::Member;
use crate::cluster::unique_node::UniqueNode;
use crate::test_util::node::test_node_from_number;


/// A [ClusterControl] that records down requests instead of acting on them
#[derive(Debug, Default)]
pub struct TrackingClusterControl {
    tracker: RwLock<Vec<Member>>,
}
impl TrackingClusterControl {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn down_requests(&self) -> Vec<Member> {
        self.tracker.read().await.clone()
    }

    /// asserts the exact sequence of nodes (by number) that down was requested for so far
    pub async fn assert_down_requested(&self, numbers: &[u16]) {
        let actual = self.down_requests().await
            .iter()
            .map(|m| m.node)
            .collect::<Vec<_>>();
        let expected = numbers.iter()
            .map(|&n| test_node_from_number(n))
            .collect::<Vec<UniqueNode>>();
        assert_eq!(actual, expected);
    }

    pub async fn assert_no_down_requests(&self) {
        assert!(
            self.tracker.read().await
                .is_empty()
        );
    }
}

#[async_trait]
impl ClusterControl for TrackingClusterControl {
    async fn request_down(&self, member: &Member) -> anyhow::Result<()> {
        self.tracker.write().await.push(*member);
        Ok(())
    }
}

use async_trait::async_trait;

use crate::cluster::membership::Member;


/// The narrow interface through which this crate affects global cluster state. A down request
///  is best effort: the control plane owns the decision and may deduplicate or reject it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterControl: Send + Sync {
    async fn request_down(&self, member: &Member) -> anyhow::Result<()>;
}

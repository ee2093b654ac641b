use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cluster::cluster_config::ClusterConfig;
use crate::cluster::cluster_control::ClusterControl;
use crate::cluster::cluster_events::ClusterEventNotifier;
use crate::cluster::death_watch::{NodeDeathWatcherHandle, NodeDeathWatcherShell};
use crate::cluster::downing::downing_strategy::DowningStrategy;
use crate::cluster::downing::DowningStrategyShell;


/// Starts and owns the failure handling components of a single node: the node death watcher and
///  the downing strategy, both subscribed to the same [ClusterEventNotifier].
pub struct ClusterSystem {
    config: Arc<ClusterConfig>,
    notifier: Arc<ClusterEventNotifier>,
    death_watcher: NodeDeathWatcherHandle,
    tasks: Vec<JoinHandle<()>>,
}
impl ClusterSystem {
    pub async fn start(config: Arc<ClusterConfig>, notifier: Arc<ClusterEventNotifier>, strategy: Box<dyn DowningStrategy>, control: Arc<dyn ClusterControl>) -> ClusterSystem {
        info!("starting cluster failure handling for {:?}", config.self_node);

        let (death_watcher_shell, death_watcher) = NodeDeathWatcherShell::new(config.clone(), notifier.clone()).await;
        let downing_shell = DowningStrategyShell::new(config.clone(), strategy, notifier.clone(), control).await;

        let tasks = vec![
            tokio::spawn(death_watcher_shell.run()),
            tokio::spawn(downing_shell.run()),
        ];

        ClusterSystem {
            config,
            notifier,
            death_watcher,
            tasks,
        }
    }

    pub fn death_watcher(&self) -> &NodeDeathWatcherHandle {
        &self.death_watcher
    }

    pub fn notifier(&self) -> &Arc<ClusterEventNotifier> {
        &self.notifier
    }

    pub fn shutdown(&mut self) {
        info!("shutting down cluster failure handling for {:?}", self.config.self_node);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
impl Drop for ClusterSystem {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

use std::sync::Arc;

use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::cluster::cluster_config::ClusterConfig;
use crate::cluster::cluster_control::ClusterControl;
use crate::cluster::cluster_events::{ClusterEvent, ClusterEventNotifier};
use crate::cluster::downing::downing_strategy::{DowningStrategy, DowningStrategyDirective, DowningStrategyMessage, TimerKey};
use crate::util::timers::{TimerFired, Timers};

pub mod downing_strategy;
pub mod timeout_based;


/// Drives a [DowningStrategy]: it feeds the strategy cluster events and fired timers, and carries
///  out the directives the strategy returns.
///
/// The shell is the only place where downing decisions have side effects. Down requests go to
///  the [ClusterControl], which owns global membership.
pub struct DowningStrategyShell {
    strategy: Box<dyn DowningStrategy>,
    timers: Timers<TimerKey, DowningStrategyMessage>,
    timer_recv: mpsc::Receiver<TimerFired<TimerKey, DowningStrategyMessage>>,
    initial_snapshot: Option<ClusterEvent>,
    cluster_events: broadcast::Receiver<ClusterEvent>,
    notifier: Arc<ClusterEventNotifier>,
    control: Arc<dyn ClusterControl>,
}
impl DowningStrategyShell {
    pub async fn new(config: Arc<ClusterConfig>, strategy: Box<dyn DowningStrategy>, notifier: Arc<ClusterEventNotifier>, control: Arc<dyn ClusterControl>) -> DowningStrategyShell {
        let (snapshot, cluster_events) = notifier.subscribe().await;
        let (timer_send, timer_recv) = mpsc::channel(config.downing_timer_mailbox_size);

        DowningStrategyShell {
            strategy,
            timers: Timers::new(timer_send),
            timer_recv,
            initial_snapshot: Some(ClusterEvent::Snapshot(snapshot)),
            cluster_events,
            notifier,
            control,
        }
    }

    pub async fn run(mut self) {
        info!("starting downing strategy {:?}", self.strategy);

        if let Some(snapshot) = self.initial_snapshot.take() {
            self.on_cluster_event(&snapshot).await;
        }

        loop {
            select! {
                evt = self.cluster_events.recv() => {
                    match evt {
                        Ok(evt) => self.on_cluster_event(&evt).await,
                        Err(RecvError::Lagged(num_missed)) => {
                            warn!("downing strategy missed {} cluster events - re-synchronizing from snapshot", num_missed);
                            let snapshot = self.notifier.snapshot().await;
                            self.on_cluster_event(&ClusterEvent::Snapshot(snapshot)).await;
                        }
                        Err(RecvError::Closed) => {
                            error!("cluster event stream was closed - shutting down downing strategy");
                            return;
                        }
                    }
                }
                fired = self.timer_recv.recv() => {
                    // the shell holds a sender through its timers, so the channel is never closed
                    if let Some(fired) = fired {
                        self.on_timer(fired).await;
                    }
                }
            }
        }
    }

    async fn on_cluster_event(&mut self, evt: &ClusterEvent) {
        match self.strategy.on_cluster_event(evt) {
            Ok(directive) => self.interpret(directive).await,
            Err(e) => warn!("error while handling cluster event {:?}: {:#}", evt, e),
        }
    }

    async fn on_timer(&mut self, fired: TimerFired<TimerKey, DowningStrategyMessage>) {
        if let Some(DowningStrategyMessage::Timeout(member)) = self.timers.accept(fired) {
            let directive = self.strategy.on_timeout(&member);
            self.interpret(directive).await;
        }
    }

    async fn interpret(&mut self, directive: DowningStrategyDirective) {
        for directive in directive.into_directives() {
            self.interpret_single(directive).await;
        }
    }

    async fn interpret_single(&mut self, directive: DowningStrategyDirective) {
        match directive {
            DowningStrategyDirective::None | DowningStrategyDirective::Multiple(_) => {}
            DowningStrategyDirective::MarkAsDown(members) => {
                info!("downing strategy {:?} decided to mark {:?} as down", self.strategy, members.iter().map(|m| m.node).collect::<Vec<_>>());
                for member in members {
                    if let Err(e) = self.control.request_down(&member).await {
                        warn!("failed to request down for {:?}: {:#}", member.node, e);
                    }
                }
            }
            DowningStrategyDirective::StartTimer { key, message, delay } => {
                trace!("starting timer {:?} for {:?}", key, delay);
                self.timers.start_single(key, message, delay);
            }
            DowningStrategyDirective::CancelTimer { key } => {
                if self.timers.cancel(&key) {
                    trace!("canceled timer {:?}", key);
                }
                else {
                    debug!("timer {:?} was not pending", key);
                }
            }
        }
    }
}

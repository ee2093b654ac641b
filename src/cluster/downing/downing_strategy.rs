use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

#[cfg(test)] use mockall::automock;

use crate::cluster::cluster_events::ClusterEvent;
use crate::cluster::membership::Member;
use crate::cluster::unique_node::UniqueNode;


/// A [DowningStrategy] decides *when* members of the cluster should be declared 'down' - e.g.
///  after they were unreachable for some time.
///
/// Strategies do not act on the cluster themselves. They return [DowningStrategyDirective]s
///  that are interpreted by the [crate::cluster::downing::DowningStrategyShell], which makes a
///  strategy a plain function of its own state and the incoming events, and allows testing it
///  without timers or a cluster.
///
/// A strategy is invoked on every node independently, and it is driven by a single message loop,
///  so it can keep mutable state without synchronization.
#[cfg_attr(test, automock)]
pub trait DowningStrategy: Debug + Send {
    /// Invoked for every cluster event. An error is logged by the shell, and the event is
    ///  otherwise ignored.
    fn on_cluster_event(&mut self, event: &ClusterEvent) -> anyhow::Result<DowningStrategyDirective>;

    /// Invoked when a timer started by a [DowningStrategyDirective::StartTimer] directive fires.
    fn on_timeout(&mut self, member: &Member) -> DowningStrategyDirective;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DowningStrategyDirective {
    None,
    /// Members to be marked as down, without duplicates and in a stable order
    MarkAsDown(Vec<Member>),
    StartTimer {
        key: TimerKey,
        message: DowningStrategyMessage,
        delay: Duration,
    },
    CancelTimer {
        key: TimerKey,
    },
    /// Several directives for a single input, interpreted in order. This is what a strategy
    ///  returns when reconciling with a membership snapshot.
    Multiple(Vec<DowningStrategyDirective>),
}
impl DowningStrategyDirective {
    pub fn mark_as_down(member: Member) -> DowningStrategyDirective {
        DowningStrategyDirective::MarkAsDown(vec![member])
    }

    /// Combines directives, dropping `None`s, so that a single remaining directive is returned
    ///  as it is
    pub fn all(directives: Vec<DowningStrategyDirective>) -> DowningStrategyDirective {
        let mut directives = directives.into_iter()
            .flat_map(|d| d.into_directives())
            .collect::<Vec<_>>();

        match directives.len() {
            0 => DowningStrategyDirective::None,
            1 => directives.remove(0),
            _ => DowningStrategyDirective::Multiple(directives),
        }
    }

    /// flattens this directive into the sequence of simple directives it stands for
    pub fn into_directives(self) -> Vec<DowningStrategyDirective> {
        match self {
            DowningStrategyDirective::None => vec![],
            DowningStrategyDirective::Multiple(directives) => directives.into_iter()
                .flat_map(|d| d.into_directives())
                .collect(),
            d => vec![d],
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DowningStrategyMessage {
    Timeout(Member),
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TimerKey(String);
impl TimerKey {
    pub fn new(key: impl Into<String>) -> TimerKey {
        TimerKey(key.into())
    }

    pub fn for_node(node: &UniqueNode) -> TimerKey {
        TimerKey(format!("downing/{}", node))
    }
}
impl Debug for TimerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerKey({})", self.0)
    }
}
impl Display for TimerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

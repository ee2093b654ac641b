use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;


/// A timer's message, posted back to the owning component's queue when the timer fires. It must
///  be passed to [Timers::accept] before acting on it.
#[derive(Debug)]
pub struct TimerFired<K, M> {
    key: K,
    generation: u64,
    message: M,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keyed single-shot timers for a component with its own message loop. A fired timer sends its
///  message to the component's queue rather than running code itself, so all state changes stay
///  inside the component's loop.
///
/// Starting a timer for a key that has a pending timer replaces it. Cancellation is racy by
///  nature (the message may already be in the queue), so every fired message carries the
///  timer's generation, and [Timers::accept] drops messages from timers that were canceled or
///  replaced after firing.
pub struct Timers<K: Clone + Eq + Hash + Debug + Send + 'static, M: Send + 'static> {
    sender: mpsc::Sender<TimerFired<K, M>>,
    pending: FxHashMap<K, PendingTimer>,
    generation_counter: u64,
}
impl <K: Clone + Eq + Hash + Debug + Send + 'static, M: Send + 'static> Timers<K, M> {
    pub fn new(sender: mpsc::Sender<TimerFired<K, M>>) -> Timers<K, M> {
        Timers {
            sender,
            pending: FxHashMap::default(),
            generation_counter: 0,
        }
    }

    pub fn start_single(&mut self, key: K, message: M, delay: Duration) {
        if self.cancel(&key) {
            trace!("replacing pending timer {:?}", key);
        }

        self.generation_counter += 1;
        let generation = self.generation_counter;

        let sender = self.sender.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            // the receiver is gone only if the owning component shut down
            let _ = sender.send(TimerFired { key: fired_key, generation, message }).await;
        });

        self.pending.insert(key, PendingTimer { generation, handle });
    }

    /// returns true iff there was a pending timer for the key
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the fired timer's message if the timer is still the live one for its key, or
    ///  `None` if it was canceled or replaced in the meantime.
    pub fn accept(&mut self, fired: TimerFired<K, M>) -> Option<M> {
        match self.pending.get(&fired.key) {
            Some(timer) if timer.generation == fired.generation => {
                self.pending.remove(&fired.key);
                Some(fired.message)
            }
            _ => {
                trace!("ignoring stale timer {:?}", fired.key);
                None
            }
        }
    }
}
impl <K: Clone + Eq + Hash + Debug + Send + 'static, M: Send + 'static> Drop for Timers<K, M> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

//! Matches queued letters to ready channels: one task behind two FIFOs, as
//! described in SPEC_FULL.md §5 ("never requiring an explicit lock around
//! its two FIFOs" — the lock is replaced by single-task ownership, the way
//! `services/server`'s state machines own their queues behind one task
//! rather than behind a `Mutex`).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::binding::Binding;
use crate::channel_like::ChannelLike;
use crate::event::SocketEvent;
use crate::letter::{Letter, Options};

pub(crate) type ChannelRegistry = Arc<RwLock<std::collections::HashMap<Binding, Arc<dyn ChannelLike>>>>;

/// A handle to the running dispatcher task.
#[derive(Clone)]
pub(crate) struct DispatcherHandle {
    pending_tx: mpsc::UnboundedSender<Letter>,
    pub(crate) ready_tx: mpsc::UnboundedSender<Binding>,
}

impl DispatcherHandle {
    /// Enqueue a fresh letter from the application (`Socket::send`).
    pub(crate) fn send(&self, letter: Letter) -> Result<(), Letter> {
        self.pending_tx.send(letter).map_err(|e| e.0)
    }

    /// Push a unicast letter that failed delivery back onto the pending
    /// queue, per the `FailedToSend` + `Requeue` policy in spec.md §4.6.
    /// The caller is responsible for firing `Requeued`.
    pub(crate) fn requeue(&self, letter: Letter) {
        let _ = self.pending_tx.send(letter);
    }
}

/// Fire `Discarded` unless the letter opted out with `SilentDiscard`.
pub(crate) fn discard(events_tx: &broadcast::Sender<SocketEvent>, binding: Option<Binding>, letter: Letter) {
    if !letter.options.contains(Options::SILENT_DISCARD) {
        let _ = events_tx.send(SocketEvent::Discarded { binding, letter });
    } else {
        trace!("silently discarded a letter");
    }
}

pub(crate) fn spawn(registry: ChannelRegistry, events_tx: broadcast::Sender<SocketEvent>, cancel: CancellationToken) -> DispatcherHandle {
    let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<Letter>();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<Binding>();

    tokio::spawn(async move {
        let mut pending: VecDeque<Letter> = VecDeque::new();
        let mut ready: VecDeque<Binding> = VecDeque::new();
        let mut ready_set: HashSet<Binding> = HashSet::new();

        loop {
            // Match as far as the current state allows before going back
            // to sleep. A multicast letter at the front always matches
            // (it doesn't consume a ready channel); a unicast letter only
            // matches while the ready queue is non-empty.
            loop {
                let is_multicast = match pending.front() {
                    Some(letter) => letter.options.contains(Options::MULTICAST),
                    None => break,
                };

                if is_multicast {
                    let letter = pending.pop_front().expect("front checked above");
                    multicast(&registry, &events_tx, letter).await;
                    continue;
                }

                let Some(binding) = ready.pop_front() else { break };
                ready_set.remove(&binding);
                let letter = pending.pop_front().expect("front checked above");
                unicast(&registry, &events_tx, &mut pending, binding, letter).await;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                letter = pending_rx.recv() => {
                    match letter {
                        Some(letter) => pending.push_back(letter),
                        None => break,
                    }
                }
                binding = ready_rx.recv() => {
                    match binding {
                        Some(binding) => {
                            if ready_set.insert(binding) {
                                ready.push_back(binding);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("dispatcher stopped");
    });

    DispatcherHandle { pending_tx, ready_tx }
}

async fn unicast(registry: &ChannelRegistry, events_tx: &broadcast::Sender<SocketEvent>, pending: &mut VecDeque<Letter>, binding: Binding, letter: Letter) {
    let target = registry.read().await.get(&binding).cloned();
    match target {
        Some(channel) => {
            if let Err(returned) = channel.enqueue(letter) {
                on_unicast_failure(events_tx, pending, returned);
            }
        }
        // The channel disappeared between becoming ready and being matched.
        None => on_unicast_failure(events_tx, pending, letter),
    }
}

fn on_unicast_failure(events_tx: &broadcast::Sender<SocketEvent>, pending: &mut VecDeque<Letter>, letter: Letter) {
    if letter.options.contains(Options::REQUEUE) {
        pending.push_back(letter.clone());
        let _ = events_tx.send(SocketEvent::Requeued { letter });
    } else {
        discard(events_tx, None, letter);
    }
}

async fn multicast(registry: &ChannelRegistry, events_tx: &broadcast::Sender<SocketEvent>, letter: Letter) {
    let targets: Vec<Arc<dyn ChannelLike>> = registry.read().await.values().filter(|c| c.is_connected()).cloned().collect();

    if targets.is_empty() {
        discard(events_tx, None, letter);
        return;
    }

    // Partial failures on fan-out never requeue (spec.md §4.6); each
    // channel reports its own `FailedToSend`, which the socket's outcome
    // loop turns into a per-channel `Discarded`.
    for target in targets {
        let _ = target.enqueue(letter.clone());
    }
}

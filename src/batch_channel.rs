//! The batch decorator over a `Channel`, per spec.md §4.4. It owns the
//! inner channel exclusively: nothing else ever sees the inner
//! `ChannelHandle` once this wraps it, matching the "Batch Channel wraps
//! and exclusively owns an inner Channel" ownership rule in spec.md §3.
//!
//! Buffered user letters are flushed as one `Batch` letter either when the
//! buffer reaches `MaxLettersInBatch`, or — for a second buffer piling up
//! while the first batch is still in flight — when it reaches
//! `MaxExtendedBatchCount`, or opportunistically whenever the inner
//! channel goes idle with a non-empty buffer. The outer `Batch` letter
//! always carries `NoAck`; per-letter `Ack` requested inside a batch is
//! not honored on the wire (spec.md §9, open question, preserved as-is).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::binding::Binding;
use crate::channel::{ChannelHandle, ChannelOutcome, Direction};
use crate::channel_like::ChannelLike;
use crate::letter::{Letter, LetterType};
use crate::node_id::NodeId;
use crate::wire::serialize_letter_frame;

#[derive(Clone)]
pub(crate) struct BatchChannelHandle {
    binding: Binding,
    direction: Direction,
    inner: ChannelHandle,
    user_tx: mpsc::UnboundedSender<Letter>,
    available: watch::Receiver<bool>,
}

impl ChannelLike for BatchChannelHandle {
    fn binding(&self) -> Binding {
        self.binding
    }
    fn direction(&self) -> Direction {
        self.direction
    }
    fn enqueue(&self, letter: Letter) -> Result<(), Letter> {
        self.user_tx.send(letter).map_err(|e| e.0)
    }
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
    fn remote_node_id(&self) -> Option<NodeId> {
        self.inner.remote_node_id()
    }
    fn request_disconnect(&self) {
        self.inner.request_disconnect();
    }
    fn available_receiver(&self) -> watch::Receiver<bool> {
        self.available.clone()
    }
    fn poke_heartbeat(&self) {
        self.inner.poke_heartbeat();
    }
    fn millis_since_last_read(&self) -> u64 {
        self.inner.millis_since_last_read()
    }
    fn force_disconnect_unresponsive(&self) {
        self.inner.force_disconnect_unresponsive();
    }
}

/// Spawn the batching actor over an already-running inner channel. `inner`
/// must have been constructed with `inner_outcomes` as its outcome sink —
/// this task is the only thing that ever drains it, translating inner
/// `Sent`/`FailedToSend(Batch)` outcomes back into one outcome per
/// original letter before forwarding everything else untouched to
/// `outer_outcomes`.
pub(crate) fn spawn(
    inner: ChannelHandle,
    mut inner_outcomes: mpsc::UnboundedReceiver<(Binding, ChannelOutcome)>,
    max_letters_in_batch: usize,
    max_extended_batch_count: usize,
    cancel: CancellationToken,
    outer_outcomes: mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) -> BatchChannelHandle {
    let (user_tx, mut user_rx) = mpsc::unbounded_channel::<Letter>();
    let (available_tx, available_rx) = watch::channel(false);
    let binding = inner.binding;
    let direction = inner.direction;
    let inner_for_task = inner.clone();

    tokio::spawn(async move {
        let mut inner_available = inner_for_task.available_receiver();
        let mut buffer: Vec<Letter> = Vec::new();
        let mut in_flight_batches: VecDeque<Vec<Letter>> = VecDeque::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                letter = user_rx.recv() => {
                    let Some(letter) = letter else { break };
                    // Publish busy then ready around absorbing the letter so a
                    // watcher blocked on `changed()` always sees a fresh edge —
                    // the external handle otherwise only ever toggled once per
                    // connection lifecycle (on Initialized/Disconnected), which
                    // starves the dispatcher's round-robin after the first match.
                    available_tx.send_if_modified(|v| if *v { *v = false; true } else { false });
                    buffer.push(letter);
                    let threshold = if *inner_available.borrow() { max_letters_in_batch } else { max_extended_batch_count };
                    if buffer.len() >= threshold {
                        flush(&mut buffer, &inner_for_task, &mut in_flight_batches, &outer_outcomes, binding);
                    }
                    available_tx.send_if_modified(|v| if !*v { *v = true; true } else { false });
                }

                changed = inner_available.changed() => {
                    if changed.is_err() { break; }
                    if *inner_available.borrow() && !buffer.is_empty() {
                        flush(&mut buffer, &inner_for_task, &mut in_flight_batches, &outer_outcomes, binding);
                    }
                }

                outcome = inner_outcomes.recv() => {
                    let Some((from, outcome)) = outcome else { break };
                    match outcome {
                        ChannelOutcome::Sent(letter) if letter.letter_type == LetterType::Batch => {
                            if let Some(originals) = in_flight_batches.pop_front() {
                                for original in originals {
                                    let _ = outer_outcomes.send((from, ChannelOutcome::Sent(original)));
                                }
                            }
                            // A batch landing frees conceptual capacity; give the
                            // dispatcher a fresh ready edge the same as a drain.
                            available_tx.send_if_modified(|v| if !*v { *v = true; true } else { false });
                        }
                        ChannelOutcome::FailedToSend(letter) if letter.letter_type == LetterType::Batch => {
                            if let Some(originals) = in_flight_batches.pop_front() {
                                for original in originals {
                                    let _ = outer_outcomes.send((from, ChannelOutcome::FailedToSend(original)));
                                }
                            }
                            available_tx.send_if_modified(|v| if !*v { *v = true; true } else { false });
                        }
                        ChannelOutcome::Initialized(node_id) => {
                            available_tx.send_replace(true);
                            let _ = outer_outcomes.send((from, ChannelOutcome::Initialized(node_id)));
                        }
                        ChannelOutcome::Disconnected(reason) => {
                            available_tx.send_replace(false);
                            let _ = outer_outcomes.send((from, ChannelOutcome::Disconnected(reason)));
                        }
                        other => {
                            let _ = outer_outcomes.send((from, other));
                        }
                    }
                }
            }
        }

        // Unwind: anything still buffered or awaiting confirmation never
        // makes it to the wire now.
        for letter in buffer.drain(..) {
            let _ = outer_outcomes.send((binding, ChannelOutcome::FailedToSend(letter)));
        }
        for originals in in_flight_batches.drain(..) {
            for original in originals {
                let _ = outer_outcomes.send((binding, ChannelOutcome::FailedToSend(original)));
            }
        }
        debug!(%binding, "batch channel actor stopped");
    });

    BatchChannelHandle {
        binding,
        direction,
        inner,
        user_tx,
        available: available_rx,
    }
}

fn flush(
    buffer: &mut Vec<Letter>,
    inner: &ChannelHandle,
    in_flight_batches: &mut VecDeque<Vec<Letter>>,
    outer_outcomes: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
    binding: Binding,
) {
    if buffer.is_empty() {
        return;
    }
    let originals = std::mem::take(buffer);
    let serialized: Vec<Vec<u8>> = originals.iter().map(serialize_letter_frame).collect();
    let batch_letter = Letter::batch(serialized);

    if let Err(_unsent) = inner.enqueue(batch_letter) {
        warn!(%binding, "inner channel gone while flushing a batch");
        for original in originals {
            let _ = outer_outcomes.send((binding, ChannelOutcome::FailedToSend(original)));
        }
        return;
    }
    in_flight_batches.push_back(originals);
}

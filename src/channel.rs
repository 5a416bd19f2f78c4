//! The per-connection state machine: one TCP socket, one handshake, one
//! ack-aware write loop, one read loop. Inbound channels are spawned by
//! the listener and terminate on any disconnect; outbound channels are
//! spawned by `Socket::connect` and reconnect with backoff until the
//! caller disconnects them or disposes the socket.
//!
//! Each connection attempt runs its read loop and write loop as two
//! futures raced with `tokio::select!` inside one task rather than as two
//! separate spawned tasks — `select!`'s drop-the-loser semantics already
//! give us "whichever side detects the disconnect first wins, the other
//! unwinds", without a second cross-task cancellation path to wire up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Duration;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binding::Binding;
use crate::config::Config;
use crate::error::DisconnectReason;
use crate::id::LetterId;
use crate::letter::{Letter, LetterType, Options};
use crate::node_id::{next_unit_f64, NodeId};
use crate::wire::LetterCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// What happened on a channel, reported upward to whoever is bridging
/// channel activity into the public event surface (the dispatcher).
#[derive(Debug, Clone)]
pub enum ChannelOutcome {
    Connecting,
    Sent(Letter),
    Received(Letter),
    FailedToSend(Letter),
    Initialized(NodeId),
    Disconnected(DisconnectReason),
}

/// A handle to a running channel engine. Cheap to clone; the engine
/// itself lives in its spawned task and is torn down when its
/// cancellation token fires or it decides to stop on its own (an
/// inbound channel after any disconnect; an outbound channel only after
/// a requested disconnect or socket-wide dispose).
#[derive(Clone)]
pub struct ChannelHandle {
    pub binding: Binding,
    pub direction: Direction,
    inner: Arc<Inner>,
}

struct Inner {
    user_tx: mpsc::UnboundedSender<Letter>,
    lifetime_cancel: CancellationToken,
    force_disconnect: Arc<Notify>,
    remote_node_id: watch::Receiver<Option<NodeId>>,
    available: watch::Receiver<bool>,
    connected: Arc<std::sync::atomic::AtomicBool>,
    last_read_ms: Arc<AtomicU64>,
    heartbeat_trigger: Arc<Notify>,
}

impl ChannelHandle {
    pub fn enqueue(&self, letter: Letter) -> Result<(), Letter> {
        self.inner.user_tx.send(letter).map_err(|e| e.0)
    }

    pub fn remote_node_id(&self) -> Option<NodeId> {
        *self.inner.remote_node_id.borrow()
    }

    pub fn is_available(&self) -> bool {
        *self.inner.available.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Requests a graceful, permanent disconnect: the current attempt
    /// tears down and, for an Outbound channel, no further reconnect is
    /// attempted.
    pub fn request_disconnect(&self) {
        self.inner.lifetime_cancel.cancel();
    }

    /// Called by the heartbeat timer on every tick. Wakes the write loop
    /// so it can decide, on its own, whether it has been idle long
    /// enough to owe the peer a heartbeat.
    pub fn poke_heartbeat(&self) {
        self.inner.heartbeat_trigger.notify_one();
    }

    pub fn millis_since_last_read(&self) -> u64 {
        now_ms().saturating_sub(self.inner.last_read_ms.load(Ordering::Relaxed))
    }

    /// Forces the current attempt down with `Socket` as the reason.
    /// Unlike `request_disconnect`, an Outbound channel reconnects
    /// afterward — used by the heartbeat timer when a peer has gone
    /// silent past `MaxMissed`.
    pub fn force_disconnect_unresponsive(&self) {
        self.inner.force_disconnect.notify_one();
    }

    /// A private watch receiver for the Batch Channel decorator to await
    /// availability edges on, instead of polling `is_available()`.
    pub(crate) fn available_receiver(&self) -> watch::Receiver<bool> {
        self.inner.available.clone()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Spawn an already-accepted TCP connection as an Inbound channel. Runs
/// to completion once; the task exits permanently on disconnect.
pub fn spawn_inbound(
    stream: TcpStream,
    binding: Binding,
    local_node_id: NodeId,
    config: Arc<Config>,
    parent_cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) -> ChannelHandle {
    let (handle, state, user_rx) = new_state(binding, Direction::Inbound, &parent_cancel);
    tokio::spawn(async move {
        let attempt_cancel = state.lifetime_cancel.child_token();
        let (reason, _user_rx) = run_connection(stream, local_node_id, &config, binding, &attempt_cancel, &state, user_rx, &outcomes).await;
        let _ = outcomes.send((binding, ChannelOutcome::Disconnected(reason)));
        debug!(%binding, %reason, "inbound channel terminated");
    });
    handle
}

/// Spawn an outbound dialer. Reconnects with exponential backoff and
/// jitter until the caller disconnects it or the parent token cancels.
pub fn spawn_outbound(
    binding: Binding,
    local_node_id: NodeId,
    config: Arc<Config>,
    parent_cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) -> ChannelHandle {
    let (handle, state, mut user_rx) = new_state(binding, Direction::Outbound, &parent_cancel);
    tokio::spawn(async move {
        let mut backoff = config.connect_backoff_initial;
        loop {
            if state.lifetime_cancel.is_cancelled() {
                break;
            }
            let _ = outcomes.send((binding, ChannelOutcome::Connecting));
            info!(%binding, "dialing");
            let addr: std::net::SocketAddr = binding.into();
            let attempt_cancel = state.lifetime_cancel.child_token();
            let connected = tokio::select! {
                _ = attempt_cancel.cancelled() => break,
                r = TcpStream::connect(addr) => r,
            };
            match connected {
                Ok(stream) => {
                    backoff = config.connect_backoff_initial;
                    let (reason, returned_rx) =
                        run_connection(stream, local_node_id, &config, binding, &attempt_cancel, &state, user_rx, &outcomes).await;
                    user_rx = returned_rx;
                    let _ = outcomes.send((binding, ChannelOutcome::Disconnected(reason)));
                    if reason == DisconnectReason::Requested || state.lifetime_cancel.is_cancelled() {
                        break;
                    }
                }
                Err(e) => warn!(%binding, error = %e, "dial failed"),
            }
            let jitter = 0.5 + next_unit_f64();
            let sleep_for =
                Duration::from_secs_f64((backoff.as_secs_f64() * jitter).min(config.connect_backoff_max.as_secs_f64()));
            tokio::select! {
                _ = state.lifetime_cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            backoff = (backoff * 2).min(config.connect_backoff_max);
        }
        debug!(%binding, "outbound supervisor stopped");
    });
    handle
}

/// The pieces of channel state that persist across an Outbound channel's
/// reconnect attempts. `user_rx` is threaded through separately (not a
/// field here) since ownership has to move into and back out of each
/// connection attempt in turn.
struct PersistentState {
    lifetime_cancel: CancellationToken,
    force_disconnect: Arc<Notify>,
    remote_node_id_tx: watch::Sender<Option<NodeId>>,
    available_tx: watch::Sender<bool>,
    connected: Arc<std::sync::atomic::AtomicBool>,
    last_read_ms: Arc<AtomicU64>,
    heartbeat_trigger: Arc<Notify>,
}

fn new_state(
    binding: Binding,
    direction: Direction,
    parent_cancel: &CancellationToken,
) -> (ChannelHandle, PersistentState, mpsc::UnboundedReceiver<Letter>) {
    let (user_tx, user_rx) = mpsc::unbounded_channel();
    let (remote_node_id_tx, remote_node_id_rx) = watch::channel(None);
    let (available_tx, available_rx) = watch::channel(false);
    let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let last_read_ms = Arc::new(AtomicU64::new(now_ms()));
    let heartbeat_trigger = Arc::new(Notify::new());
    let force_disconnect = Arc::new(Notify::new());
    let lifetime_cancel = parent_cancel.child_token();

    let handle = ChannelHandle {
        binding,
        direction,
        inner: Arc::new(Inner {
            user_tx,
            lifetime_cancel: lifetime_cancel.clone(),
            force_disconnect: force_disconnect.clone(),
            remote_node_id: remote_node_id_rx,
            available: available_rx,
            connected: connected.clone(),
            last_read_ms: last_read_ms.clone(),
            heartbeat_trigger: heartbeat_trigger.clone(),
        }),
    };
    let state = PersistentState {
        lifetime_cancel,
        force_disconnect,
        remote_node_id_tx,
        available_tx,
        connected,
        last_read_ms,
        heartbeat_trigger,
    };
    (handle, state, user_rx)
}

fn fail(cancel: &CancellationToken, reason_slot: &Mutex<Option<DisconnectReason>>, reason: DisconnectReason) {
    let mut slot = reason_slot.lock().unwrap();
    if slot.is_none() {
        *slot = Some(reason);
    }
    drop(slot);
    cancel.cancel();
}

/// Run one connection attempt to completion: handshake, then race the
/// read and write loops until either tears the connection down. Returns
/// the reason and hands the outbound letter queue back to the caller so
/// a reconnect attempt can resume draining it.
async fn run_connection(
    stream: TcpStream,
    local_node_id: NodeId,
    config: &Config,
    binding: Binding,
    attempt_cancel: &CancellationToken,
    state: &PersistentState,
    mut user_rx: mpsc::UnboundedReceiver<Letter>,
    outcomes: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) -> (DisconnectReason, mpsc::UnboundedReceiver<Letter>) {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, LetterCodec);
    let mut writer = FramedWrite::new(write_half, LetterCodec);

    if let Err(e) = writer.send(Letter::initialize(local_node_id)).await {
        warn!(%binding, error = %e, "failed to write initialize letter");
        return (DisconnectReason::Socket, user_rx);
    }
    state.last_read_ms.store(now_ms(), Ordering::Relaxed);

    let handshake = tokio::time::timeout(config.initialization_timeout, reader.next()).await;
    let remote_node_id = match handshake {
        Ok(Some(Ok(letter))) if letter.letter_type == LetterType::Initialize => match letter.initialize_node_id() {
            Some(id) => id,
            None => return (DisconnectReason::Handshake, user_rx),
        },
        _ => return (DisconnectReason::Handshake, user_rx),
    };
    state.last_read_ms.store(now_ms(), Ordering::Relaxed);
    state.remote_node_id_tx.send_replace(Some(remote_node_id));
    state.connected.store(true, Ordering::Relaxed);
    let _ = outcomes.send((binding, ChannelOutcome::Initialized(remote_node_id)));
    state.available_tx.send_replace(true);
    info!(%binding, remote = %remote_node_id, "channel initialized");

    let cancel = CancellationToken::new();
    let reason_slot: Mutex<Option<DisconnectReason>> = Mutex::new(None);
    let (ack_tx, ack_rx) = mpsc::unbounded_channel::<Letter>();
    let (ack_resolution_tx, ack_resolution_rx) = mpsc::unbounded_channel::<LetterId>();

    {
        let read_fut = read_loop(&mut reader, binding, &cancel, &reason_slot, attempt_cancel, &state.last_read_ms, &ack_resolution_tx, &ack_tx, outcomes);
        let write_fut = write_loop(
            &mut writer,
            &mut user_rx,
            ack_rx,
            ack_resolution_rx,
            config,
            binding,
            &cancel,
            &reason_slot,
            attempt_cancel,
            &state.force_disconnect,
            &state.heartbeat_trigger,
            &state.available_tx,
            outcomes,
        );
        tokio::pin!(read_fut);
        tokio::pin!(write_fut);

        tokio::select! {
            () = &mut read_fut => { cancel.cancel(); write_fut.as_mut().await; }
            () = &mut write_fut => { cancel.cancel(); read_fut.as_mut().await; }
        }
    }

    state.available_tx.send_replace(false);
    state.remote_node_id_tx.send_replace(None);
    state.connected.store(false, Ordering::Relaxed);
    let reason = reason_slot.lock().unwrap().take().unwrap_or(DisconnectReason::Socket);
    (reason, user_rx)
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<R>(
    reader: &mut FramedRead<R, LetterCodec>,
    binding: Binding,
    cancel: &CancellationToken,
    reason_slot: &Mutex<Option<DisconnectReason>>,
    external_cancel: &CancellationToken,
    last_read_ms: &Arc<AtomicU64>,
    ack_resolution_tx: &mpsc::UnboundedSender<LetterId>,
    ack_tx: &mpsc::UnboundedSender<Letter>,
    outcomes: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = external_cancel.cancelled() => { fail(cancel, reason_slot, DisconnectReason::Requested); return; }
            frame = reader.next() => {
                match frame {
                    None => { fail(cancel, reason_slot, DisconnectReason::Socket); return; }
                    Some(Err(e)) => {
                        warn!(%binding, error = %e, "decode error");
                        fail(cancel, reason_slot, DisconnectReason::Socket);
                        return;
                    }
                    Some(Ok(letter)) => {
                        last_read_ms.store(now_ms(), Ordering::Relaxed);
                        if handle_incoming(letter, binding, ack_resolution_tx, ack_tx, outcomes).is_shutdown() {
                            fail(cancel, reason_slot, DisconnectReason::Remote);
                            return;
                        }
                    }
                }
            }
        }
    }
}

enum Incoming {
    Ok,
    PeerShutdown,
}

impl Incoming {
    fn is_shutdown(&self) -> bool {
        matches!(self, Incoming::PeerShutdown)
    }
}

fn handle_incoming(
    letter: Letter,
    binding: Binding,
    ack_resolution_tx: &mpsc::UnboundedSender<LetterId>,
    ack_tx: &mpsc::UnboundedSender<Letter>,
    outcomes: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) -> Incoming {
    match letter.letter_type {
        LetterType::Ack => {
            if let Some(id) = letter.id() {
                let _ = ack_resolution_tx.send(id);
            }
        }
        LetterType::Heartbeat => {}
        LetterType::Shutdown => return Incoming::PeerShutdown,
        LetterType::Batch => {
            for inner_bytes in letter.parts.iter().map(|p| &p.bytes) {
                match crate::wire::deserialize_letter_frame(inner_bytes) {
                    Ok(inner) => {
                        let _ = outcomes.send((binding, ChannelOutcome::Received(inner)));
                    }
                    Err(e) => warn!(%binding, error = %e, "malformed batch part"),
                }
            }
        }
        LetterType::Initialize | LetterType::User => {
            let needs_ack =
                !letter.options.contains(Options::SILENT_ACK) && !letter.options.contains(Options::NO_ACK) && !letter.options.contains(Options::MULTICAST);
            if let (true, Some(id)) = (needs_ack, letter.id()) {
                let _ = ack_tx.send(Letter::ack(id));
            }
            let _ = outcomes.send((binding, ChannelOutcome::Received(letter)));
        }
    }
    Incoming::Ok
}

#[allow(clippy::too_many_arguments)]
async fn write_loop<W>(
    writer: &mut FramedWrite<W, LetterCodec>,
    user_rx: &mut mpsc::UnboundedReceiver<Letter>,
    mut ack_rx: mpsc::UnboundedReceiver<Letter>,
    mut ack_resolution_rx: mpsc::UnboundedReceiver<LetterId>,
    config: &Config,
    binding: Binding,
    cancel: &CancellationToken,
    reason_slot: &Mutex<Option<DisconnectReason>>,
    external_cancel: &CancellationToken,
    force_disconnect: &Notify,
    heartbeat_trigger: &Notify,
    available_tx: &watch::Sender<bool>,
    outcomes: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
) where
    W: AsyncWrite + Unpin,
{
    let mut in_flight: Option<Letter> = None;
    let mut last_write_ms = now_ms();

    loop {
        let available = in_flight.is_none() && ack_rx.is_empty() && user_rx.is_empty();
        available_tx.send_if_modified(|v| {
            if *v != available {
                *v = available;
                true
            } else {
                false
            }
        });

        let ack_deadline = tokio::time::sleep(if in_flight.is_some() { config.ack_timeout } else { Duration::from_secs(3600) });

        tokio::select! {
            biased;

            () = external_cancel.cancelled() => {
                let _ = writer.send(Letter::shutdown()).await;
                fail(cancel, reason_slot, DisconnectReason::Requested);
                break;
            }

            () = force_disconnect.notified() => {
                fail(cancel, reason_slot, DisconnectReason::Socket);
                break;
            }

            () = cancel.cancelled() => break,

            resolved = ack_resolution_rx.recv(), if in_flight.is_some() => {
                let Some(resolved_id) = resolved else { break };
                if in_flight.as_ref().and_then(Letter::id) == Some(resolved_id) {
                    let sent = in_flight.take().unwrap();
                    let _ = outcomes.send((binding, ChannelOutcome::Sent(sent)));
                }
            }

            _ = ack_deadline, if in_flight.is_some() => {
                let failed = in_flight.take().unwrap();
                let _ = outcomes.send((binding, ChannelOutcome::FailedToSend(failed)));
                fail(cancel, reason_slot, DisconnectReason::AckTimeout);
                break;
            }

            reply = ack_rx.recv() => {
                let Some(reply) = reply else { break };
                if write_one(writer, &reply, binding, &mut last_write_ms).await.is_err() {
                    fail(cancel, reason_slot, DisconnectReason::Socket);
                    break;
                }
            }

            () = heartbeat_trigger.notified() => {
                let idle_for = now_ms().saturating_sub(last_write_ms);
                if in_flight.is_none() && ack_rx.is_empty() && user_rx.is_empty() && idle_for >= config.heartbeat_interval.as_millis() as u64
                    && write_one(writer, &Letter::heartbeat(), binding, &mut last_write_ms).await.is_err() {
                        fail(cancel, reason_slot, DisconnectReason::Socket);
                        break;
                }
            }

            next = user_rx.recv(), if in_flight.is_none() => {
                let Some(letter) = next else { break };
                // Publish busy the instant the letter leaves the queue, not just
                // at the next loop-top recompute — otherwise draining an
                // empty-after-write queue never looks like a value change and
                // the dispatcher never sees a fresh ready edge.
                available_tx.send_if_modified(|v| {
                    if *v {
                        *v = false;
                        true
                    } else {
                        false
                    }
                });
                let wants_ack = letter.letter_type == LetterType::User && letter.options.wants_ack();
                match write_one(writer, &letter, binding, &mut last_write_ms).await {
                    Ok(()) if wants_ack => in_flight = Some(letter),
                    Ok(()) => {
                        if matches!(letter.letter_type, LetterType::User | LetterType::Batch) {
                            let _ = outcomes.send((binding, ChannelOutcome::Sent(letter)));
                        }
                    }
                    Err(()) => {
                        let _ = outcomes.send((binding, ChannelOutcome::FailedToSend(letter)));
                        fail(cancel, reason_slot, DisconnectReason::Socket);
                        break;
                    }
                }
            }
        }
    }

    // Report whatever never made it onto the wire so the dispatcher can
    // apply requeue/discard policy.
    if let Some(letter) = in_flight.take() {
        let _ = outcomes.send((binding, ChannelOutcome::FailedToSend(letter)));
    }
    while let Ok(letter) = user_rx.try_recv() {
        if matches!(letter.letter_type, LetterType::User | LetterType::Batch) {
            let _ = outcomes.send((binding, ChannelOutcome::FailedToSend(letter)));
        }
    }
}

async fn write_one<W>(writer: &mut FramedWrite<W, LetterCodec>, letter: &Letter, binding: Binding, last_write_ms: &mut u64) -> Result<(), ()>
where
    W: AsyncWrite + Unpin,
{
    match writer.send(letter).await {
        Ok(()) => {
            *last_write_ms = now_ms();
            Ok(())
        }
        Err(e) => {
            warn!(%binding, error = %e, "write failed");
            Err(())
        }
    }
}

//! The public façade: bind/unbind/connect/disconnect/send/send-to, event
//! fan-out, and the channel registries (by `Binding` and by `NodeId`).
//! Mirrors `AppState`'s registry-of-concurrent-maps shape from
//! `services/server/src/state.rs`, with one background task bridging
//! per-channel outcomes into the public `SocketEvent` stream instead of
//! an HTTP layer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::channel::{self, ChannelOutcome, Direction};
use crate::channel_like::ChannelLike;
use crate::config::Config;
use crate::dispatcher::{self, ChannelRegistry, DispatcherHandle};
use crate::error::Error;
use crate::establish::establish;
use crate::event::SocketEvent;
use crate::heartbeat::{self, HeartbeatHandle};
use crate::letter::{Letter, Options};
use crate::listener::{self, ListenerHandle};
use crate::node_id::NodeId;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// A running Hyperletter socket: the owner of every Listener, Channel,
/// and the Dispatcher, per spec.md §3's ownership rules.
pub struct Socket {
    config: Arc<Config>,
    local_node_id: NodeId,
    channels: ChannelRegistry,
    listeners: Arc<RwLock<HashMap<Binding, ListenerHandle>>>,
    node_route: Arc<RwLock<HashMap<NodeId, Binding>>>,
    dispatcher: DispatcherHandle,
    heartbeat: HeartbeatHandle,
    events_tx: broadcast::Sender<SocketEvent>,
    outcomes_tx: mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
    new_channels_tx: mpsc::UnboundedSender<Arc<dyn ChannelLike>>,
    cancel: CancellationToken,
}

impl Socket {
    pub fn builder() -> Config {
        Config::default()
    }

    /// Construct and start a socket: spawns the dispatcher, the heartbeat
    /// timer, and the background task that turns channel outcomes into
    /// public events. No listeners or outbound connections are started
    /// yet — call `bind`/`connect` for those.
    pub fn with_config(config: Config) -> Self {
        let config = Arc::new(config);
        let local_node_id = config.node_id;
        let cancel = CancellationToken::new();
        let channels: ChannelRegistry = Arc::new(RwLock::new(HashMap::new()));
        let listeners = Arc::new(RwLock::new(HashMap::new()));
        let node_route = Arc::new(RwLock::new(HashMap::new()));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let dispatcher = dispatcher::spawn(channels.clone(), events_tx.clone(), cancel.clone());
        let heartbeat = heartbeat::spawn(config.heartbeat_interval, config.heartbeat_max_missed, channels.clone(), cancel.clone());

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (new_channels_tx, new_channels_rx) = mpsc::unbounded_channel();
        spawn_outcome_loop(channels.clone(), node_route.clone(), dispatcher.clone(), events_tx.clone(), outcomes_rx, new_channels_rx, cancel.clone());

        info!(node_id = %local_node_id, "socket started");
        Socket {
            config,
            local_node_id,
            channels,
            listeners,
            node_route,
            dispatcher,
            heartbeat,
            events_tx,
            outcomes_tx,
            new_channels_tx,
            cancel,
        }
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// A raw broadcast subscription. Lags drop the oldest unread events
    /// (`broadcast`'s usual backpressure story) rather than blocking any
    /// I/O task — handlers are documented as needing to be non-blocking.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events_tx.subscribe()
    }

    /// The same subscription as a `Stream`, for callers who'd rather
    /// `while let Some(event) = stream.next().await` than poll a
    /// `broadcast::Receiver` directly.
    pub fn event_stream(&self) -> BroadcastStream<SocketEvent> {
        BroadcastStream::new(self.events_tx.subscribe())
    }

    /// Start a Listener on `(ip, port)`. Idempotent: binding an address
    /// already bound is a no-op.
    pub async fn bind(&self, ip: IpAddr, port: u16) -> Result<(), Error> {
        let binding = Binding::new(ip, port);
        if self.listeners.read().await.contains_key(&binding) {
            return Ok(());
        }
        let handle = listener::bind(
            binding,
            self.local_node_id,
            self.config.clone(),
            self.cancel.clone(),
            self.outcomes_tx.clone(),
            self.new_channels_tx.clone(),
        )
        .await?;
        self.listeners.write().await.insert(binding, handle);
        Ok(())
    }

    /// Stop the Listener on `(ip, port)`. Already-accepted channels are
    /// unaffected.
    pub async fn unbind(&self, ip: IpAddr, port: u16) {
        let binding = Binding::new(ip, port);
        if let Some(handle) = self.listeners.write().await.remove(&binding) {
            handle.stop();
        }
    }

    /// Start (or resume) an Outbound channel to `(ip, port)`. Idempotent:
    /// a binding already connected/connecting is left alone. The channel
    /// reconnects with backoff on its own until `disconnect` or `dispose`.
    pub async fn connect(&self, ip: IpAddr, port: u16) {
        let binding = Binding::new(ip, port);
        if self.channels.read().await.contains_key(&binding) {
            return;
        }
        let config = self.config.clone();
        let local_node_id = self.local_node_id;
        let cancel = self.cancel.clone();
        let handle = establish(&self.config, &self.cancel, &self.outcomes_tx, move |outcomes| {
            channel::spawn_outbound(binding, local_node_id, config, cancel, outcomes)
        });
        register_channel(&self.channels, &self.dispatcher.ready_tx, &self.cancel, handle).await;
    }

    /// Request a graceful, permanent disconnect of the channel at
    /// `(ip, port)`. Asynchronous: the teardown itself happens on the
    /// channel's own task, surfaced later as `Disconnected`.
    pub async fn disconnect(&self, ip: IpAddr, port: u16) {
        let binding = Binding::new(ip, port);
        if let Some(handle) = self.channels.write().await.remove(&binding) {
            handle.request_disconnect();
        }
        self.node_route.write().await.retain(|_, b| *b != binding);
    }

    /// Hand a letter to the dispatcher for unicast or multicast delivery.
    pub fn send(&self, letter: Letter) -> Result<(), Letter> {
        self.dispatcher.send(letter)
    }

    /// Route a letter directly to the channel whose peer advertised
    /// `node_id`, bypassing the dispatcher. If no channel is currently
    /// routed for that id, the letter is discarded (spec.md §4.6) —
    /// including the window between a reconnecting Outbound channel's
    /// disconnect and its next successful handshake, per the open
    /// question in spec.md §9.
    pub async fn send_to(&self, letter: Letter, node_id: NodeId) {
        let binding = self.node_route.read().await.get(&node_id).copied();
        let target = match binding {
            Some(binding) => self.channels.read().await.get(&binding).cloned(),
            None => None,
        };
        match target {
            Some(channel) => {
                if let Err(returned) = channel.enqueue(letter) {
                    dispatcher::discard(&self.events_tx, Some(binding.unwrap()), returned);
                }
            }
            None => dispatcher::discard(&self.events_tx, None, letter),
        }
    }

    /// Cancel the shared token, stop every listener and channel, stop the
    /// heartbeat timer, and emit `Disposed`.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        self.heartbeat.stop();
        for (_, listener) in self.listeners.write().await.drain() {
            listener.stop();
        }
        for (_, channel) in self.channels.write().await.drain() {
            channel.request_disconnect();
        }
        let _ = self.events_tx.send(SocketEvent::Disposed);
        debug!("socket disposed");
    }
}

async fn register_channel(
    channels: &ChannelRegistry,
    ready_tx: &mpsc::UnboundedSender<Binding>,
    cancel: &CancellationToken,
    handle: Arc<dyn ChannelLike>,
) {
    let binding = handle.binding();
    channels.write().await.insert(binding, handle.clone());
    spawn_ready_watcher(handle, ready_tx.clone(), cancel.child_token());
}

/// Forward every `true` edge on a channel's availability watch into the
/// dispatcher's ready queue. One of these runs per registered channel for
/// its whole lifetime (an Outbound channel's watch persists across
/// reconnects, so one watcher suffices for its whole life).
fn spawn_ready_watcher(handle: Arc<dyn ChannelLike>, ready_tx: mpsc::UnboundedSender<Binding>, cancel: CancellationToken) {
    let binding = handle.binding();
    let mut available = handle.available_receiver();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = available.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *available.borrow() {
                        let _ = ready_tx.send(binding);
                    }
                }
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn spawn_outcome_loop(
    channels: ChannelRegistry,
    node_route: Arc<RwLock<HashMap<NodeId, Binding>>>,
    dispatcher: DispatcherHandle,
    events_tx: broadcast::Sender<SocketEvent>,
    mut outcomes_rx: mpsc::UnboundedReceiver<(Binding, ChannelOutcome)>,
    mut new_channels_rx: mpsc::UnboundedReceiver<Arc<dyn ChannelLike>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                channel = new_channels_rx.recv() => {
                    match channel {
                        Some(handle) => register_channel(&channels, &dispatcher.ready_tx, &cancel, handle).await,
                        None => break,
                    }
                }

                outcome = outcomes_rx.recv() => {
                    let Some((binding, outcome)) = outcome else { break };
                    handle_outcome(&channels, &node_route, &dispatcher, &events_tx, binding, outcome).await;
                }
            }
        }
        debug!("socket outcome loop stopped");
    });
}

async fn handle_outcome(
    channels: &ChannelRegistry,
    node_route: &Arc<RwLock<HashMap<NodeId, Binding>>>,
    dispatcher: &DispatcherHandle,
    events_tx: &broadcast::Sender<SocketEvent>,
    binding: Binding,
    outcome: ChannelOutcome,
) {
    match outcome {
        ChannelOutcome::Connecting => {
            let _ = events_tx.send(SocketEvent::Connecting { binding });
        }
        ChannelOutcome::Initialized(remote_node_id) => {
            node_route.write().await.insert(remote_node_id, binding);
            let _ = events_tx.send(SocketEvent::Connected { binding, remote_node_id });
        }
        ChannelOutcome::Sent(letter) => {
            let _ = events_tx.send(SocketEvent::Sent { binding, letter_id: letter.id() });
        }
        ChannelOutcome::Received(letter) => {
            let remote_node_id = channels.read().await.get(&binding).and_then(|c| c.remote_node_id());
            let _ = events_tx.send(SocketEvent::Received { binding, remote_node_id, letter });
        }
        ChannelOutcome::FailedToSend(letter) => {
            if letter.options.contains(Options::MULTICAST) {
                // Partial fan-out failures never requeue.
                dispatcher::discard(events_tx, Some(binding), letter);
            } else if letter.options.contains(Options::REQUEUE) {
                dispatcher.requeue(letter.clone());
                let _ = events_tx.send(SocketEvent::Requeued { letter });
            } else {
                dispatcher::discard(events_tx, Some(binding), letter);
            }
        }
        ChannelOutcome::Disconnected(reason) => {
            let direction = channels.read().await.get(&binding).map(|c| c.direction());
            if direction == Some(Direction::Inbound) {
                channels.write().await.remove(&binding);
            }
            node_route.write().await.retain(|_, b| *b != binding);
            let _ = events_tx.send(SocketEvent::Disconnected { binding, reason });
        }
    }
}

//! The public event surface.
//!
//! The source this crate grew out of fires events through multicast
//! delegates per event name. Rust has no built-in multicast delegate, so
//! this is modeled as a single fan-out channel of a tagged-variant enum
//! (the third option the design notes call out), built on
//! `tokio::sync::broadcast` the way `local_fanout` fans raw bytes out to
//! many consumers.

use crate::binding::Binding;
use crate::error::DisconnectReason;
use crate::id::LetterId;
use crate::letter::Letter;
use crate::node_id::NodeId;

/// One observable occurrence on a `Socket`. Handlers receive these off a
/// `broadcast::Receiver<SocketEvent>` obtained from `Socket::subscribe`.
/// Per the concurrency model, these are fired from I/O tasks — a handler
/// that blocks delays that task's loop, so slow work should be handed off.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A letter was fully delivered: written to the OS and, if it carried
    /// `Ack`, acknowledged by the peer.
    Sent { binding: Binding, letter_id: Option<LetterId> },
    /// A letter arrived and was decoded (already reported as an Ack
    /// reply by this point, unless `SilentAck`/`NoAck`/`Multicast`).
    Received { binding: Binding, remote_node_id: Option<NodeId>, letter: Letter },
    /// A letter was dropped for good — no further attempt will be made.
    Discarded { binding: Option<Binding>, letter: Letter },
    /// A unicast letter with `Requeue` failed on one channel and was
    /// pushed back onto the dispatcher's pending queue.
    Requeued { letter: Letter },
    /// An outbound channel is attempting to establish a TCP connection.
    Connecting { binding: Binding },
    /// A channel completed the handshake and is ready to carry traffic.
    Connected { binding: Binding, remote_node_id: NodeId },
    /// A channel left `Connected`/`AwaitingAck` for good (Inbound) or
    /// until the next reconnect attempt (Outbound).
    Disconnected { binding: Binding, reason: DisconnectReason },
    /// `Socket::dispose` completed: every listener and channel has
    /// unwound and the heartbeat timer has stopped.
    Disposed,
}

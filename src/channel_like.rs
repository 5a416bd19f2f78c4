//! The seam between the dispatcher/socket and the two things that can sit
//! in the channel registry: a plain `Channel` or a `BatchChannel`
//! decorator over one. A trait object keeps the dispatcher and the
//! readiness-watcher ignorant of batching entirely, the same way this
//! codebase puts a trait at a seam instead of an enum when a second
//! implementation is expected (see `rt-protocol`'s transport trait).

use tokio::sync::watch;

use crate::binding::Binding;
use crate::channel::Direction;
use crate::letter::Letter;
use crate::node_id::NodeId;

pub(crate) trait ChannelLike: Send + Sync {
    fn binding(&self) -> Binding;
    fn direction(&self) -> Direction;
    /// Enqueue a letter for delivery. Returns the letter back on failure
    /// (the channel has already torn down).
    fn enqueue(&self, letter: Letter) -> Result<(), Letter>;
    fn is_connected(&self) -> bool;
    fn remote_node_id(&self) -> Option<NodeId>;
    fn request_disconnect(&self);
    /// A `true` edge means "ready for more work" — drives the
    /// dispatcher's ready-channel queue.
    fn available_receiver(&self) -> watch::Receiver<bool>;

    /// Wake the write loop so it can decide whether it owes the peer a
    /// heartbeat. Called by the heartbeat timer on every tick.
    fn poke_heartbeat(&self);
    /// How long it has been since a frame last arrived from the peer.
    fn millis_since_last_read(&self) -> u64;
    /// Force the current connection attempt down with reason `Socket`;
    /// an Outbound channel reconnects afterward. Used when the peer has
    /// gone silent past `Heartbeat.MaxMissed` intervals.
    fn force_disconnect_unresponsive(&self);
}

impl ChannelLike for crate::channel::ChannelHandle {
    fn binding(&self) -> Binding {
        self.binding
    }
    fn direction(&self) -> Direction {
        self.direction
    }
    fn enqueue(&self, letter: Letter) -> Result<(), Letter> {
        crate::channel::ChannelHandle::enqueue(self, letter)
    }
    fn is_connected(&self) -> bool {
        crate::channel::ChannelHandle::is_connected(self)
    }
    fn remote_node_id(&self) -> Option<NodeId> {
        crate::channel::ChannelHandle::remote_node_id(self)
    }
    fn request_disconnect(&self) {
        crate::channel::ChannelHandle::request_disconnect(self);
    }
    fn available_receiver(&self) -> watch::Receiver<bool> {
        crate::channel::ChannelHandle::available_receiver(self)
    }
    fn poke_heartbeat(&self) {
        crate::channel::ChannelHandle::poke_heartbeat(self);
    }
    fn millis_since_last_read(&self) -> u64 {
        crate::channel::ChannelHandle::millis_since_last_read(self)
    }
    fn force_disconnect_unresponsive(&self) {
        crate::channel::ChannelHandle::force_disconnect_unresponsive(self);
    }
}

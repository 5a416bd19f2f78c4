//! Shared "wrap in a batch decorator or don't" policy used by both the
//! listener's accept loop (Inbound channels) and `Socket::connect`
//! (Outbound channels), so the batching decision lives in exactly one
//! place.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::batch_channel;
use crate::binding::Binding;
use crate::channel::{ChannelHandle, ChannelOutcome};
use crate::channel_like::ChannelLike;
use crate::config::Config;

/// `spawn_raw` receives whichever outcome sender this decision settles on
/// (the socket's own, or a private one only the batch actor drains) and
/// returns the freshly spawned raw channel.
pub(crate) fn establish(
    config: &Config,
    cancel: &CancellationToken,
    socket_outcomes_tx: &mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
    spawn_raw: impl FnOnce(mpsc::UnboundedSender<(Binding, ChannelOutcome)>) -> ChannelHandle,
) -> Arc<dyn ChannelLike> {
    if config.batch_enabled {
        let (inner_outcomes_tx, inner_outcomes_rx) = mpsc::unbounded_channel();
        let raw = spawn_raw(inner_outcomes_tx);
        Arc::new(batch_channel::spawn(
            raw,
            inner_outcomes_rx,
            config.batch_max_letters_in_batch,
            config.batch_max_extended_batch_count,
            cancel.child_token(),
            socket_outcomes_tx.clone(),
        ))
    } else {
        Arc::new(spawn_raw(socket_outcomes_tx.clone()))
    }
}

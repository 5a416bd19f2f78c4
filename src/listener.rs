//! Accepts TCP connections for one bound address and turns each into an
//! Inbound channel, in the same shape as `ClientConnector::begin` in the
//! teacher codebase: one task looping on `accept()`, handing each
//! connection off rather than processing it inline.

use std::sync::Arc;

use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binding::Binding;
use crate::channel::{self, ChannelOutcome};
use crate::channel_like::ChannelLike;
use crate::config::Config;
use crate::node_id::NodeId;

pub(crate) struct ListenerHandle {
    pub(crate) binding: Binding,
    cancel: CancellationToken,
}

impl ListenerHandle {
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Bind and spawn the accept loop. Newly accepted channels (already
/// wrapped in a batch decorator if the config calls for one) are handed
/// to `new_channels` for the socket's registration task to pick up.
pub(crate) async fn bind(
    binding: Binding,
    local_node_id: NodeId,
    config: Arc<Config>,
    parent_cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<(Binding, ChannelOutcome)>,
    new_channels: mpsc::UnboundedSender<Arc<dyn ChannelLike>>,
) -> Result<ListenerHandle, std::io::Error> {
    let tcp_listener = TokioTcpListener::bind(std::net::SocketAddr::from(binding)).await?;
    let cancel = parent_cancel.child_token();
    info!(%binding, "listening");

    let accept_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = accept_cancel.cancelled() => break,
                accepted = tcp_listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let remote_binding = Binding::from(remote_addr);
                            let config_for_spawn = config.clone();
                            let cancel_for_spawn = accept_cancel.clone();
                            let handle = crate::establish::establish(&config, &accept_cancel, &outcomes, move |outcomes| {
                                channel::spawn_inbound(stream, remote_binding, local_node_id, config_for_spawn, cancel_for_spawn, outcomes)
                            });
                            if new_channels.send(handle).is_err() {
                                debug!(%binding, "socket gone, stopping listener");
                                break;
                            }
                        }
                        Err(e) => warn!(%binding, error = %e, "transient accept error"),
                    }
                }
            }
        }
        debug!(%binding, "listener stopped");
    });

    Ok(ListenerHandle { binding, cancel })
}

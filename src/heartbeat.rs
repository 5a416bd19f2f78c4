//! The single liveness timer, per spec.md §4.7: one tick per
//! `Heartbeat.Interval` walks every channel currently known to the
//! socket and either pokes it to emit a heartbeat (if idle) or force-
//! disconnects it (if the peer has gone silent past `MaxMissed`
//! intervals).

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::ChannelRegistry;

pub(crate) struct HeartbeatHandle {
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn(interval: Duration, max_missed: u32, registry: ChannelRegistry, parent_cancel: CancellationToken) -> HeartbeatHandle {
    let cancel = parent_cancel.child_token();
    let task_cancel = cancel.clone();
    let max_missed_ms = interval.as_millis() as u64 * u64::from(max_missed);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = task_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let channels: Vec<_> = registry.read().await.values().cloned().collect();
                    for channel in channels {
                        if !channel.is_connected() {
                            continue;
                        }
                        channel.poke_heartbeat();
                        if channel.millis_since_last_read() >= max_missed_ms {
                            warn!(binding = %channel.binding(), "peer missed heartbeat deadline, forcing reconnect");
                            channel.force_disconnect_unresponsive();
                        }
                    }
                }
            }
        }
        debug!("heartbeat timer stopped");
    });

    HeartbeatHandle { cancel }
}

//! Scenario 6 (heartbeat-driven disconnect): Heartbeat.Interval=100 ms,
//! MaxMissed=3. B completes the handshake, then black-holes — neither
//! reading nor writing again. Expected within ~400 ms: A fires
//! Disconnected(Socket) and reconnects.

#[path = "support.rs"]
mod support;

use hyperletter::{Config, DisconnectReason, Socket, SocketEvent};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

async fn recv_matching<F: Fn(&SocketEvent) -> bool>(rx: &mut broadcast::Receiver<SocketEvent>, pred: F) -> SocketEvent {
    loop {
        let evt = timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out waiting for event").unwrap();
        if pred(&evt) {
            return evt;
        }
    }
}

#[tokio::test]
async fn unresponsive_peer_is_force_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:18507").await.unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                if support::raw_handshake(&mut stream, support::node_id_bytes(3)).await.is_err() {
                    return;
                }
                // Black-hole: hold the connection open, touch nothing.
                std::future::pending::<()>().await;
            });
        }
    });

    let config = Config::builder()
        .heartbeat_interval(Duration::from_millis(100))
        .heartbeat_max_missed(3)
        .build();
    let a = Socket::with_config(config);
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18507).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;

    let disconnected = timeout(Duration::from_millis(800), async {
        recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Disconnected { .. })).await
    })
    .await
    .expect("expected a heartbeat-driven disconnect within the deadline");
    assert!(matches!(disconnected, SocketEvent::Disconnected { reason: DisconnectReason::Socket, .. }));

    // The outbound channel keeps retrying on its own afterward.
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connecting { .. })).await;

    a.dispose().await;
}

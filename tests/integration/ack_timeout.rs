//! Scenario 2 (ack timeout): B drops every Ack. A, configured with a
//! short Ack timeout, sends an Ack letter and is expected to fire
//! Discarded (no Requeue flag) and Disconnected(AckTimeout) within the
//! configured window, then reconnect — with no Sent for that letter.

#[path = "support.rs"]
mod support;

use hyperletter::{Config, DisconnectReason, Letter, Options, Part, Socket, SocketEvent};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

async fn recv_matching<F: Fn(&SocketEvent) -> bool>(rx: &mut broadcast::Receiver<SocketEvent>, pred: F) -> SocketEvent {
    loop {
        let evt = timeout(Duration::from_millis(2000), rx.recv()).await.expect("timed out waiting for event").unwrap();
        if pred(&evt) {
            return evt;
        }
    }
}

#[tokio::test]
async fn ack_timeout_discards_and_disconnects() {
    let listener = TcpListener::bind("127.0.0.1:18502").await.unwrap();

    // B: accepts forever, completes the handshake, then reads and
    // silently drops everything — it never writes an Ack back.
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                if support::raw_handshake(&mut stream, support::node_id_bytes(9)).await.is_err() {
                    return;
                }
                loop {
                    if support::read_frame(&mut stream).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let config = Config::builder().ack_timeout(Duration::from_millis(200)).build();
    let a = Socket::with_config(config);
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18502).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;

    let letter = Letter::user(Options::ACK, vec![Part::user(b"never-acked".to_vec())]);
    let letter_id = letter.id();
    a.send(letter).unwrap();

    let discarded = recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Discarded { .. })).await;
    match discarded {
        SocketEvent::Discarded { letter, .. } => assert_eq!(letter.id(), letter_id),
        _ => unreachable!(),
    }

    let disconnected = recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Disconnected { .. })).await;
    assert!(matches!(disconnected, SocketEvent::Disconnected { reason: DisconnectReason::AckTimeout, .. }));

    // The outbound channel keeps retrying on its own.
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connecting { .. })).await;

    a.dispose().await;
}

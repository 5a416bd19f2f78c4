//! Scenario 3 (requeue on disconnect): A holds a Letter{options=Requeue}.
//! B is killed mid-write (abortive close). Expected: A fires Requeued
//! once; on reconnect, the letter is redelivered; B's successor
//! connection fires Received.

#[path = "support.rs"]
mod support;

use hyperletter::{Config, Letter, Options, Part, Socket, SocketEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
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
async fn requeue_on_disconnect_then_redelivered() {
    let listener = TcpListener::bind("127.0.0.1:18503").await.unwrap();
    let accept_count = Arc::new(AtomicU32::new(0));

    {
        let accept_count = accept_count.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let attempt = accept_count.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    // First connection: complete the handshake, then get
                    // killed before acting on anything else.
                    if support::raw_handshake(&mut stream, support::node_id_bytes(7)).await.is_err() {
                        continue;
                    }
                    support::kill_with_reset(stream);
                } else {
                    // Successor connection: handshake, then actually read
                    // and keep the frame around long enough to count it.
                    if support::raw_handshake(&mut stream, support::node_id_bytes(7)).await.is_err() {
                        continue;
                    }
                    tokio::spawn(async move {
                        loop {
                            if support::read_frame(&mut stream).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            }
        });
    }

    let config = Config::builder().connect_backoff(Duration::from_millis(20), Duration::from_millis(100)).build();
    let a = Socket::with_config(config);
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18503).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    // Give the write loop a moment to flip to available before the peer
    // tears the connection down.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let letter = Letter::user(Options::REQUEUE, vec![Part::user(b"resend-me".to_vec())]);
    a.send(letter).unwrap();

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Requeued { .. })).await;
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Disconnected { .. })).await;

    // Reconnect completes and the requeued letter is redelivered.
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Sent { .. })).await;

    assert!(accept_count.load(Ordering::SeqCst) >= 2);
    a.dispose().await;
}

//! Scenario 4 (multicast fan-out): A is connected to B1 and B2. A sends
//! a Letter{options=Multicast}. Expected: both B1 and B2 fire Received
//! exactly once; A fires Sent twice (never Requeued on a multicast
//! letter, per spec.md §4.6).

use hyperletter::{Config, Letter, Options, Part, Socket, SocketEvent};
use std::time::Duration;
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
async fn multicast_fans_out_to_every_connected_peer() {
    let b1 = Socket::with_config(Config::default());
    b1.bind("127.0.0.1".parse().unwrap(), 18504).await.unwrap();
    let mut b1_events = b1.subscribe();

    let b2 = Socket::with_config(Config::default());
    b2.bind("127.0.0.1".parse().unwrap(), 18505).await.unwrap();
    let mut b2_events = b2.subscribe();

    let a = Socket::with_config(Config::default());
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18504).await;
    a.connect("127.0.0.1".parse().unwrap(), 18505).await;

    recv_matching(&mut b1_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut b2_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;

    let letter = Letter::user(Options::MULTICAST, vec![Part::user(b"to-everyone".to_vec())]);
    a.send(letter).unwrap();

    recv_matching(&mut b1_events, |e| matches!(e, SocketEvent::Received { .. })).await;
    recv_matching(&mut b2_events, |e| matches!(e, SocketEvent::Received { .. })).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Sent { .. })).await;
    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Sent { .. })).await;

    // Nothing was dropped.
    let leftover = timeout(Duration::from_millis(150), a_events.recv()).await;
    if let Ok(Ok(evt)) = leftover {
        assert!(!matches!(evt, SocketEvent::Discarded { .. }), "unexpected Discarded: {evt:?}");
    }

    a.dispose().await;
    b1.dispose().await;
    b2.dispose().await;
}

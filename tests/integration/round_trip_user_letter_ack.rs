//! Scenario 1 (round-trip user letter with Ack): peer A connects to peer
//! B. A sends a User letter with Ack. B fires Received with the original
//! parts; A fires Sent exactly once; neither side fires Discarded.

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
        assert!(!matches!(evt, SocketEvent::Discarded { .. }), "unexpected Discarded: {evt:?}");
    }
}

#[tokio::test]
async fn round_trip_user_letter_with_ack() {
    let b = Socket::with_config(Config::default());
    b.bind("127.0.0.1".parse().unwrap(), 18501).await.unwrap();
    let mut b_events = b.subscribe();

    let a = Socket::with_config(Config::default());
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18501).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut b_events, |e| matches!(e, SocketEvent::Connected { .. })).await;

    let letter = Letter::user(Options::ACK, vec![Part::user(b"hi".to_vec())]);
    let letter_id = letter.id();
    a.send(letter).unwrap();

    let received = recv_matching(&mut b_events, |e| matches!(e, SocketEvent::Received { .. })).await;
    match received {
        SocketEvent::Received { letter, .. } => {
            assert_eq!(letter.parts.len(), 1);
            assert_eq!(letter.parts[0].bytes, b"hi".to_vec());
        }
        _ => unreachable!(),
    }

    let sent = recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Sent { .. })).await;
    assert!(matches!(sent, SocketEvent::Sent { letter_id: id, .. } if id == letter_id));

    // No second Sent for the same letter shows up within a short window.
    let extra = timeout(Duration::from_millis(200), a_events.recv()).await;
    if let Ok(Ok(evt)) = extra {
        assert!(!matches!(evt, SocketEvent::Sent { .. }), "unexpected extra Sent: {evt:?}");
    }

    a.dispose().await;
    b.dispose().await;
}

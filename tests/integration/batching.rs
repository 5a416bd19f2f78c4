//! Scenario 5 (batching): Batch.Enabled=true, MaxLettersInBatch=3. A
//! enqueues 7 user letters quickly. B fires Received 7 times in enqueue
//! order; A fires Sent 7 times in enqueue order. The exact 3/3/1 wire
//! grouping is an implementation detail of the batch decorator's flush
//! timing (see batch_channel.rs) — what's externally observable and
//! tested here is that nothing is dropped, duplicated, or reordered.

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
async fn batched_letters_arrive_once_each_in_order() {
    let b = Socket::with_config(Config::default());
    b.bind("127.0.0.1".parse().unwrap(), 18506).await.unwrap();
    let mut b_events = b.subscribe();

    let a_config = Config::builder().batch_enabled(true).batch_max_letters_in_batch(3).build();
    let a = Socket::with_config(a_config);
    let mut a_events = a.subscribe();
    a.connect("127.0.0.1".parse().unwrap(), 18506).await;

    recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Connected { .. })).await;
    recv_matching(&mut b_events, |e| matches!(e, SocketEvent::Connected { .. })).await;

    let payloads: Vec<Vec<u8>> = (0..7).map(|i| format!("letter-{i}").into_bytes()).collect();
    let ids: Vec<_> = payloads
        .iter()
        .map(|p| {
            let letter = Letter::user(Options::UNIQUE_ID, vec![Part::user(p.clone())]);
            let id = letter.id();
            a.send(letter).unwrap();
            id
        })
        .collect();

    let mut received_payloads = Vec::new();
    while received_payloads.len() < 7 {
        let evt = recv_matching(&mut b_events, |e| matches!(e, SocketEvent::Received { .. })).await;
        if let SocketEvent::Received { letter, .. } = evt {
            received_payloads.push(letter.parts[0].bytes.clone());
        }
    }
    assert_eq!(received_payloads, payloads, "letters must arrive exactly once each, in enqueue order");

    let mut sent_ids = Vec::new();
    while sent_ids.len() < 7 {
        let evt = recv_matching(&mut a_events, |e| matches!(e, SocketEvent::Sent { .. })).await;
        if let SocketEvent::Sent { letter_id, .. } = evt {
            sent_ids.push(letter_id);
        }
    }
    assert_eq!(sent_ids, ids, "Sent events must be fired once each, in enqueue order");

    a.dispose().await;
    b.dispose().await;
}

//! End-to-end tests driving two in-process daemons over real TCP sockets.

use beacon_p2p_daemon::config::Config;
use beacon_p2p_daemon::gossip::Subscriber;
use beacon_p2p_daemon::node;
use beacon_p2p_daemon::port::NotificationSender;
use beacon_p2p_daemon::proto::{call_result, notification::N, tracer, Notification};
use beacon_p2p_daemon::reqresp::Listener;
use bytes::Bytes;
use libp2p::PeerId;
use prost::Message;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

struct TestDaemon {
    listener: Listener,
    subscriber: Subscriber,
    frames: mpsc::Receiver<Bytes>,
}

fn spawn_daemon() -> TestDaemon {
    let (notifications, frames) = NotificationSender::pair();
    let config = Config {
        listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
        ..Default::default()
    };
    let keypair = libp2p::identity::Keypair::generate_secp256k1();
    let node = node::spawn(&config, keypair, notifications.clone()).unwrap();
    let listener = Listener::new(&node, notifications.clone());
    let subscriber = Subscriber::new(&node, notifications);
    TestDaemon {
        listener,
        subscriber,
        frames,
    }
}

/// Wait until the daemon has a bound listen address.
async fn listen_addresses(listener: &Listener) -> Vec<String> {
    timeout(Duration::from_secs(10), async {
        loop {
            let addrs = listener.listen_addresses().await;
            if !addrs.is_empty() && !addrs.iter().any(|a| a.contains("/tcp/0/")) {
                return addrs;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("no listen address appeared")
}

fn decode(frame: &Bytes) -> Notification {
    Notification::decode(&frame[4..]).expect("malformed notification frame")
}

/// Drain notifications until one matches, failing the test on timeout.
async fn wait_for(
    frames: &mut mpsc::Receiver<Bytes>,
    what: &str,
    pred: impl Fn(&Notification) -> bool,
) -> Notification {
    timeout(Duration::from_secs(30), async {
        loop {
            let frame = frames.recv().await.expect("notification stream closed");
            let notification = decode(&frame);
            if pred(&notification) {
                return notification;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn try_wait_for(
    frames: &mut mpsc::Receiver<Bytes>,
    wait: Duration,
    pred: impl Fn(&Notification) -> bool,
) -> Option<Notification> {
    timeout(wait, async {
        loop {
            let frame = frames.recv().await.expect("notification stream closed");
            let notification = decode(&frame);
            if pred(&notification) {
                return notification;
            }
        }
    })
    .await
    .ok()
}

fn is_gossip(n: &Notification) -> bool {
    matches!(n.n, Some(N::Gossip(_)))
}

fn is_tracer(n: &Notification, pred: impl Fn(&tracer::T) -> bool) -> bool {
    match &n.n {
        Some(N::Tracer(t)) => t.t.as_ref().is_some_and(pred),
        _ => false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_identity_reports_p2p_addresses() {
    let daemon = spawn_daemon();
    let peer_id = daemon.listener.host_peer_id();

    let addrs = listen_addresses(&daemon.listener).await;
    assert!(!addrs.is_empty());
    for addr in &addrs {
        assert!(
            addr.ends_with(&format!("/p2p/{peer_id}")),
            "address {addr} lacks the p2p suffix"
        );
        assert!(addr.starts_with("/ip4/127.0.0.1/tcp/"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn request_response_echo_between_two_daemons() {
    let mut a = spawn_daemon();
    let mut b = spawn_daemon();

    a.listener
        .set_handler("/echo/1".into(), b"echo-handler".to_vec())
        .unwrap();

    let a_addrs = listen_addresses(&a.listener).await;
    let a_id = a.listener.host_peer_id();

    b.listener.add_peer(&a_id.to_bytes(), &a_addrs, 0).await;
    let new_peer = wait_for(&mut b.frames, "NewPeer", |n| {
        matches!(n.n, Some(N::NewPeer(_)))
    })
    .await;
    let Some(N::NewPeer(new_peer)) = new_peer.n else {
        unreachable!()
    };
    assert_eq!(new_peer.peer_id, a_id.to_bytes());

    b.listener.send_request(
        b"r1".to_vec(),
        a_id.to_bytes(),
        "/echo/1".into(),
        b"hello".to_vec(),
    );

    let request = wait_for(&mut a.frames, "Request", |n| {
        matches!(n.n, Some(N::Request(_)))
    })
    .await;
    let Some(N::Request(request)) = request.n else {
        unreachable!()
    };
    assert_eq!(request.protocol_id, "/echo/1");
    assert_eq!(request.handler, b"echo-handler");
    assert_eq!(request.message, b"hello");
    assert_eq!(a.listener.pending_len(), 1);

    a.listener
        .send_response(&request.request_id, b"HELLO".to_vec())
        .unwrap();
    assert_eq!(a.listener.pending_len(), 0);

    let result = wait_for(&mut b.frames, "Result", |n| {
        matches!(n.n, Some(N::Result(_)))
    })
    .await;
    let Some(N::Result(result)) = result.n else {
        unreachable!()
    };
    assert_eq!(result.from, b"r1");
    let Some(call_result::R::Ok(ok)) = result.r else {
        panic!("expected a successful result, got {result:?}");
    };
    assert_eq!(ok.message, vec![b"HELLO".to_vec()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn outbound_request_to_unreachable_peer_fails_once() {
    let mut daemon = spawn_daemon();

    daemon.listener.send_request(
        b"r-timeout".to_vec(),
        PeerId::random().to_bytes(),
        "/echo/1".into(),
        b"hello".to_vec(),
    );

    let result = wait_for(&mut daemon.frames, "failure Result", |n| {
        matches!(n.n, Some(N::Result(_)))
    })
    .await;
    let Some(N::Result(result)) = result.n else {
        unreachable!()
    };
    assert_eq!(result.from, b"r-timeout");
    assert!(matches!(result.r, Some(call_result::R::Error(_))));

    // Exactly once: nothing further arrives for this request.
    assert!(try_wait_for(&mut daemon.frames, Duration::from_secs(2), |n| {
        matches!(n.n, Some(N::Result(_)))
    })
    .await
    .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn gossip_is_validated_by_the_host() {
    let mut a = spawn_daemon();
    let mut b = spawn_daemon();

    a.subscriber
        .subscribe("test".into(), b"handler-a".to_vec())
        .await
        .unwrap();
    b.subscriber
        .subscribe("test".into(), b"handler-b".to_vec())
        .await
        .unwrap();

    let a_addrs = listen_addresses(&a.listener).await;
    b.listener
        .add_peer(&a.listener.host_peer_id().to_bytes(), &a_addrs, 0)
        .await;

    // Both sides see the remote subscription before the mesh can form.
    wait_for(&mut a.frames, "graft on a", |n| {
        is_tracer(n, |t| matches!(t, tracer::T::Grafted(e) if e.topic == "test"))
    })
    .await;
    wait_for(&mut b.frames, "graft on b", |n| {
        is_tracer(n, |t| matches!(t, tracer::T::Grafted(e) if e.topic == "test"))
    })
    .await;
    sleep(Duration::from_secs(2)).await;

    // Accept path. Payloads are unique per attempt so a retry is never a
    // gossipsub duplicate.
    let mut gossip = None;
    for i in 0..10u8 {
        let payload = format!("accept-{i}").into_bytes();
        a.subscriber.publish("test".into(), payload).await;
        if let Some(n) = try_wait_for(&mut b.frames, Duration::from_secs(2), is_gossip).await {
            gossip = Some(n);
            break;
        }
    }
    let gossip = gossip.expect("no gossip delivery");
    let Some(N::Gossip(gossip)) = gossip.n else {
        unreachable!()
    };
    assert_eq!(gossip.topic, "test");
    assert_eq!(gossip.handler, b"handler-b");
    assert!(gossip.message.starts_with(b"accept-"));
    assert_eq!(gossip.msg_id.len(), 20);

    b.subscriber.validate(&gossip.msg_id, 0).await;
    wait_for(&mut b.frames, "deliver tracer", |n| {
        is_tracer(n, |t| matches!(t, tracer::T::DeliverMessage(e) if e.topic == "test"))
    })
    .await;

    // Reject path.
    a.subscriber
        .publish("test".into(), b"reject-me".to_vec())
        .await;
    let gossip = wait_for(&mut b.frames, "second gossip", |n| {
        matches!(&n.n, Some(N::Gossip(g)) if g.message == b"reject-me")
    })
    .await;
    let Some(N::Gossip(gossip)) = gossip.n else {
        unreachable!()
    };
    b.subscriber.validate(&gossip.msg_id, 1).await;
    wait_for(&mut b.frames, "reject tracer", |n| {
        is_tracer(n, |t| matches!(t, tracer::T::RejectMessage(e) if e.topic == "test"))
    })
    .await;
}

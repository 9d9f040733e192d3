//! Transport-level scenarios: channel I/O, reassembly and the decode →
//! publish path over real loopback sockets, without the discovery task.

use std::sync::Arc;
use std::time::Duration;

use neuromesh_node::channel::ChannelSettings;
use neuromesh_node::connection_manager::ConnectionManager;
use neuromesh_node::dispatcher::Dispatcher;
use neuromesh_protocol::{
    build_shake_hand_req, build_ver_resp, Body, WireCodec, CLIENT_CONNECT_NOTIFICATION,
    SHAKE_HAND_REQ, VER_RESP,
};
use tokio::sync::{broadcast, mpsc};

use crate::harness::ScriptedPeer;

const MAGIC: i32 = neuromesh_protocol::PROTOCOL_MAGIC;

fn quick_settings() -> ChannelSettings {
    ChannelSettings {
        poll_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

struct Transport {
    manager: Arc<ConnectionManager>,
    bus: Dispatcher,
    shutdown_tx: broadcast::Sender<()>,
}

impl Transport {
    fn start() -> Self {
        let bus = Dispatcher::new();
        let manager = ConnectionManager::new(quick_settings(), bus.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(manager.clone().run_io_loop(shutdown_tx.subscribe()));
        tokio::spawn(manager.clone().run_drain_loop(shutdown_tx.subscribe()));
        Self {
            manager,
            bus,
            shutdown_tx,
        }
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[tokio::test]
async fn test_decoded_message_reaches_subscriber_across_chunks() {
    let transport = Transport::start();
    let (tx, mut rx) = mpsc::channel(16);
    transport.bus.subscribe(VER_RESP, tx).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = transport.manager.connect_new(addr).await.unwrap();

    let mut peer = ScriptedPeer::accept(&listener).await;
    let (header, body) = build_ver_resp(MAGIC, "node-remote");
    let bytes = WireCodec::encode(&header, &body).unwrap();

    // Deliver the frame in two chunks with a pause in between
    peer.send_raw(&bytes[..9]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.send_raw(&bytes[9..]).await;

    let envelope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no ver_resp published")
        .unwrap();
    assert_eq!(envelope.session_id, session);
    assert_eq!(envelope.peer_addr, addr);
    match envelope.body {
        Body::VerResp(resp) => assert_eq!(resp.node_id, "node-remote"),
        other => panic!("expected VerResp, got {other:?}"),
    }

    transport.stop();
}

#[tokio::test]
async fn test_unicast_bytes_arrive_at_the_peer() {
    let transport = Transport::start();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = transport.manager.connect_new(addr).await.unwrap();
    let mut peer = ScriptedPeer::accept(&listener).await;

    let (header, body) = build_shake_hand_req(MAGIC);
    let bytes = WireCodec::encode(&header, &body).unwrap();
    transport.manager.send_to(&session, bytes).await.unwrap();

    let (received_header, received_body) = peer.recv(Duration::from_secs(5)).await;
    assert_eq!(received_header.msg_name, SHAKE_HAND_REQ);
    assert_eq!(received_body, Body::ShakeHandReq);

    transport.stop();
}

#[tokio::test]
async fn test_broadcast_reaches_every_channel() {
    let transport = Transport::start();

    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    transport
        .manager
        .connect_new(listener_a.local_addr().unwrap())
        .await
        .unwrap();
    transport
        .manager
        .connect_new(listener_b.local_addr().unwrap())
        .await
        .unwrap();
    let mut peer_a = ScriptedPeer::accept(&listener_a).await;
    let mut peer_b = ScriptedPeer::accept(&listener_b).await;

    let (header, body) = build_shake_hand_req(MAGIC);
    let bytes = WireCodec::encode(&header, &body).unwrap();
    transport.manager.broadcast(bytes).await;

    let (got_a, _) = peer_a.recv(Duration::from_secs(5)).await;
    let (got_b, _) = peer_b.recv(Duration::from_secs(5)).await;
    assert_eq!(got_a.msg_name, SHAKE_HAND_REQ);
    assert_eq!(got_b.msg_name, SHAKE_HAND_REQ);

    transport.stop();
}

#[tokio::test]
async fn test_oversized_frame_tears_the_channel_down() {
    let transport = Transport::start();
    let (tx, mut rx) = mpsc::channel(16);
    transport.bus.subscribe(CLIENT_CONNECT_NOTIFICATION, tx).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    transport.manager.connect_new(addr).await.unwrap();

    // Consume the status-0 notification from connect
    let connected = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match &connected.body {
        Body::ConnectNotification(n) => assert_eq!(n.status, 0),
        other => panic!("expected ConnectNotification, got {other:?}"),
    }

    // Declare a frame over the hard cap; the channel must close, not seal
    let mut peer = ScriptedPeer::accept(&listener).await;
    peer.send_raw(&200_000u32.to_be_bytes()).await;

    let torn_down = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no teardown notification")
        .unwrap();
    match torn_down.body {
        Body::ConnectNotification(n) => assert_eq!(n.status, -1),
        other => panic!("expected ConnectNotification, got {other:?}"),
    }

    transport.stop();
}

#[tokio::test]
async fn test_peer_disconnect_surfaces_as_notification() {
    let transport = Transport::start();
    let (tx, mut rx) = mpsc::channel(16);
    transport.bus.subscribe(CLIENT_CONNECT_NOTIFICATION, tx).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = transport.manager.connect_new(addr).await.unwrap();

    let connected = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        connected.body,
        Body::ConnectNotification(ref n) if n.status == 0
    ));

    // Remote side hangs up
    let peer = ScriptedPeer::accept(&listener).await;
    drop(peer);

    let lost = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no disconnect notification")
        .unwrap();
    assert_eq!(lost.session_id, session);
    assert!(matches!(
        lost.body,
        Body::ConnectNotification(ref n) if n.status == -1
    ));

    transport.stop();
}

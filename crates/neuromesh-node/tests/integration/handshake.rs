//! Full-stack discovery scenarios: seeding, dialing, version handshake,
//! peer exchange and keepalive against a scripted remote peer.

use std::time::Duration;

use neuromesh_discovery::CandidateState;
use neuromesh_protocol::{
    build_get_peer_nodes_resp, build_shake_hand_resp, build_ver_req, build_ver_resp, Body,
    NetAddress, PeerNodeInfo, GET_PEER_NODES_REQ, SHAKE_HAND_REQ, VER_REQ, VER_RESP,
};

use crate::harness::{fast_config, unreachable_addr, wait_for_engine, ScriptedPeer, TestNode};

const MAGIC: i32 = neuromesh_protocol::PROTOCOL_MAGIC;
const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_outbound_handshake_activates_peer_and_exchanges_peers() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed_addr = listener.local_addr().unwrap();

    let node = TestNode::start(fast_config(vec![seed_addr.to_string()])).await;

    // Discovery seeds from the static list and dials us
    let mut peer = ScriptedPeer::accept(&listener).await;

    // First message is the node introducing itself
    let (header, body) = peer.recv_named(VER_REQ, WAIT).await;
    assert_eq!(header.magic, MAGIC);
    let ver_req = match body {
        Body::VerReq(req) => req,
        other => panic!("expected VerReq, got {other:?}"),
    };
    assert_eq!(ver_req.node_id, node.identity.node_id());

    // Complete the handshake
    let (resp_header, resp_body) = build_ver_resp(MAGIC, "scripted-peer");
    peer.send(&resp_header, &resp_body).await;

    assert!(
        wait_for_engine(&node.engine, WAIT, |e| e.active_count() == 1).await,
        "peer never became active"
    );
    {
        let engine = node.engine.lock().await;
        let peers = engine.active_peers();
        assert_eq!(peers[0].node_id, "scripted-peer");
        assert_eq!(peers[0].endpoint, seed_addr);

        let candidates = engine.candidates();
        let candidate = candidates
            .iter()
            .find(|c| c.endpoint == seed_addr)
            .expect("candidate for the seed endpoint");
        assert_eq!(candidate.state, CandidateState::Active);
        assert_eq!(candidate.node_id.as_deref(), Some("scripted-peer"));
    }

    // A fresh handshake is followed by a peer-exchange request. Advertise a
    // loopback port that refuses connections so later dials fail fast.
    peer.recv_named(GET_PEER_NODES_REQ, WAIT).await;
    let far_addr = unreachable_addr().await;
    let advertised = PeerNodeInfo {
        peer_node_id: "node-far".into(),
        core_version: neuromesh_protocol::CORE_VERSION,
        protocol_version: neuromesh_protocol::PROTOCOL_VERSION,
        live_time_stamp: 0,
        addr: NetAddress::from_socket_addr(&far_addr),
    };
    let (px_header, px_body) = build_get_peer_nodes_resp(MAGIC, vec![advertised]);
    peer.send(&px_header, &px_body).await;

    assert!(
        wait_for_engine(&node.engine, WAIT, |e| {
            e.candidates().iter().any(|c| c.endpoint == far_addr)
        })
        .await,
        "peer exchange never added the advertised candidate"
    );

    // Keepalives flow to the active peer; answer one to be polite
    let (ka_header, _) = peer.recv_named(SHAKE_HAND_REQ, WAIT).await;
    assert_eq!(ka_header.magic, MAGIC);
    let (ka_resp_header, ka_resp_body) = build_shake_hand_resp(MAGIC);
    peer.send(&ka_resp_header, &ka_resp_body).await;

    node.shutdown().await;
}

#[tokio::test]
async fn test_repeated_peer_exchange_does_not_duplicate_candidates() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed_addr = listener.local_addr().unwrap();

    let node = TestNode::start(fast_config(vec![seed_addr.to_string()])).await;
    let mut peer = ScriptedPeer::accept(&listener).await;

    peer.recv_named(VER_REQ, WAIT).await;
    let (resp_header, resp_body) = build_ver_resp(MAGIC, "scripted-peer");
    peer.send(&resp_header, &resp_body).await;
    peer.recv_named(GET_PEER_NODES_REQ, WAIT).await;

    let target = unreachable_addr().await;
    let advertised = PeerNodeInfo {
        peer_node_id: "node-far".into(),
        core_version: 1,
        protocol_version: 1,
        live_time_stamp: 0,
        addr: NetAddress::from_socket_addr(&target),
    };
    let (px_header, px_body) = build_get_peer_nodes_resp(MAGIC, vec![advertised.clone()]);
    for _ in 0..3 {
        peer.send(&px_header, &px_body).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(
        wait_for_engine(&node.engine, WAIT, |e| {
            e.candidates().iter().any(|c| c.endpoint == target)
        })
        .await
    );
    let count = node
        .engine
        .lock()
        .await
        .candidates()
        .iter()
        .filter(|c| c.endpoint == target)
        .count();
    assert_eq!(count, 1, "advertised endpoint must not be duplicated");

    node.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_seed_candidate_goes_failed() {
    // Bind then drop so the port refuses connections
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let node = TestNode::start(fast_config(vec![dead_addr.to_string()])).await;

    assert!(
        wait_for_engine(&node.engine, WAIT, |e| {
            e.candidates()
                .iter()
                .any(|c| c.endpoint == dead_addr && c.state == CandidateState::Failed)
        })
        .await,
        "unreachable candidate never marked failed"
    );
    assert_eq!(node.active_peer_count().await, 0);
    assert_eq!(node.manager.channel_count().await, 0);

    node.shutdown().await;
}

#[tokio::test]
async fn test_inbound_handshake_is_answered_and_tracked() {
    let mut cfg = fast_config(Vec::new());
    cfg.network.listen_addr = Some("127.0.0.1:0".into());
    let node = TestNode::start(cfg).await;
    let listen_addr = node.listen_addr.expect("acceptor bound");

    let advertised = unreachable_addr().await;
    let mut client = ScriptedPeer::connect(listen_addr).await;
    let (header, body) = build_ver_req(
        MAGIC,
        "inbound-client",
        NetAddress::from_socket_addr(&advertised),
        NetAddress::from_socket_addr(&listen_addr),
        0,
    );
    client.send(&header, &body).await;

    let (resp_header, resp_body) = client.recv_named(VER_RESP, WAIT).await;
    assert_eq!(resp_header.magic, MAGIC);
    match resp_body {
        Body::VerResp(resp) => assert_eq!(resp.node_id, node.identity.node_id()),
        other => panic!("expected VerResp, got {other:?}"),
    }

    assert!(
        wait_for_engine(&node.engine, WAIT, |e| {
            e.active_peers().iter().any(|p| p.node_id == "inbound-client")
        })
        .await,
        "inbound peer never tracked"
    );

    // The address the client advertised is now a candidate
    assert!(node
        .engine
        .lock()
        .await
        .candidates()
        .iter()
        .any(|c| c.endpoint == advertised));

    node.shutdown().await;
}

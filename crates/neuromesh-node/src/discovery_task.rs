//! Discovery background task -- owns the discovery engine, sweeps on a
//! fixed interval, and reacts to bus events.
//!
//! Each sweep: seed the candidate store if it is empty (DNS first, static
//! list as fallback), then dial at most one candidate. Event handling covers
//! connect outcomes, the version handshake in both directions, peer
//! exchange, and keepalives. A second ticker pings every active peer so dead
//! channels surface as socket errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use neuromesh_crypto::NodeIdentity;
use neuromesh_discovery::DiscoveryEngine;
use neuromesh_protocol::{
    build_get_peer_nodes_req, build_get_peer_nodes_resp, build_shake_hand_req,
    build_shake_hand_resp, build_ver_req, build_ver_resp, Body, ConnectNotification, GetPeerNodesResp,
    MsgHeader, NetAddress, PeerNodeInfo, VerReq, VerResp, WireCodec, CLIENT_CONNECT_NOTIFICATION,
    GET_PEER_NODES_REQ, GET_PEER_NODES_RESP, SHAKE_HAND_REQ, VER_REQ, VER_RESP,
};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::NodeConfig;
use crate::connection_manager::ConnectionManager;
use crate::dispatcher::{Dispatcher, Envelope};

/// Cap on candidates advertised in one peer-exchange response.
const MAX_PEERS_PER_EXCHANGE: usize = 50;

pub struct DiscoveryTask {
    engine: Arc<Mutex<DiscoveryEngine>>,
    manager: Arc<ConnectionManager>,
    bus: Dispatcher,
    identity: Arc<NodeIdentity>,
    magic: i32,
    listen_addr: Option<SocketAddr>,
    static_seeds: Vec<String>,
    dns_seeds: Vec<String>,
    seed_port: u16,
    sweep_interval: Duration,
    keepalive_interval: Duration,
}

impl DiscoveryTask {
    pub fn new(
        engine: Arc<Mutex<DiscoveryEngine>>,
        manager: Arc<ConnectionManager>,
        bus: Dispatcher,
        identity: Arc<NodeIdentity>,
        cfg: &NodeConfig,
    ) -> Self {
        let listen_addr = cfg
            .network
            .listen_addr
            .as_deref()
            .and_then(|a| a.parse().ok());
        Self {
            engine,
            manager,
            bus,
            identity,
            magic: cfg.node.magic,
            listen_addr,
            static_seeds: cfg.network.static_seeds.clone(),
            dns_seeds: cfg.network.dns_seeds.clone(),
            seed_port: cfg.network.seed_port,
            sweep_interval: cfg.sweep_interval(),
            keepalive_interval: cfg.keepalive_interval(),
        }
    }

    /// Run until shutdown. Subscribes to every topic discovery reacts to;
    /// being the latest subscriber on those topics is part of the contract.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(256);
        for topic in [
            CLIENT_CONNECT_NOTIFICATION,
            VER_REQ,
            VER_RESP,
            GET_PEER_NODES_REQ,
            GET_PEER_NODES_RESP,
            SHAKE_HAND_REQ,
        ] {
            self.bus.subscribe(topic, tx.clone()).await;
        }

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut keepalive = tokio::time::interval(self.keepalive_interval);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sweep.tick() => self.sweep().await,
                _ = keepalive.tick() => self.keepalive_sweep().await,
                Some(envelope) = rx.recv() => self.handle(envelope).await,
                _ = shutdown.recv() => {
                    tracing::info!("discovery stopped");
                    return;
                }
            }
        }
    }

    /// One discovery sweep: seed if empty, then at most one dial.
    async fn sweep(&self) {
        if self.engine.lock().await.store_is_empty() {
            let seeds = self.gather_seeds().await;
            if !seeds.is_empty() {
                let added = self.engine.lock().await.add_candidates(seeds);
                tracing::info!(added, "candidate store seeded");
            }
        }

        let dial = self.engine.lock().await.tick();
        if let Some(endpoint) = dial {
            tracing::info!(%endpoint, "dialing candidate");
            if let Err(e) = self.manager.connect_new(endpoint).await {
                // The candidate transition rides the connect notification
                tracing::debug!(%endpoint, error = %e, "dial failed");
            }
        }

        let (active, candidates) = {
            let engine = self.engine.lock().await;
            (engine.active_count(), engine.candidates().len())
        };
        let channels = self.manager.channel_count().await;
        tracing::info!(active, candidates, channels, "discovery sweep");
    }

    /// DNS seeds resolve to one candidate per A record; lookup failures are
    /// swallowed and the static list takes over.
    async fn gather_seeds(&self) -> Vec<(SocketAddr, Option<String>)> {
        let mut seeds = Vec::new();
        for name in &self.dns_seeds {
            match tokio::net::lookup_host((name.as_str(), self.seed_port)).await {
                Ok(addrs) => seeds.extend(addrs.map(|a| (a, None))),
                Err(e) => {
                    tracing::warn!(seed = %name, error = %e, "dns seed lookup failed");
                }
            }
        }

        if seeds.is_empty() {
            for entry in &self.static_seeds {
                match entry.parse::<SocketAddr>() {
                    Ok(addr) => seeds.push((addr, None)),
                    Err(e) => tracing::warn!(seed = %entry, error = %e, "bad static seed"),
                }
            }
        }
        seeds
    }

    /// Ping every active peer. A send failure means the channel is gone;
    /// drop the peer so its candidate is retried on a later sweep.
    async fn keepalive_sweep(&self) {
        let peers = self.engine.lock().await.active_peers();
        if peers.is_empty() {
            return;
        }

        let (header, body) = build_shake_hand_req(self.magic);
        let bytes = match WireCodec::encode(&header, &body) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "keepalive encode failed");
                return;
            }
        };

        for peer in peers {
            if let Err(e) = self.manager.send_to(&peer.session_id, bytes.clone()).await {
                tracing::debug!(
                    node_id = %peer.node_id,
                    error = %e,
                    "keepalive send failed, dropping peer"
                );
                self.engine.lock().await.on_session_closed(&peer.session_id);
                self.manager.remove(&peer.session_id).await;
            }
        }
    }

    async fn handle(&self, envelope: Envelope) {
        let Envelope {
            session_id,
            peer_addr,
            header,
            body,
            ..
        } = envelope;

        match body {
            Body::ConnectNotification(notice) => {
                self.on_connect_notification(&session_id, notice).await;
            }
            Body::VerResp(resp) => self.on_ver_resp(&session_id, peer_addr, resp).await,
            Body::VerReq(req) => self.on_ver_req(&session_id, peer_addr, req).await,
            Body::GetPeerNodesReq => self.on_get_peer_nodes_req(&session_id).await,
            Body::GetPeerNodesResp(resp) => self.on_get_peer_nodes_resp(resp).await,
            Body::ShakeHandReq => {
                let (reply_header, reply_body) = build_shake_hand_resp(self.magic);
                self.send(&session_id, &reply_header, &reply_body).await;
            }
            other => {
                tracing::debug!(
                    topic = %header.msg_name,
                    body = ?other,
                    "discovery ignoring message"
                );
            }
        }
    }

    async fn on_connect_notification(&self, session_id: &str, notice: ConnectNotification) {
        if notice.status == 0 {
            self.engine
                .lock()
                .await
                .on_connect_outcome(notice.endpoint, true);

            // Introduce ourselves; the peer's ver_resp completes the
            // handshake and activates the candidate.
            let addr_me = self
                .listen_addr
                .map(|a| NetAddress::from_socket_addr(&a))
                .unwrap_or_default();
            let (header, body) = build_ver_req(
                self.magic,
                self.identity.node_id(),
                addr_me,
                NetAddress::from_socket_addr(&notice.endpoint),
                chrono::Utc::now().timestamp(),
            );
            self.send(session_id, &header, &body).await;
        } else {
            {
                let mut engine = self.engine.lock().await;
                engine.on_connect_outcome(notice.endpoint, false);
                engine.on_session_closed(session_id);
            }
            self.manager.remove(session_id).await;
        }
    }

    async fn on_ver_resp(&self, session_id: &str, peer_addr: SocketAddr, resp: VerResp) {
        if resp.node_id.is_empty() {
            tracing::warn!(session = %session_id, "ver_resp without node id ignored");
            return;
        }
        self.engine.lock().await.on_handshake(
            peer_addr,
            session_id,
            &resp.node_id,
            resp.protocol_version,
        );

        // Ask the fresh peer who else is out there
        let (header, body) = build_get_peer_nodes_req(self.magic);
        self.send(session_id, &header, &body).await;
    }

    /// Inbound handshake: answer with our version and track the peer. The
    /// address the peer advertises for itself becomes a candidate.
    async fn on_ver_req(&self, session_id: &str, peer_addr: SocketAddr, req: VerReq) {
        let (header, body) = build_ver_resp(self.magic, self.identity.node_id());
        self.send(session_id, &header, &body).await;

        if req.node_id.is_empty() {
            return;
        }
        let mut engine = self.engine.lock().await;
        engine.on_handshake(peer_addr, session_id, &req.node_id, req.protocol_version);
        if let Some(advertised) = parse_net_address(&req.addr_me) {
            engine.add_candidates([(advertised, Some(req.node_id.clone()))]);
        }
    }

    async fn on_get_peer_nodes_req(&self, session_id: &str) {
        let now = chrono::Utc::now().timestamp();
        let peers: Vec<PeerNodeInfo> = self
            .engine
            .lock()
            .await
            .candidates()
            .into_iter()
            .take(MAX_PEERS_PER_EXCHANGE)
            .map(|c| PeerNodeInfo {
                peer_node_id: c.node_id.unwrap_or_default(),
                core_version: neuromesh_protocol::CORE_VERSION,
                protocol_version: neuromesh_protocol::PROTOCOL_VERSION,
                live_time_stamp: now,
                addr: NetAddress::from_socket_addr(&c.endpoint),
            })
            .collect();

        let (header, body) = build_get_peer_nodes_resp(self.magic, peers);
        self.send(session_id, &header, &body).await;
    }

    async fn on_get_peer_nodes_resp(&self, resp: GetPeerNodesResp) {
        let candidates: Vec<(SocketAddr, Option<String>)> = resp
            .peers
            .iter()
            .filter_map(|peer| {
                parse_net_address(&peer.addr).map(|endpoint| {
                    let node_id = (!peer.peer_node_id.is_empty())
                        .then(|| peer.peer_node_id.clone());
                    (endpoint, node_id)
                })
            })
            .collect();

        if candidates.is_empty() {
            return;
        }
        let added = self.engine.lock().await.add_candidates(candidates);
        if added > 0 {
            tracing::info!(added, "peer exchange: new candidates");
        }
    }

    async fn send(&self, session_id: &str, header: &MsgHeader, body: &Body) {
        match WireCodec::encode(header, body) {
            Ok(bytes) => {
                if let Err(e) = self.manager.send_to(session_id, bytes).await {
                    tracing::debug!(
                        session = %session_id,
                        msg = %header.msg_name,
                        error = %e,
                        "send failed"
                    );
                }
            }
            Err(e) => {
                tracing::error!(msg = %header.msg_name, error = %e, "encode failed");
            }
        }
    }
}

fn parse_net_address(addr: &NetAddress) -> Option<SocketAddr> {
    if addr.ip.is_empty() || addr.port == 0 {
        return None;
    }
    format!("{}:{}", addr.ip, addr.port as u16).parse().ok()
}

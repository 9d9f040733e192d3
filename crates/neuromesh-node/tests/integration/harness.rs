//! Test harness for in-process neuromesh-node integration tests.
//!
//! `TestNode` runs the real transport loops and discovery task against
//! loopback sockets; `ScriptedPeer` plays the remote side of a connection
//! with real frames.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use neuromesh_crypto::NodeIdentity;
use neuromesh_discovery::{DiscoveryEngine, RetryPolicy};
use neuromesh_node::channel::ChannelSettings;
use neuromesh_node::config::NodeConfig;
use neuromesh_node::connection_manager::ConnectionManager;
use neuromesh_node::discovery_task::DiscoveryTask;
use neuromesh_node::dispatcher::Dispatcher;
use neuromesh_protocol::{Body, FrameReassembler, MsgHeader, WireCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};

/// Config tuned for loopback tests: fast sweeps, short poll bounds.
pub fn fast_config(static_seeds: Vec<String>) -> NodeConfig {
    let mut cfg = NodeConfig::default();
    cfg.network.static_seeds = static_seeds;
    cfg.discovery.sweep_interval_secs = 1;
    cfg.discovery.keepalive_interval_secs = 1;
    cfg.transport.poll_timeout_ms = 50;
    cfg
}

/// A node running its transport loops and discovery task in-process.
pub struct TestNode {
    pub identity: Arc<NodeIdentity>,
    pub bus: Dispatcher,
    pub manager: Arc<ConnectionManager>,
    pub engine: Arc<Mutex<DiscoveryEngine>>,
    pub listen_addr: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    _handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestNode {
    pub async fn start(mut cfg: NodeConfig) -> Self {
        let identity = Arc::new(NodeIdentity::generate());
        let bus = Dispatcher::new();
        let manager = ConnectionManager::new(ChannelSettings::from_config(&cfg), bus.clone());
        let engine = Arc::new(Mutex::new(DiscoveryEngine::new(
            cfg.discovery.max_active_peers,
            RetryPolicy {
                failure_threshold: cfg.discovery.failure_threshold,
                failure_cooldown: cfg.failure_cooldown(),
            },
        )));
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        let listen_addr = match cfg.network.listen_addr.clone() {
            Some(addr) => {
                let listener = TcpListener::bind(&addr).await.unwrap();
                let local = listener.local_addr().unwrap();
                cfg.network.listen_addr = Some(local.to_string());
                handles.push(tokio::spawn(
                    manager.clone().run_acceptor(listener, shutdown_tx.subscribe()),
                ));
                Some(local)
            }
            None => None,
        };

        handles.push(tokio::spawn(
            manager.clone().run_io_loop(shutdown_tx.subscribe()),
        ));
        handles.push(tokio::spawn(
            manager.clone().run_drain_loop(shutdown_tx.subscribe()),
        ));

        let discovery = DiscoveryTask::new(
            engine.clone(),
            manager.clone(),
            bus.clone(),
            identity.clone(),
            &cfg,
        );
        handles.push(tokio::spawn(discovery.run(shutdown_tx.subscribe())));

        Self {
            identity,
            bus,
            manager,
            engine,
            listen_addr,
            shutdown_tx,
            _handles: handles,
        }
    }

    pub async fn active_peer_count(&self) -> usize {
        self.engine.lock().await.active_count()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// A loopback address that refuses connections immediately (bound, then
/// released). Keeps dial failures fast so they never stall the discovery
/// task in tests.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll a predicate over the discovery engine until it holds or `timeout`
/// elapses.
pub async fn wait_for_engine<F>(
    engine: &Arc<Mutex<DiscoveryEngine>>,
    timeout: Duration,
    mut cond: F,
) -> bool
where
    F: FnMut(&DiscoveryEngine) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond(&*engine.lock().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// The remote end of one channel, driven from test code with real frames.
pub struct ScriptedPeer {
    stream: TcpStream,
    reassembler: FrameReassembler,
    pending: VecDeque<(MsgHeader, Body)>,
}

#[allow(dead_code)]
impl ScriptedPeer {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self::wrap(stream)
    }

    pub async fn connect(addr: SocketAddr) -> Self {
        Self::wrap(TcpStream::connect(addr).await.unwrap())
    }

    fn wrap(stream: TcpStream) -> Self {
        Self {
            stream,
            reassembler: FrameReassembler::new(),
            pending: VecDeque::new(),
        }
    }

    pub async fn send(&mut self, header: &MsgHeader, body: &Body) {
        let bytes = WireCodec::encode(header, body).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next decoded message, in arrival order.
    pub async fn recv(&mut self, timeout: Duration) -> (MsgHeader, Body) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.pending.pop_front() {
                return message;
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("timed out waiting for a message");
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(remaining, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for bytes")
                .unwrap();
            assert!(n > 0, "peer closed the connection");

            let mut frames = Vec::new();
            self.reassembler.feed(&buf[..n], &mut frames).unwrap();
            for frame in frames {
                self.pending
                    .push_back(WireCodec::decode_frame(&frame).unwrap());
            }
        }
    }

    /// Next message named `msg_name`, skipping anything else (keepalives
    /// interleave with everything).
    pub async fn recv_named(&mut self, msg_name: &str, timeout: Duration) -> (MsgHeader, Body) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {msg_name}"));
            let (header, body) = self.recv(remaining).await;
            if header.msg_name == msg_name {
                return (header, body);
            }
        }
    }
}

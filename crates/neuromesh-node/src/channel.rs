//! One peer TCP connection: socket, bounded queues, frame reassembly.
//!
//! A channel never blocks: `io_tick` performs a single bounded readiness
//! poll and services at most one read and one write, which keeps latency
//! fair across many channels driven by one loop. Socket failures do not
//! escalate as errors; they flip the channel to disconnected and surface as
//! a `client_connect_notification` with status -1 on the bus. Channels never
//! reconnect themselves; that is discovery's call.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use neuromesh_protocol::{
    Body, ConnectNotification, Frame, FrameReassembler, MsgHeader, WireCodec,
    CLIENT_CONNECT_NOTIFICATION,
};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::NodeConfig;
use crate::dispatcher::{Dispatcher, Envelope};
use crate::NetError;

/// Upper bound on a single socket read.
pub const READ_BUFFER_BYTES: usize = 10_240;

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub magic: i32,
    pub poll_timeout: Duration,
    pub send_queue_capacity: usize,
    pub recv_queue_capacity: usize,
}

impl ChannelSettings {
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            magic: cfg.node.magic,
            poll_timeout: cfg.poll_timeout(),
            send_queue_capacity: cfg.transport.send_queue_capacity,
            recv_queue_capacity: cfg.transport.recv_queue_capacity,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            magic: neuromesh_protocol::PROTOCOL_MAGIC,
            poll_timeout: Duration::from_secs(1),
            send_queue_capacity: 1000,
            recv_queue_capacity: 1000,
        }
    }
}

/// Socket-side state, touched only under the io lock.
struct ChannelIo {
    stream: Option<TcpStream>,
    reassembler: FrameReassembler,
}

pub struct Channel {
    peer_addr: SocketAddr,
    session_id: String,
    settings: ChannelSettings,
    bus: Dispatcher,
    io: Mutex<ChannelIo>,
    send_queue: Mutex<VecDeque<Bytes>>,
    recv_queue: Mutex<VecDeque<Frame>>,
    connected: AtomicBool,
}

/// Locally generated opaque session id; never negotiated with the peer.
pub fn new_session_id() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

impl Channel {
    /// A channel for an outbound connection; call [`Channel::connect`] next.
    pub fn new(peer_addr: SocketAddr, settings: ChannelSettings, bus: Dispatcher) -> Self {
        Self {
            peer_addr,
            session_id: new_session_id(),
            settings,
            bus,
            io: Mutex::new(ChannelIo {
                stream: None,
                reassembler: FrameReassembler::new(),
            }),
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Wrap an accepted inbound socket; already connected, no notification
    /// (inbound peers announce themselves with `ver_req`).
    pub fn from_accepted(
        stream: TcpStream,
        peer_addr: SocketAddr,
        settings: ChannelSettings,
        bus: Dispatcher,
    ) -> Self {
        Self {
            peer_addr,
            session_id: new_session_id(),
            settings,
            bus,
            io: Mutex::new(ChannelIo {
                stream: Some(stream),
                reassembler: FrameReassembler::new(),
            }),
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the socket. Success and failure are both announced on the bus so
    /// discovery learns the outcome without holding a channel reference.
    pub async fn connect(&self) -> Result<(), NetError> {
        match TcpStream::connect(self.peer_addr).await {
            Ok(stream) => {
                self.io.lock().await.stream = Some(stream);
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(peer = %self.peer_addr, session = %self.session_id, "connected");
                self.notify(0).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "connect failed");
                self.notify(-1).await;
                Err(NetError::Io(e))
            }
        }
    }

    /// Queue bytes for sending. Rejected when disconnected or full; the
    /// caller decides whether that matters.
    pub async fn enqueue_send(&self, bytes: Bytes) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        let mut queue = self.send_queue.lock().await;
        if queue.len() >= self.settings.send_queue_capacity {
            return Err(NetError::SendQueueFull);
        }
        queue.push_back(bytes);
        Ok(())
    }

    /// One bounded readiness check servicing at most one read and one write.
    pub async fn io_tick(&self) {
        if !self.is_connected() {
            return;
        }
        let mut io = self.io.lock().await;
        let Some(stream) = io.stream.as_ref() else {
            return;
        };

        let mut interest = Interest::READABLE;
        if !self.send_queue.lock().await.is_empty() {
            interest = interest | Interest::WRITABLE;
        }

        let poll = tokio::time::timeout(self.settings.poll_timeout, stream.ready(interest)).await;
        let ready = match poll {
            // Nothing became ready within the poll bound
            Err(_) => return,
            Ok(Err(e)) => {
                let reason = format!("readiness poll failed: {e}");
                self.teardown(&mut io, &reason).await;
                return;
            }
            Ok(Ok(ready)) => ready,
        };

        if ready.is_readable() {
            if let Err(reason) = self.service_read(&mut io).await {
                self.teardown(&mut io, &reason).await;
                return;
            }
        }
        if ready.is_writable() {
            if let Err(reason) = self.service_write(&mut io).await {
                self.teardown(&mut io, &reason).await;
            }
        }
    }

    async fn service_read(&self, io: &mut ChannelIo) -> Result<(), String> {
        let ChannelIo {
            stream,
            reassembler,
        } = io;
        let Some(stream) = stream.as_ref() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_BUFFER_BYTES];
        match stream.try_read(&mut buf) {
            Ok(0) => Err("peer closed connection".into()),
            Ok(n) => {
                let mut frames = Vec::new();
                reassembler
                    .feed(&buf[..n], &mut frames)
                    .map_err(|e| e.to_string())?;

                if !frames.is_empty() {
                    let mut queue = self.recv_queue.lock().await;
                    for frame in frames {
                        if queue.len() >= self.settings.recv_queue_capacity {
                            tracing::warn!(
                                session = %self.session_id,
                                "recv queue full, sealed frame dropped"
                            );
                            continue;
                        }
                        queue.push_back(frame);
                    }
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(format!("read failed: {e}")),
        }
    }

    async fn service_write(&self, io: &mut ChannelIo) -> Result<(), String> {
        let Some(stream) = io.stream.as_ref() else {
            return Ok(());
        };
        let Some(bytes) = self.send_queue.lock().await.pop_front() else {
            return Ok(());
        };

        match stream.try_write(&bytes) {
            Ok(n) if n < bytes.len() => {
                // Keep the unwritten tail at the front so byte order holds
                self.send_queue.lock().await.push_front(bytes.slice(n..));
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.send_queue.lock().await.push_front(bytes);
                Ok(())
            }
            Err(e) => Err(format!("write failed: {e}")),
        }
    }

    /// Pop sealed frames, decode, publish. Keepalive acks are consumed here;
    /// decode failures are dropped without touching the connection.
    pub async fn drain_tick(&self) {
        loop {
            let frame = self.recv_queue.lock().await.pop_front();
            let Some(frame) = frame else {
                return;
            };

            match WireCodec::decode_frame(&frame) {
                Ok((header, body)) => {
                    if matches!(body, Body::ShakeHandResp) {
                        tracing::trace!(session = %self.session_id, "keepalive ack");
                        continue;
                    }
                    let topic = header.msg_name.clone();
                    tracing::debug!(session = %self.session_id, %topic, "message received");
                    self.bus
                        .publish(Envelope {
                            topic,
                            session_id: self.session_id.clone(),
                            peer_addr: self.peer_addr,
                            header,
                            body,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        session = %self.session_id,
                        error = %e,
                        "frame dropped: decode failure"
                    );
                }
            }
        }
    }

    /// Drop the socket without a notification (deregistration path).
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.io.lock().await.stream = None;
    }

    async fn teardown(&self, io: &mut ChannelIo, reason: &str) {
        io.stream = None;
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(
            peer = %self.peer_addr,
            session = %self.session_id,
            reason,
            "channel torn down"
        );
        self.notify(-1).await;
    }

    async fn notify(&self, status: i32) {
        self.bus
            .publish(Envelope {
                topic: CLIENT_CONNECT_NOTIFICATION.to_string(),
                session_id: self.session_id.clone(),
                peer_addr: self.peer_addr,
                header: MsgHeader::new(self.settings.magic, CLIENT_CONNECT_NOTIFICATION),
                body: Body::ConnectNotification(ConnectNotification {
                    endpoint: self.peer_addr,
                    status,
                }),
            })
            .await;
    }
}

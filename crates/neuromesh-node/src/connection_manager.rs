//! Registry of live channels keyed by session id, plus the worker loops
//! that drive them.
//!
//! Two loops run for the life of the node: one ticking socket I/O on every
//! registered channel, one draining sealed frames into the bus. Both iterate
//! over a snapshot of the session map so registration and removal never race
//! an iteration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};

use crate::channel::{Channel, ChannelSettings};
use crate::dispatcher::Dispatcher;
use crate::NetError;

/// Pause when no channels are registered, and between drain sweeps.
const IDLE_SLEEP: Duration = Duration::from_millis(100);
const DRAIN_SLEEP: Duration = Duration::from_millis(25);

pub struct ConnectionManager {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    settings: ChannelSettings,
    bus: Dispatcher,
}

impl ConnectionManager {
    pub fn new(settings: ChannelSettings, bus: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            settings,
            bus,
        })
    }

    /// Open an outbound channel. The channel is registered only when the
    /// socket opens; either way the connect outcome is published on the bus.
    pub async fn connect_new(&self, endpoint: SocketAddr) -> Result<String, NetError> {
        let channel = Arc::new(Channel::new(
            endpoint,
            self.settings.clone(),
            self.bus.clone(),
        ));
        channel.connect().await?;

        let session_id = channel.session_id().to_string();
        self.channels
            .write()
            .await
            .insert(session_id.clone(), channel);
        Ok(session_id)
    }

    /// Register an accepted inbound socket as a live channel.
    pub async fn register_inbound(
        &self,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> String {
        let channel = Arc::new(Channel::from_accepted(
            stream,
            peer_addr,
            self.settings.clone(),
            self.bus.clone(),
        ));
        let session_id = channel.session_id().to_string();
        tracing::info!(peer = %peer_addr, session = %session_id, "inbound channel registered");
        self.channels
            .write()
            .await
            .insert(session_id.clone(), channel);
        session_id
    }

    /// Queue `bytes` on every registered channel. Per-channel rejections are
    /// logged, never propagated.
    pub async fn broadcast(&self, bytes: Bytes) {
        for channel in self.snapshot().await {
            if let Err(e) = channel.enqueue_send(bytes.clone()).await {
                tracing::warn!(
                    session = %channel.session_id(),
                    error = %e,
                    "broadcast enqueue failed"
                );
            }
        }
    }

    /// Unicast to one session.
    pub async fn send_to(&self, session_id: &str, bytes: Bytes) -> Result<(), NetError> {
        let channel = {
            let channels = self.channels.read().await;
            channels
                .get(session_id)
                .cloned()
                .ok_or_else(|| NetError::UnknownSession(session_id.to_string()))?
        };
        channel.enqueue_send(bytes).await
    }

    /// Deregister and close a channel. A no-op for unknown sessions.
    pub async fn remove(&self, session_id: &str) {
        let channel = self.channels.write().await.remove(session_id);
        if let Some(channel) = channel {
            channel.close().await;
            tracing::info!(session = %session_id, "channel removed");
        }
    }

    pub async fn peer_addr_of(&self, session_id: &str) -> Option<SocketAddr> {
        self.channels
            .read()
            .await
            .get(session_id)
            .map(|c| c.peer_addr())
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.read().await.values().cloned().collect()
    }

    /// Socket loop: one bounded io tick per channel per cycle, all channels
    /// concurrently so an idle channel's poll bound never delays the rest.
    pub async fn run_io_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("io loop stopped");
                    return;
                }
                _ = self.io_cycle() => {}
            }
        }
    }

    async fn io_cycle(&self) {
        let channels = self.snapshot().await;
        if channels.is_empty() {
            tokio::time::sleep(IDLE_SLEEP).await;
            return;
        }
        futures::future::join_all(channels.iter().map(|c| c.io_tick())).await;
    }

    /// Decode loop: pops sealed frames from every channel and publishes the
    /// decoded messages.
    pub async fn run_drain_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("drain loop stopped");
                    return;
                }
                _ = self.drain_cycle() => {}
            }
        }
    }

    async fn drain_cycle(&self) {
        let channels = self.snapshot().await;
        if channels.is_empty() {
            tokio::time::sleep(IDLE_SLEEP).await;
            return;
        }
        for channel in &channels {
            channel.drain_tick().await;
        }
        tokio::time::sleep(DRAIN_SLEEP).await;
    }

    /// Accept loop for inbound peers.
    pub async fn run_acceptor(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("acceptor stopped");
                    return;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            self.register_inbound(stream, peer_addr).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            tokio::time::sleep(IDLE_SLEEP).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_settings() -> ChannelSettings {
        ChannelSettings {
            poll_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_session() {
        let manager = ConnectionManager::new(quick_settings(), Dispatcher::new());
        match manager.send_to("missing", Bytes::from_static(b"x")).await {
            Err(NetError::UnknownSession(id)) => assert_eq!(id, "missing"),
            other => panic!("expected UnknownSession, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let manager = ConnectionManager::new(quick_settings(), Dispatcher::new());
        manager.remove("missing").await;
        manager.remove("missing").await;
        assert_eq!(manager.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_connect_new_registers_on_success_only() {
        let manager = ConnectionManager::new(quick_settings(), Dispatcher::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session = manager.connect_new(addr).await.unwrap();
        assert_eq!(manager.channel_count().await, 1);
        assert_eq!(manager.peer_addr_of(&session).await, Some(addr));

        drop(listener);
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);
        assert!(manager.connect_new(dead_addr).await.is_err());
        assert_eq!(manager.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_failed_channels() {
        let manager = ConnectionManager::new(quick_settings(), Dispatcher::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session = manager.connect_new(addr).await.unwrap();

        // Close the channel under broadcast's feet; enqueue now rejects
        let channel = manager.channels.read().await.get(&session).cloned().unwrap();
        channel.close().await;

        manager.broadcast(Bytes::from_static(b"hello")).await;
    }
}

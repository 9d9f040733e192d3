//! Neuromesh Node -- library crate for the peer network core.
//!
//! Re-exports the transport, dispatch and discovery task modules so
//! integration tests and embedders can wire them the same way the binary
//! does.

use std::path::PathBuf;

pub mod channel;
pub mod config;
pub mod connection_manager;
pub mod discovery_task;
pub mod dispatcher;
pub mod requests;

/// Caller-visible transport failures. Transport errors inside the tick
/// loops never surface here; they become bus notifications instead.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("channel not connected")]
    NotConnected,
    #[error("send queue full")]
    SendQueueFull,
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

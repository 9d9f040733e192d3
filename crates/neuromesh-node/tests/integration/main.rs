//! Integration test entry point for neuromesh-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod transport;
mod handshake;

//! Neuromesh Protocol -- wire types, typed binary codec, frame reassembly.
//!
//! TCP between peers. Every frame is an 8-byte packet header (big-endian
//! total length + protocol type word) followed by a typed binary message
//! header and body.

pub mod codec;
pub mod encoding;
pub mod messages;
pub mod reassembly;

pub use codec::{Frame, WireCodec};
pub use messages::*;
pub use reassembly::FrameReassembler;

/// Protocol magic number (network identifier). Configurable per deployment;
/// this is the default for the public mesh.
pub const PROTOCOL_MAGIC: i32 = 0x4E4D_0001;

/// Core software version advertised in version handshakes.
pub const CORE_VERSION: i32 = 0x0002_0200;

/// Protocol version advertised in version handshakes.
pub const PROTOCOL_VERSION: i32 = 0x0000_0001;

/// Hard cap on a single frame, including the 8-byte packet header.
/// A peer declaring more than this is treated as corrupt.
pub const MAX_FRAME_BYTES: usize = 102_400;

/// Packet header size: u32 declared length + u32 protocol type word.
pub const PACKET_HEADER_BYTES: usize = 8;

/// Protocol type word for uncompressed typed binary (the only supported one).
pub const TYPE_WORD_BINARY: u32 = 0;

/// Default port peers listen on, used for DNS-discovered endpoints.
pub const DEFAULT_PEER_PORT: u16 = 21_107;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame length mismatch: declared {declared}, got {actual} bytes")]
    FrameLengthMismatch { declared: u32, actual: usize },
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("unsupported protocol type word: {0:#010x}")]
    UnsupportedProtocolType(u32),
    #[error("message decode error: {0}")]
    MessageDecodeError(String),
    #[error("{0} is node-local and cannot be wire-encoded")]
    NotWireMessage(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

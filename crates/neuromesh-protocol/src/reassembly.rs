//! Per-connection frame reassembly.
//!
//! Turns an arbitrary sequence of socket reads into sealed frames. A single
//! read may carry several frames, a fraction of one, or even a fraction of
//! the 4-byte length prefix; no byte is ever lost or double-counted.

use bytes::BytesMut;

use crate::codec::Frame;
use crate::{ProtocolError, MAX_FRAME_BYTES, PACKET_HEADER_BYTES};

/// Accumulator for the frame currently in flight.
///
/// `declared == 0` means the length prefix is still incomplete. Once known,
/// `buf.len() <= declared` holds until the frame seals at equality, at which
/// point the accumulator restarts with whatever input bytes were left over.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    declared: u32,
    buf: BytesMut,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of input, appending every frame it seals to `out`.
    ///
    /// An error means the stream is corrupt (length over the hard cap or
    /// under the packet-header minimum) and the connection must be torn
    /// down; the reassembler is not usable afterwards.
    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<Frame>) -> Result<(), ProtocolError> {
        while !input.is_empty() {
            if self.declared == 0 {
                let need = 4 - self.buf.len();
                let take = need.min(input.len());
                self.buf.extend_from_slice(&input[..take]);
                input = &input[take..];
                if self.buf.len() < 4 {
                    return Ok(());
                }

                let declared =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                if declared as usize > MAX_FRAME_BYTES {
                    return Err(ProtocolError::FrameTooLarge {
                        size: declared as usize,
                        max: MAX_FRAME_BYTES,
                    });
                }
                if (declared as usize) < PACKET_HEADER_BYTES {
                    return Err(ProtocolError::FrameLengthMismatch {
                        declared,
                        actual: self.buf.len(),
                    });
                }
                self.declared = declared;
            }

            let need = self.declared as usize - self.buf.len();
            let take = need.min(input.len());
            self.buf.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.buf.len() == self.declared as usize {
                let sealed = self.buf.split().freeze();
                out.push(Frame::from_sealed(sealed));
                self.declared = 0;
            }
        }
        Ok(())
    }

    /// Bytes buffered for the frame in flight (0 when idle).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

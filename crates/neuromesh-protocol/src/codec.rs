//! Frame-level codec: 8-byte packet header + typed binary header and body.
//!
//! Wire layout: big-endian `u32` declared length (counting the packet header
//! itself) + big-endian `u32` protocol type word (0 = uncompressed typed
//! binary) + message header + message body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::encoding::{BinaryReader, BinaryWriter};
use crate::messages::{Body, MsgHeader};
use crate::{ProtocolError, MAX_FRAME_BYTES, PACKET_HEADER_BYTES, TYPE_WORD_BINARY};

/// One sealed wire unit. `payload` is everything after the packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub declared_length: u32,
    pub type_word: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Split a complete frame's bytes (packet header included) into parts.
    /// The caller guarantees `buf.len() == declared_length`; the reassembler
    /// is the only producer.
    pub(crate) fn from_sealed(mut buf: Bytes) -> Self {
        let declared_length = buf.get_u32();
        let type_word = buf.get_u32();
        Self {
            declared_length,
            type_word,
            payload: buf,
        }
    }
}

/// Stateless encoder/decoder for whole frames.
pub struct WireCodec;

impl WireCodec {
    /// Serialize header then body and prepend the packet header.
    pub fn encode(header: &MsgHeader, body: &Body) -> Result<Bytes, ProtocolError> {
        let mut w = BinaryWriter::new();
        header.write(&mut w);
        body.write(&mut w)?;
        let payload = w.into_inner();

        let total = PACKET_HEADER_BYTES + payload.len();
        if total > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut out = BytesMut::with_capacity(total);
        out.put_u32(total as u32);
        out.put_u32(TYPE_WORD_BINARY);
        out.extend_from_slice(&payload);
        Ok(out.freeze())
    }

    /// Decode a complete frame. The declared length must match the supplied
    /// byte count exactly.
    pub fn decode(bytes: &[u8]) -> Result<(MsgHeader, Body), ProtocolError> {
        if bytes.len() < PACKET_HEADER_BYTES {
            return Err(ProtocolError::FrameLengthMismatch {
                declared: 0,
                actual: bytes.len(),
            });
        }
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if declared as usize != bytes.len() {
            return Err(ProtocolError::FrameLengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        let type_word = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if type_word != TYPE_WORD_BINARY {
            return Err(ProtocolError::UnsupportedProtocolType(type_word));
        }

        let mut r = BinaryReader::new(&bytes[PACKET_HEADER_BYTES..]);
        let header = MsgHeader::read(&mut r)?;
        let body = Body::read(&header.msg_name, &mut r)?;
        Ok((header, body))
    }

    /// Decode a sealed frame from the reassembler.
    pub fn decode_frame(frame: &Frame) -> Result<(MsgHeader, Body), ProtocolError> {
        let actual = PACKET_HEADER_BYTES + frame.payload.len();
        if frame.declared_length as usize != actual {
            return Err(ProtocolError::FrameLengthMismatch {
                declared: frame.declared_length,
                actual,
            });
        }
        if frame.type_word != TYPE_WORD_BINARY {
            return Err(ProtocolError::UnsupportedProtocolType(frame.type_word));
        }

        let mut r = BinaryReader::new(&frame.payload);
        let header = MsgHeader::read(&mut r)?;
        let body = Body::read(&header.msg_name, &mut r)?;
        Ok((header, body))
    }
}

impl Encoder<(MsgHeader, Body)> for WireCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        item: (MsgHeader, Body),
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let bytes = WireCodec::encode(&item.0, &item.1)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = (MsgHeader, Body);
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if declared > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: declared,
                max: MAX_FRAME_BYTES,
            });
        }
        if declared < PACKET_HEADER_BYTES {
            return Err(ProtocolError::FrameLengthMismatch {
                declared: declared as u32,
                actual: src.len(),
            });
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let frame = src.split_to(declared);
        WireCodec::decode(&frame).map(Some)
    }
}

//! Typed binary field encoding.
//!
//! Field grammar: one type byte + big-endian i16 field id, then the value.
//! Strings are i32 length-prefixed, maps are key-type + value-type + i32
//! count, lists are element-type + i32 count. Structs are a field sequence
//! terminated by the stop byte.
//!
//! The stop byte is 0x7F, not the conventional 0x00.

use bytes::{Buf, BufMut, BytesMut};

use crate::ProtocolError;

/// Struct terminator.
pub const T_STOP: u8 = 0x7F;
pub const T_BOOL: u8 = 2;
pub const T_BYTE: u8 = 3;
pub const T_DOUBLE: u8 = 4;
pub const T_I16: u8 = 6;
pub const T_I32: u8 = 8;
pub const T_I64: u8 = 10;
pub const T_STRING: u8 = 11;
pub const T_STRUCT: u8 = 12;
pub const T_MAP: u8 = 13;
pub const T_SET: u8 = 14;
pub const T_LIST: u8 = 15;

/// Writer for one encoded message. Appends to an owned buffer; call
/// [`BinaryWriter::into_inner`] when the struct sequence is complete.
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn field_begin(&mut self, ttype: u8, id: i16) {
        self.buf.put_u8(ttype);
        self.buf.put_i16(id);
    }

    pub fn stop(&mut self) {
        self.buf.put_u8(T_STOP);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_byte(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_string(&mut self, v: &str) {
        self.buf.put_i32(v.len() as i32);
        self.buf.put_slice(v.as_bytes());
    }

    pub fn map_begin(&mut self, key_type: u8, val_type: u8, len: usize) {
        self.buf.put_u8(key_type);
        self.buf.put_u8(val_type);
        self.buf.put_i32(len as i32);
    }

    pub fn list_begin(&mut self, elem_type: u8, len: usize) {
        self.buf.put_u8(elem_type);
        self.buf.put_i32(len as i32);
    }

    /// Convenience: a complete string field.
    pub fn string_field(&mut self, id: i16, v: &str) {
        self.field_begin(T_STRING, id);
        self.write_string(v);
    }

    /// Convenience: a complete i32 field.
    pub fn i32_field(&mut self, id: i16, v: i32) {
        self.field_begin(T_I32, id);
        self.write_i32(v);
    }

    /// Convenience: a complete i64 field.
    pub fn i64_field(&mut self, id: i16, v: i64) {
        self.field_begin(T_I64, id);
        self.write_i64(v);
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_err(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::MessageDecodeError(msg.into())
}

/// Cursor over one encoded message. All reads are bounds-checked; running
/// off the end yields `MessageDecodeError`, never a panic.
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.buf
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < n {
            return Err(decode_err(format!(
                "truncated input: need {n} bytes, have {}",
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<i8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn read_len(&mut self) -> Result<usize, ProtocolError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(decode_err(format!("negative length {len}")));
        }
        Ok(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_len()?;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        String::from_utf8(head.to_vec()).map_err(|e| decode_err(format!("invalid utf-8: {e}")))
    }

    /// Next field header, or `None` at the stop byte.
    pub fn read_field_begin(&mut self) -> Result<Option<(u8, i16)>, ProtocolError> {
        let ttype = self.read_u8()?;
        if ttype == T_STOP {
            return Ok(None);
        }
        let id = self.read_i16()?;
        Ok(Some((ttype, id)))
    }

    pub fn read_map_begin(&mut self) -> Result<(u8, u8, usize), ProtocolError> {
        let key_type = self.read_u8()?;
        let val_type = self.read_u8()?;
        let len = self.read_len()?;
        Ok((key_type, val_type, len))
    }

    pub fn read_list_begin(&mut self) -> Result<(u8, usize), ProtocolError> {
        let elem_type = self.read_u8()?;
        let len = self.read_len()?;
        Ok((elem_type, len))
    }

    /// Skip one value of the given type. Keeps decoding resilient against
    /// fields added by newer peers.
    pub fn skip(&mut self, ttype: u8) -> Result<(), ProtocolError> {
        match ttype {
            T_BOOL | T_BYTE => {
                self.read_u8()?;
            }
            T_I16 => {
                self.read_i16()?;
            }
            T_I32 => {
                self.read_i32()?;
            }
            T_I64 => {
                self.read_i64()?;
            }
            T_DOUBLE => {
                self.read_f64()?;
            }
            T_STRING => {
                let len = self.read_len()?;
                self.need(len)?;
                self.buf = &self.buf[len..];
            }
            T_STRUCT => {
                while let Some((ftype, _)) = self.read_field_begin()? {
                    self.skip(ftype)?;
                }
            }
            T_MAP => {
                let (key_type, val_type, len) = self.read_map_begin()?;
                for _ in 0..len {
                    self.skip(key_type)?;
                    self.skip(val_type)?;
                }
            }
            T_SET | T_LIST => {
                let (elem_type, len) = self.read_list_begin()?;
                for _ in 0..len {
                    self.skip(elem_type)?;
                }
            }
            other => {
                return Err(decode_err(format!("cannot skip unknown type {other:#04x}")));
            }
        }
        Ok(())
    }
}

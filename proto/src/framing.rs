//! Wire framing: `(op_code: u8, payload)` packets over a byte stream.
//!
//! A packet on the wire is `op_code: u8`, `payload_len: u32` (network order),
//! then exactly `payload_len` bytes. Typed fields inside a payload are encoded
//! with [`FrameWriter`] and decoded with [`FrameReader`]: fixed-width unsigned
//! integers in network byte order, strings as `u32` byte length + bytes (no
//! terminator), and byte blobs the same way.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Largest payload we are willing to allocate for on a single packet.
///
/// READ/WRITE instructions stream file content through here, so this must
/// comfortably exceed one logical block; it exists only to reject corrupt or
/// hostile length prefixes before they cause an enormous allocation.
pub const MAX_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_BYTES} byte limit")]
    PayloadTooLarge(u32),
    #[error("unexpected end of payload while reading a {0}")]
    Truncated(&'static str),
    #[error("string field was not valid utf-8")]
    InvalidUtf8,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Reads one framed packet: `(op_code, payload)`.
pub fn read_packet<R: Read>(r: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header)?;
    let op_code = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((op_code, payload))
}

/// Writes one framed packet. A single `write_all` keeps the header and body
/// from interleaving with another thread's packet on the same stream.
pub fn write_packet<W: Write>(w: &mut W, op_code: u8, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(op_code);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    w.write_all(&out)?;
    Ok(())
}

/// Builds a payload field by field, in wire order.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_string(&mut self, v: &str) -> &mut Self {
        self.write_bytes(v.as_bytes())
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields back out of a payload, in the order they were written.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self.offset + n;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated(what));
        }
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1, "i8")?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len, "bytes")?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_fields() {
        let mut w = FrameWriter::new();
        w.write_u32(42).write_string("hello").write_bytes(&[1, 2, 3]).write_i8(-7);
        let payload = w.into_payload();

        let mut r = FrameReader::new(&payload);
        assert_eq!(r.read_u32().unwrap(), 42);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(r.read_i8().unwrap(), -7);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_payload_errors() {
        let mut r = FrameReader::new(&[0, 0]);
        assert!(matches!(r.read_u32(), Err(ProtocolError::Truncated(_))));
    }

    #[test]
    fn packet_round_trip_over_a_pipe() {
        let mut buf = Vec::new();
        write_packet(&mut buf, 7, b"payload").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let (op, payload) = read_packet(&mut cursor).unwrap();
        assert_eq!(op, 7);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut header = vec![9u8];
        header.extend_from_slice(&(MAX_PAYLOAD_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(header);
        assert!(matches!(
            read_packet(&mut cursor),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }
}

//! Encoding helpers for X11 request packets.
//!
//! The client always speaks in its native byte order (that is the byte order
//! announced in the connection setup), so every field goes through
//! [`NativeEndian`].

use byteorder::{ByteOrder, NativeEndian};

use crate::error::Dri2Error;

/// Size of every reply header, error and (non-generic) event packet.
pub const PACKET_SIZE: usize = 32;

/// First byte of an error packet.
pub const KIND_ERROR: u8 = 0;
/// First byte of a reply packet.
pub const KIND_REPLY: u8 = 1;
/// First byte of an XGE generic event, which carries extra length like a reply.
pub const KIND_GENERIC_EVENT: u8 = 35;

/// Rounds `len` up to the next multiple of four.
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Number of pad bytes that follow `len` bytes of payload.
pub const fn pad4(len: usize) -> usize {
    align4(len) - len
}

/// Reads a `CARD32` at `offset`.
pub fn card32(bytes: &[u8], offset: usize) -> u32 {
    NativeEndian::read_u32(&bytes[offset..offset + 4])
}

/// Reads a `CARD16` at `offset`.
pub fn card16(bytes: &[u8], offset: usize) -> u16 {
    NativeEndian::read_u16(&bytes[offset..offset + 2])
}

/// A request under construction.
///
/// The first four bytes are always `major opcode`, `minor opcode` (or the
/// core request's data byte) and the length in 4-byte units, which is filled
/// in by [`Request::finish`].
#[derive(Debug, Clone)]
pub struct Request {
    name: &'static str,
    buf: Vec<u8>,
}

impl Request {
    /// Starts a request with the given opcode pair.
    pub fn new(name: &'static str, major_opcode: u8, minor_opcode: u8) -> Self {
        Self {
            name,
            buf: vec![major_opcode, minor_opcode, 0, 0],
        }
    }

    /// Name used in log lines and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn card32(mut self, value: u32) -> Self {
        let offset = self.buf.len();
        self.buf.resize(offset + 4, 0);
        NativeEndian::write_u32(&mut self.buf[offset..], value);
        self
    }

    pub fn card16(mut self, value: u16) -> Self {
        let offset = self.buf.len();
        self.buf.resize(offset + 2, 0);
        NativeEndian::write_u16(&mut self.buf[offset..], value);
        self
    }

    pub fn int16(mut self, value: i16) -> Self {
        let offset = self.buf.len();
        self.buf.resize(offset + 2, 0);
        NativeEndian::write_i16(&mut self.buf[offset..], value);
        self
    }

    /// Appends `bytes` followed by zero padding up to a 4-byte boundary.
    pub fn bytes_padded(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self.buf.resize(self.buf.len() + pad4(bytes.len()), 0);
        self
    }

    /// Pads the body, stores the length field and returns the encoded packet.
    pub fn finish(mut self) -> Result<Vec<u8>, Dri2Error> {
        let total = align4(self.buf.len());
        self.buf.resize(total, 0);
        let units = u16::try_from(total / 4).map_err(|_| Dri2Error::RequestTooLarge(total))?;
        NativeEndian::write_u16(&mut self.buf[2..4], units);
        Ok(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(13), 16);
        assert_eq!(pad4(5), 3);
        assert_eq!(pad4(8), 0);
    }

    #[test]
    fn finish_writes_length_in_units() {
        let packet = Request::new("CopyRegion", 140, 6)
            .card32(0x0040_0001)
            .card32(0x0040_0002)
            .card32(0)
            .card32(1)
            .finish()
            .unwrap();
        assert_eq!(packet.len(), 20);
        assert_eq!(packet[0], 140);
        assert_eq!(packet[1], 6);
        assert_eq!(card16(&packet, 2), 5);
        assert_eq!(card32(&packet, 4), 0x0040_0001);
        assert_eq!(card32(&packet, 16), 1);
    }

    #[test]
    fn strings_are_padded() {
        let packet = Request::new("QueryExtension", 98, 0)
            .card16(4)
            .card16(0)
            .bytes_padded(b"DRI2")
            .finish()
            .unwrap();
        assert_eq!(packet.len(), 12);

        let packet = Request::new("QueryExtension", 98, 0)
            .card16(6)
            .card16(0)
            .bytes_padded(b"XFIXES")
            .finish()
            .unwrap();
        assert_eq!(packet.len(), 16);
        assert_eq!(&packet[8..14], b"XFIXES");
        assert_eq!(&packet[14..16], &[0, 0]);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let mut request = Request::new("GetBuffers", 140, 5);
        for _ in 0..70_000 {
            request = request.card32(1);
        }
        assert!(matches!(request.finish(), Err(Dri2Error::RequestTooLarge(_))));
    }
}

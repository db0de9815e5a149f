//! The locked request/reply channel shared by every protocol client.
//!
//! The connection itself (socket, setup, authentication) is owned by the
//! windowing layer and handed to us as a [`Transport`]. [`Display`] adds the
//! two things the DRI2 and XFixes clients need on top of it: a lock that makes
//! each request/reply exchange atomic, and sequence tracking so that replies
//! are matched with the request that produced them.

use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::error::Dri2Error;
use crate::wire::{self, Request, KIND_ERROR, KIND_GENERIC_EVENT, KIND_REPLY, PACKET_SIZE};

/// Core protocol opcode of `QueryExtension`.
const X_QUERY_EXTENSION: u8 = 98;

/// Byte-level access to an already established X connection.
///
/// Implementations only move bytes; framing, sequence numbers and error
/// handling live in [`Display`]. Event packets that the windowing layer
/// normally consumes may show up in the read stream and are skipped.
pub trait Transport: Send {
    /// Queues one complete request packet.
    fn write_request(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Blocks until `buf` is filled from the server.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Pushes queued requests to the server.
    fn flush(&mut self) -> io::Result<()>;

    /// Allocates a fresh resource id from the client's id range.
    fn generate_id(&mut self) -> io::Result<u32>;

    /// Reads and throws away `len` bytes.
    fn discard(&mut self, mut len: usize) -> io::Result<()> {
        let mut scratch = [0u8; 256];
        while len > 0 {
            let chunk = len.min(scratch.len());
            self.read_exact(&mut scratch[..chunk])?;
            len -= chunk;
        }
        Ok(())
    }
}

/// Opcodes and event/error bases of an extension on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
}

struct Connection {
    transport: Box<dyn Transport>,
    /// Sequence number of the last request written.
    sequence: u16,
}

/// A shared, internally locked X connection.
pub struct Display {
    conn: Mutex<Connection>,
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display").finish_non_exhaustive()
    }
}

impl Display {
    /// Wraps a transport on which no request has been sent yet.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_sequence(transport, 0)
    }

    /// Wraps a transport whose last request carried `last_sequence`.
    pub fn with_sequence<T: Transport + 'static>(transport: T, last_sequence: u16) -> Self {
        Self {
            conn: Mutex::new(Connection {
                transport: Box::new(transport),
                sequence: last_sequence,
            }),
        }
    }

    /// Takes the connection lock for one exchange.
    pub fn lock(&self) -> Result<ConnectionGuard<'_>, Dri2Error> {
        let conn = self.conn.lock().map_err(|_| Dri2Error::Poisoned)?;
        Ok(ConnectionGuard { conn })
    }

    /// Sends a request that has no reply.
    pub fn send_void(&self, request: Request) -> Result<(), Dri2Error> {
        self.lock()?.send(request).map(|_| ())
    }

    /// Flushes pending requests to the server.
    pub fn flush(&self) -> Result<(), Dri2Error> {
        self.lock()?.flush()
    }

    /// Issues a core `QueryExtension` request. Not cached, see [`ExtensionCell`].
    pub fn query_extension(&self, name: &str) -> Result<Option<ExtensionInfo>, Dri2Error> {
        let name_len =
            u16::try_from(name.len()).map_err(|_| Dri2Error::RequestTooLarge(name.len()))?;
        let request = Request::new("QueryExtension", X_QUERY_EXTENSION, 0)
            .card16(name_len)
            .card16(0)
            .bytes_padded(name.as_bytes());

        let mut conn = self.lock()?;
        let sequence = conn.send(request)?;
        let reply = conn.reply("QueryExtension", sequence)?;
        let header = reply.header();
        let info = (header[8] != 0).then(|| ExtensionInfo {
            major_opcode: header[9],
            first_event: header[10],
            first_error: header[11],
        });
        debug!(extension = name, ?info, "queried extension");
        Ok(info)
    }
}

/// Exclusive access to the connection for the duration of one exchange.
pub struct ConnectionGuard<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl ConnectionGuard<'_> {
    /// Writes `request` and returns the sequence number it was assigned.
    pub fn send(&mut self, request: Request) -> Result<u16, Dri2Error> {
        let name = request.name();
        let packet = request.finish()?;
        self.conn.transport.write_request(&packet)?;
        self.conn.sequence = self.conn.sequence.wrapping_add(1);
        trace!(request = name, sequence = self.conn.sequence, len = packet.len(), "sent");
        Ok(self.conn.sequence)
    }

    pub fn flush(&mut self) -> Result<(), Dri2Error> {
        self.conn.transport.flush()?;
        Ok(())
    }

    pub fn generate_id(&mut self) -> Result<u32, Dri2Error> {
        Ok(self.conn.transport.generate_id()?)
    }

    /// Reads packets until the reply (or error) for `sequence` arrives.
    ///
    /// Errors carrying an older sequence number belong to requests that have
    /// no reply; they are logged and dropped so they never surface as the
    /// result of an unrelated call. Events are skipped.
    pub fn reply(
        &mut self,
        request: &'static str,
        sequence: u16,
    ) -> Result<ReplyReader<'_>, Dri2Error> {
        self.conn.transport.flush()?;
        loop {
            let mut packet = [0u8; PACKET_SIZE];
            self.conn.transport.read_exact(&mut packet)?;
            let packet_sequence = wire::card16(&packet, 2);

            match packet[0] {
                KIND_ERROR => {
                    let code = packet[1];
                    let minor_opcode = wire::card16(&packet, 8);
                    let major_opcode = packet[10];
                    if packet_sequence == sequence {
                        debug!(request, code, sequence, "request failed");
                        return Err(Dri2Error::Server {
                            code,
                            major_opcode,
                            minor_opcode,
                            sequence,
                        });
                    }
                    warn!(
                        code,
                        major_opcode,
                        minor_opcode,
                        sequence = packet_sequence,
                        "dropping error of an earlier request"
                    );
                }
                KIND_REPLY => {
                    let extra = wire::card32(&packet, 4) as usize * 4;
                    if packet_sequence != sequence {
                        warn!(
                            request,
                            expected = sequence,
                            got = packet_sequence,
                            "discarding unexpected reply"
                        );
                        self.conn.transport.discard(extra)?;
                        continue;
                    }
                    return Ok(ReplyReader {
                        transport: &mut self.conn.transport,
                        request,
                        header: packet,
                        remaining: extra,
                    });
                }
                KIND_GENERIC_EVENT => {
                    let extra = wire::card32(&packet, 4) as usize * 4;
                    trace!(extra, "skipping generic event");
                    self.conn.transport.discard(extra)?;
                }
                kind => trace!(kind, "skipping event"),
            }
        }
    }
}

/// One reply, positioned after its 32-byte header.
///
/// Whatever the caller does not read is discarded when the reader is dropped,
/// so an early return can never leave reply bytes on the wire.
pub struct ReplyReader<'a> {
    transport: &'a mut Box<dyn Transport>,
    request: &'static str,
    header: [u8; PACKET_SIZE],
    remaining: usize,
}

impl ReplyReader<'_> {
    pub fn header(&self) -> &[u8; PACKET_SIZE] {
        &self.header
    }

    /// `CARD32` from the fixed part of the reply.
    pub fn card32(&self, offset: usize) -> u32 {
        wire::card32(&self.header, offset)
    }

    /// Bytes of variable-length payload not read yet.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reads exactly `len` payload bytes.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, Dri2Error> {
        if len > self.remaining {
            return Err(self.malformed(format!(
                "wanted {len} bytes but only {} remain",
                self.remaining
            )));
        }
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf)?;
        self.remaining -= len;
        Ok(buf)
    }

    /// Reads `len` bytes plus their padding and returns the unpadded bytes.
    pub fn read_padded(&mut self, len: usize) -> Result<Vec<u8>, Dri2Error> {
        let mut buf = self.read(wire::align4(len))?;
        buf.truncate(len);
        Ok(buf)
    }

    pub fn malformed(&self, reason: String) -> Dri2Error {
        Dri2Error::MalformedReply {
            request: self.request,
            reason,
        }
    }
}

impl Drop for ReplyReader<'_> {
    fn drop(&mut self) {
        if self.remaining == 0 {
            return;
        }
        trace!(request = self.request, bytes = self.remaining, "discarding unread reply data");
        if let Err(err) = self.transport.discard(self.remaining) {
            warn!(request = self.request, %err, "failed to discard reply data");
        }
    }
}

/// Lazily queried, cached presence of one extension.
#[derive(Debug)]
pub(crate) struct ExtensionCell {
    name: &'static str,
    info: OnceCell<Option<ExtensionInfo>>,
}

impl ExtensionCell {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            info: OnceCell::new(),
        }
    }

    pub(crate) fn get(&self, display: &Display) -> Result<Option<ExtensionInfo>, Dri2Error> {
        self.info
            .get_or_try_init(|| display.query_extension(self.name))
            .copied()
    }

    pub(crate) fn opcode(&self, display: &Display) -> Result<u8, Dri2Error> {
        self.get(display)?
            .map(|info| info.major_opcode)
            .ok_or(Dri2Error::ExtensionMissing(self.name))
    }
}

//! In-memory X server speaking the subset of the core, DRI2 and XFixes
//! protocols used by this crate.
//!
//! Requests are answered as soon as they are written; replies, errors and
//! injected events queue up in one byte stream that the client reads back
//! through [`FakeTransport`]. Resource checks follow the real server closely
//! enough to produce the same asynchronous errors (`BadDrawable` for an
//! unknown drawable, `BadRegion` for an unknown region and so on).

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use byteorder::{ByteOrder, NativeEndian};

use crate::display::Transport;
use crate::dri2::{Attachment, Drawable, Version, DRI2_NAME, DRI2_VERSION};
use crate::wire::{self, card16, card32, KIND_ERROR, KIND_GENERIC_EVENT, KIND_REPLY, PACKET_SIZE};
use crate::xfixes::{Rectangle, Region, XFIXES_NAME};

pub const BAD_REQUEST: u8 = 1;
pub const BAD_VALUE: u8 = 2;
pub const BAD_MATCH: u8 = 8;
pub const BAD_DRAWABLE: u8 = 9;
pub const BAD_ID_CHOICE: u8 = 14;

const DEFAULT_DRI2_OPCODE: u8 = 155;
const DEFAULT_XFIXES_OPCODE: u8 = 138;
const XFIXES_FIRST_EVENT: u8 = 87;
const XFIXES_FIRST_ERROR: u8 = 140;
const XFIXES_SERVER_VERSION: Version = Version { major: 5, minor: 0 };
const EXPOSE: u8 = 12;
const RESOURCE_BASE: u32 = 0x0040_0000;

/// One `DRI2CopyRegion` the server accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub drawable: Drawable,
    pub region: Region,
    pub dest: u32,
    pub src: u32,
}

#[derive(Debug)]
struct ServerState {
    dri2: bool,
    xfixes: bool,
    dri2_version: Version,
    driver_name: String,
    device_name: String,
    accepted_magic: Option<u32>,
    width: u32,
    height: u32,
    buffer_count: Option<usize>,
    fail_copies: bool,

    sequence: u16,
    outgoing: VecDeque<u8>,
    next_id: u32,
    next_buffer_name: u32,
    requests: Vec<&'static str>,
    drawables: BTreeMap<u32, u32>,
    drawables_created: usize,
    drawables_destroyed: usize,
    regions: BTreeMap<u32, Vec<Rectangle>>,
    copies: Vec<CopyRecord>,
}

/// Builder for a [`FakeServer`] with non-default behavior.
#[derive(Debug)]
pub struct FakeServerBuilder {
    dri2: bool,
    xfixes: bool,
    dri2_version: Version,
    driver_name: String,
    device_name: String,
    accepted_magic: Option<u32>,
    width: u32,
    height: u32,
}

impl Default for FakeServerBuilder {
    fn default() -> Self {
        Self {
            dri2: true,
            xfixes: true,
            dri2_version: DRI2_VERSION,
            driver_name: "fake".to_string(),
            device_name: "/dev/dri/card0".to_string(),
            accepted_magic: None,
            width: 640,
            height: 480,
        }
    }
}

impl FakeServerBuilder {
    pub fn without_dri2(mut self) -> Self {
        self.dri2 = false;
        self
    }

    pub fn without_xfixes(mut self) -> Self {
        self.xfixes = false;
        self
    }

    pub fn dri2_version(mut self, version: Version) -> Self {
        self.dri2_version = version;
        self
    }

    /// Names returned by `DRI2Connect`. Empty strings are sent as zero lengths.
    pub fn driver(mut self, driver_name: &str, device_name: &str) -> Self {
        self.driver_name = driver_name.to_string();
        self.device_name = device_name.to_string();
        self
    }

    /// Only this token authenticates. Without it every token does.
    pub fn accept_magic(mut self, magic: u32) -> Self {
        self.accepted_magic = Some(magic);
        self
    }

    pub fn drawable_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn build(self) -> FakeServer {
        FakeServer {
            state: Arc::new(Mutex::new(ServerState {
                dri2: self.dri2,
                xfixes: self.xfixes,
                dri2_version: self.dri2_version,
                driver_name: self.driver_name,
                device_name: self.device_name,
                accepted_magic: self.accepted_magic,
                width: self.width,
                height: self.height,
                buffer_count: None,
                fail_copies: false,
                sequence: 0,
                outgoing: VecDeque::new(),
                next_id: 0,
                next_buffer_name: 1,
                requests: Vec::new(),
                drawables: BTreeMap::new(),
                drawables_created: 0,
                drawables_destroyed: 0,
                regions: BTreeMap::new(),
                copies: Vec::new(),
            })),
        }
    }
}

/// Handle on the fake server, used by tests to inspect and steer it.
///
/// Intended for one [`Display`](crate::Display) per server, since the server
/// keeps a single sequence counter.
#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> FakeServerBuilder {
        FakeServerBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The client end of the connection.
    pub fn transport(&self) -> FakeTransport {
        FakeTransport {
            state: Arc::clone(&self.state),
        }
    }

    pub fn dri2_opcode(&self) -> u8 {
        DEFAULT_DRI2_OPCODE
    }

    pub fn xfixes_opcode(&self) -> u8 {
        DEFAULT_XFIXES_OPCODE
    }

    /// Error code of `BadRegion` on this server.
    pub fn bad_region(&self) -> u8 {
        XFIXES_FIRST_ERROR
    }

    pub fn dri2_version(&self) -> Version {
        self.state().dri2_version
    }

    /// Bytes queued for the client and not read yet.
    pub fn unread_bytes(&self) -> usize {
        self.state().outgoing.len()
    }

    /// Names of all requests received so far, in order.
    pub fn requests(&self) -> Vec<&'static str> {
        self.state().requests.clone()
    }

    pub fn request_count(&self, name: &str) -> usize {
        self.state().requests.iter().filter(|r| **r == name).count()
    }

    /// Queues an error carrying the sequence number of the last request,
    /// as if that request had failed asynchronously.
    pub fn inject_stale_error(&self, code: u8) {
        let mut state = self.state();
        let sequence = state.sequence;
        state.push_error(code, sequence, 0, 0, 0);
    }

    /// Queues an `Expose` event and a generic event with 8 bytes of payload.
    pub fn inject_event(&self) {
        let mut state = self.state();
        let sequence = state.sequence;
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = EXPOSE;
        NativeEndian::write_u16(&mut packet[2..4], sequence);
        state.outgoing.extend(packet);

        let mut generic = [0u8; PACKET_SIZE];
        generic[0] = KIND_GENERIC_EVENT;
        NativeEndian::write_u16(&mut generic[2..4], sequence);
        NativeEndian::write_u32(&mut generic[4..8], 2);
        state.outgoing.extend(generic);
        state.outgoing.extend([0u8; 8]);
    }

    /// Queues raw bytes for the client.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.state().outgoing.extend(bytes.iter().copied());
    }

    /// Drawables with a live server-side DRI2 drawable.
    pub fn live_drawables(&self) -> Vec<Drawable> {
        self.state().drawables.keys().copied().map(Drawable).collect()
    }

    pub fn drawables_created(&self) -> usize {
        self.state().drawables_created
    }

    pub fn drawables_destroyed(&self) -> usize {
        self.state().drawables_destroyed
    }

    pub fn live_regions(&self) -> Vec<Region> {
        self.state().regions.keys().copied().map(Region).collect()
    }

    pub fn region_rects(&self, region: Region) -> Option<Vec<Rectangle>> {
        self.state().regions.get(&region.0).cloned()
    }

    pub fn set_drawable_size(&self, width: u32, height: u32) {
        let mut state = self.state();
        state.width = width;
        state.height = height;
    }

    /// Overrides how many buffers `GetBuffers` returns.
    pub fn set_buffer_count(&self, count: Option<usize>) {
        self.state().buffer_count = count;
    }

    /// Makes every `DRI2CopyRegion` fail with `BadMatch`.
    pub fn fail_copies(&self, fail: bool) {
        self.state().fail_copies = fail;
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state().copies.clone()
    }
}

/// Client end of a [`FakeServer`].
#[derive(Debug)]
pub struct FakeTransport {
    state: Arc<Mutex<ServerState>>,
}

impl FakeTransport {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for FakeTransport {
    fn write_request(&mut self, packet: &[u8]) -> io::Result<()> {
        if packet.len() < 4 || packet.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("request of {} bytes is not a whole number of units", packet.len()),
            ));
        }
        if usize::from(card16(packet, 2)) * 4 != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "request length field does not match the packet",
            ));
        }
        self.state().handle(packet);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.outgoing.len() < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "wanted {} bytes, server has {} queued",
                    buf.len(),
                    state.outgoing.len()
                ),
            ));
        }
        let n = buf.len();
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn generate_id(&mut self) -> io::Result<u32> {
        let mut state = self.state();
        state.next_id += 1;
        Ok(RESOURCE_BASE | state.next_id)
    }
}

impl ServerState {
    fn handle(&mut self, packet: &[u8]) {
        self.sequence = self.sequence.wrapping_add(1);
        let major = packet[0];
        let minor = packet[1];

        if major == 98 {
            self.requests.push("QueryExtension");
            self.query_extension(packet);
        } else if self.dri2 && major == DEFAULT_DRI2_OPCODE {
            self.dri2(minor, packet);
        } else if self.xfixes && major == DEFAULT_XFIXES_OPCODE {
            self.xfixes(minor, packet);
        } else {
            self.requests.push("Unknown");
            self.error(BAD_REQUEST, 0, major, minor);
        }
    }

    fn query_extension(&mut self, packet: &[u8]) {
        let len = usize::from(card16(packet, 4));
        let name = packet.get(8..8 + len).unwrap_or_default();
        let (present, major, first_event, first_error) = match name {
            n if n == DRI2_NAME.as_bytes() && self.dri2 => (1, DEFAULT_DRI2_OPCODE, 0, 0),
            n if n == XFIXES_NAME.as_bytes() && self.xfixes => {
                (1, DEFAULT_XFIXES_OPCODE, XFIXES_FIRST_EVENT, XFIXES_FIRST_ERROR)
            }
            _ => (0, 0, 0, 0),
        };
        let mut header = self.reply_header(0);
        header[8] = present;
        header[9] = major;
        header[10] = first_event;
        header[11] = first_error;
        self.outgoing.extend(header);
    }

    fn dri2(&mut self, minor: u8, packet: &[u8]) {
        match minor {
            0 => {
                self.requests.push("DRI2QueryVersion");
                let mut header = self.reply_header(0);
                NativeEndian::write_u32(&mut header[8..12], self.dri2_version.major);
                NativeEndian::write_u32(&mut header[12..16], self.dri2_version.minor);
                self.outgoing.extend(header);
            }
            1 => {
                self.requests.push("DRI2Connect");
                let driver = self.driver_name.clone().into_bytes();
                let device = self.device_name.clone().into_bytes();
                let extra = wire::align4(driver.len()) + wire::align4(device.len());
                let mut header = self.reply_header(extra);
                NativeEndian::write_u32(&mut header[8..12], driver.len() as u32);
                NativeEndian::write_u32(&mut header[12..16], device.len() as u32);
                self.outgoing.extend(header);
                self.push_padded(&driver);
                self.push_padded(&device);
            }
            2 => {
                self.requests.push("DRI2Authenticate");
                let magic = card32(packet, 8);
                let ok = self.accepted_magic.map_or(true, |m| m == magic);
                let mut header = self.reply_header(0);
                NativeEndian::write_u32(&mut header[8..12], u32::from(ok));
                self.outgoing.extend(header);
            }
            3 => {
                self.requests.push("DRI2CreateDrawable");
                let drawable = card32(packet, 4);
                *self.drawables.entry(drawable).or_insert(0) += 1;
                self.drawables_created += 1;
            }
            4 => {
                self.requests.push("DRI2DestroyDrawable");
                let drawable = card32(packet, 4);
                match self.drawables.get_mut(&drawable) {
                    Some(refs) => {
                        *refs -= 1;
                        if *refs == 0 {
                            self.drawables.remove(&drawable);
                        }
                        self.drawables_destroyed += 1;
                    }
                    None => self.error(BAD_DRAWABLE, drawable, DEFAULT_DRI2_OPCODE, minor),
                }
            }
            5 | 7 => {
                let with_format = minor == 7;
                self.requests.push(if with_format {
                    "DRI2GetBuffersWithFormat"
                } else {
                    "DRI2GetBuffers"
                });
                self.get_buffers(minor, packet, with_format);
            }
            6 => {
                self.requests.push("DRI2CopyRegion");
                self.copy_region(packet);
            }
            _ => {
                self.requests.push("Unknown");
                self.error(BAD_REQUEST, 0, DEFAULT_DRI2_OPCODE, minor);
            }
        }
    }

    fn get_buffers(&mut self, minor: u8, packet: &[u8], with_format: bool) {
        let drawable = card32(packet, 4);
        if !self.drawables.contains_key(&drawable) {
            self.error(BAD_DRAWABLE, drawable, DEFAULT_DRI2_OPCODE, minor);
            return;
        }
        let requested = card32(packet, 8) as usize;
        let stride = if with_format { 8 } else { 4 };
        let attachments: Vec<u32> = (0..requested)
            .filter_map(|i| {
                let offset = 12 + i * stride;
                (offset + 4 <= packet.len()).then(|| card32(packet, offset))
            })
            .collect();
        let count = self.buffer_count.unwrap_or(attachments.len());

        let mut header = self.reply_header(count * 20);
        NativeEndian::write_u32(&mut header[8..12], self.width);
        NativeEndian::write_u32(&mut header[12..16], self.height);
        NativeEndian::write_u32(&mut header[16..20], count as u32);
        self.outgoing.extend(header);

        for i in 0..count {
            let attachment = attachments
                .get(i)
                .copied()
                .unwrap_or(Attachment::BackLeft.raw());
            let name = self.next_buffer_name;
            self.next_buffer_name += 1;
            let mut buffer = [0u8; 20];
            NativeEndian::write_u32(&mut buffer[0..4], attachment);
            NativeEndian::write_u32(&mut buffer[4..8], name);
            NativeEndian::write_u32(&mut buffer[8..12], self.width * 4);
            NativeEndian::write_u32(&mut buffer[12..16], 4);
            self.outgoing.extend(buffer);
        }
    }

    fn copy_region(&mut self, packet: &[u8]) {
        let drawable = card32(packet, 4);
        let region = card32(packet, 8);
        if !self.drawables.contains_key(&drawable) {
            self.error(BAD_DRAWABLE, drawable, DEFAULT_DRI2_OPCODE, 6);
            return;
        }
        if region != 0 && !self.regions.contains_key(&region) {
            self.error(XFIXES_FIRST_ERROR, region, DEFAULT_DRI2_OPCODE, 6);
            return;
        }
        if self.fail_copies {
            self.error(BAD_MATCH, drawable, DEFAULT_DRI2_OPCODE, 6);
            return;
        }
        self.copies.push(CopyRecord {
            drawable: Drawable(drawable),
            region: Region(region),
            dest: card32(packet, 12),
            src: card32(packet, 16),
        });
        let header = self.reply_header(0);
        self.outgoing.extend(header);
    }

    fn xfixes(&mut self, minor: u8, packet: &[u8]) {
        match minor {
            0 => {
                self.requests.push("XFixesQueryVersion");
                let requested = Version::new(card32(packet, 4), card32(packet, 8));
                let version = requested.min(XFIXES_SERVER_VERSION);
                let mut header = self.reply_header(0);
                NativeEndian::write_u32(&mut header[8..12], version.major);
                NativeEndian::write_u32(&mut header[12..16], version.minor);
                self.outgoing.extend(header);
            }
            5 => {
                self.requests.push("XFixesCreateRegion");
                let region = card32(packet, 4);
                if region == 0 || self.regions.contains_key(&region) {
                    self.error(BAD_ID_CHOICE, region, DEFAULT_XFIXES_OPCODE, minor);
                    return;
                }
                let rects = packet[8..]
                    .chunks_exact(8)
                    .map(|r| Rectangle {
                        x: NativeEndian::read_i16(&r[0..2]),
                        y: NativeEndian::read_i16(&r[2..4]),
                        width: NativeEndian::read_u16(&r[4..6]),
                        height: NativeEndian::read_u16(&r[6..8]),
                    })
                    .collect();
                self.regions.insert(region, rects);
            }
            10 => {
                self.requests.push("XFixesDestroyRegion");
                let region = card32(packet, 4);
                if self.regions.remove(&region).is_none() {
                    self.error(XFIXES_FIRST_ERROR, region, DEFAULT_XFIXES_OPCODE, minor);
                }
            }
            _ => {
                self.requests.push("Unknown");
                self.error(BAD_REQUEST, 0, DEFAULT_XFIXES_OPCODE, minor);
            }
        }
    }

    fn reply_header(&self, extra: usize) -> [u8; PACKET_SIZE] {
        let mut header = [0u8; PACKET_SIZE];
        header[0] = KIND_REPLY;
        NativeEndian::write_u16(&mut header[2..4], self.sequence);
        NativeEndian::write_u32(&mut header[4..8], (extra / 4) as u32);
        header
    }

    fn push_padded(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes.iter().copied());
        self.outgoing
            .extend(std::iter::repeat(0).take(wire::pad4(bytes.len())));
    }

    fn error(&mut self, code: u8, resource: u32, major: u8, minor: u8) {
        let sequence = self.sequence;
        self.push_error(code, sequence, resource, major, u16::from(minor));
    }

    fn push_error(&mut self, code: u8, sequence: u16, resource: u32, major: u8, minor: u16) {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = KIND_ERROR;
        packet[1] = code;
        NativeEndian::write_u16(&mut packet[2..4], sequence);
        NativeEndian::write_u32(&mut packet[4..8], resource);
        NativeEndian::write_u16(&mut packet[8..10], minor);
        packet[10] = major;
        self.outgoing.extend(packet);
    }
}

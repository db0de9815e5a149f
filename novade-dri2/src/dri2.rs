//! DRI2 requests.
//!
//! Every reply-bearing call reads its reply through a
//! [`ReplyReader`](crate::display::ReplyReader), so the connection stays in
//! sync whether the call succeeds, is rejected or gets a reply it cannot use.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::display::{Display, ExtensionCell};
use crate::error::Dri2Error;
use crate::wire::Request;
use crate::xfixes::Region;

/// Extension name as registered with the X server.
pub const DRI2_NAME: &str = "DRI2";

/// Protocol version this client is written against.
pub const DRI2_VERSION: Version = Version { major: 1, minor: 4 };

const X_DRI2_QUERY_VERSION: u8 = 0;
const X_DRI2_CONNECT: u8 = 1;
const X_DRI2_AUTHENTICATE: u8 = 2;
const X_DRI2_CREATE_DRAWABLE: u8 = 3;
const X_DRI2_DESTROY_DRAWABLE: u8 = 4;
const X_DRI2_GET_BUFFERS: u8 = 5;
const X_DRI2_COPY_REGION: u8 = 6;
const X_DRI2_GET_BUFFERS_WITH_FORMAT: u8 = 7;

/// Size of one `xDRI2Buffer` in a `GetBuffers` reply.
pub const BUFFER_WIRE_SIZE: usize = 20;

/// An X drawable (window or pixmap) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Drawable(pub u32);

/// A major/minor protocol version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// Buffer roles within a DRI2 drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Attachment {
    FrontLeft = 0,
    BackLeft = 1,
    FrontRight = 2,
    BackRight = 3,
    Depth = 4,
    Stencil = 5,
    Accum = 6,
    FakeFrontLeft = 7,
    FakeFrontRight = 8,
    DepthStencil = 9,
    Hiz = 10,
}

impl Attachment {
    pub const fn raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::FrontLeft,
            1 => Self::BackLeft,
            2 => Self::FrontRight,
            3 => Self::BackRight,
            4 => Self::Depth,
            5 => Self::Stencil,
            6 => Self::Accum,
            7 => Self::FakeFrontLeft,
            8 => Self::FakeFrontRight,
            9 => Self::DepthStencil,
            10 => Self::Hiz,
            _ => return None,
        })
    }
}

/// Kind of driver requested from `DRI2Connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DriverType {
    Dri = 0,
    Vdpau = 1,
}

/// Driver and device node names returned by `DRI2Connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub driver_name: String,
    pub device_name: String,
}

/// One buffer as described by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    /// Raw attachment value; see [`Buffer::attachment_kind`].
    pub attachment: u32,
    /// Global (flink) name of the buffer object.
    pub name: u32,
    /// Bytes per row.
    pub pitch: u32,
    pub bytes_per_pixel: u32,
    pub flags: u32,
}

impl Buffer {
    pub fn attachment_kind(&self) -> Option<Attachment> {
        Attachment::from_raw(self.attachment)
    }

    fn from_wire(bytes: &[u8]) -> Self {
        use crate::wire::card32;
        Self {
            attachment: card32(bytes, 0),
            name: card32(bytes, 4),
            pitch: card32(bytes, 8),
            bytes_per_pixel: card32(bytes, 12),
            flags: card32(bytes, 16),
        }
    }
}

/// Result of `GetBuffers`: the drawable size and zero or more buffers.
///
/// An empty `buffers` list is a valid answer meaning no buffer is available
/// right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferSet {
    pub width: u32,
    pub height: u32,
    pub buffers: Vec<Buffer>,
}

/// Client for the DRI2 extension on a shared [`Display`].
#[derive(Debug)]
pub struct Dri2Client {
    display: Arc<Display>,
    extension: ExtensionCell,
}

impl Dri2Client {
    pub fn new(display: Arc<Display>) -> Self {
        Self {
            display,
            extension: ExtensionCell::new(DRI2_NAME),
        }
    }

    pub fn display(&self) -> &Arc<Display> {
        &self.display
    }

    /// Returns `true` if the server advertises DRI2.
    ///
    /// A failed query is logged and reported as absence.
    pub fn query_extension(&self) -> bool {
        match self.extension.get(&self.display) {
            Ok(info) => info.is_some(),
            Err(err) => {
                warn!(%err, "DRI2 extension query failed");
                false
            }
        }
    }

    /// Sends the client's version and returns the version the server speaks.
    pub fn query_version(&self, requested: Version) -> Result<Version, Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let request = Request::new("DRI2QueryVersion", major, X_DRI2_QUERY_VERSION)
            .card32(requested.major)
            .card32(requested.minor);

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        let reply = conn.reply("DRI2QueryVersion", sequence)?;
        let version = Version::new(reply.card32(8), reply.card32(12));
        debug!(?requested, ?version, "negotiated DRI2 version");
        Ok(version)
    }

    /// Asks the server which driver and device node serve `window`.
    ///
    /// Fails with [`Dri2Error::NoDriver`] if either name comes back empty.
    pub fn connect(&self, window: u32, driver_type: DriverType) -> Result<ConnectInfo, Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let request = Request::new("DRI2Connect", major, X_DRI2_CONNECT)
            .card32(window)
            .card32(driver_type as u32);

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        let mut reply = conn.reply("DRI2Connect", sequence)?;

        let driver_len = reply.card32(8);
        let device_len = reply.card32(12);
        if driver_len == 0 || device_len == 0 {
            return Err(Dri2Error::NoDriver {
                window,
                driver_len,
                device_len,
            });
        }

        let driver = reply.read_padded(driver_len as usize)?;
        let device = reply.read_padded(device_len as usize)?;
        let info = ConnectInfo {
            driver_name: String::from_utf8_lossy(&driver).into_owned(),
            device_name: String::from_utf8_lossy(&device).into_owned(),
        };
        debug!(window, driver = %info.driver_name, device = %info.device_name, "DRI2 connected");
        Ok(info)
    }

    /// Hands the DRM magic token of an opened device node to the server.
    pub fn authenticate(&self, window: u32, magic: u32) -> Result<(), Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let request = Request::new("DRI2Authenticate", major, X_DRI2_AUTHENTICATE)
            .card32(window)
            .card32(magic);

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        let reply = conn.reply("DRI2Authenticate", sequence)?;
        if reply.card32(8) == 0 {
            return Err(Dri2Error::NotAuthenticated { window });
        }
        Ok(())
    }

    /// Creates the server-side DRI2 drawable for `drawable`.
    ///
    /// There is no reply; failures surface, if at all, as asynchronous errors
    /// which the connection drops.
    pub fn create_drawable(&self, drawable: Drawable) {
        self.void_request("DRI2CreateDrawable", X_DRI2_CREATE_DRAWABLE, drawable);
    }

    /// Releases the server-side DRI2 drawable. Same error rules as
    /// [`Dri2Client::create_drawable`].
    pub fn destroy_drawable(&self, drawable: Drawable) {
        self.void_request("DRI2DestroyDrawable", X_DRI2_DESTROY_DRAWABLE, drawable);
    }

    /// Fetches the buffers backing `attachments` of `drawable`.
    pub fn get_buffers(
        &self,
        drawable: Drawable,
        attachments: &[Attachment],
    ) -> Result<BufferSet, Dri2Error> {
        let words: Vec<u32> = attachments.iter().map(|a| a.raw()).collect();
        self.get_buffers_impl(
            "DRI2GetBuffers",
            X_DRI2_GET_BUFFERS,
            drawable,
            attachments.len(),
            &words,
        )
    }

    /// Like [`Dri2Client::get_buffers`] with an explicit format per attachment.
    pub fn get_buffers_with_format(
        &self,
        drawable: Drawable,
        attachments: &[(Attachment, u32)],
    ) -> Result<BufferSet, Dri2Error> {
        let words: Vec<u32> = attachments
            .iter()
            .flat_map(|(attachment, format)| [attachment.raw(), *format])
            .collect();
        self.get_buffers_impl(
            "DRI2GetBuffersWithFormat",
            X_DRI2_GET_BUFFERS_WITH_FORMAT,
            drawable,
            attachments.len(),
            &words,
        )
    }

    fn get_buffers_impl(
        &self,
        name: &'static str,
        minor: u8,
        drawable: Drawable,
        count: usize,
        words: &[u32],
    ) -> Result<BufferSet, Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let count = u32::try_from(count).map_err(|_| Dri2Error::RequestTooLarge(count))?;
        let request = words
            .iter()
            .fold(
                Request::new(name, major, minor).card32(drawable.0).card32(count),
                |request, word| request.card32(*word),
            );

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        let mut reply = conn.reply(name, sequence)?;

        let width = reply.card32(8);
        let height = reply.card32(12);
        let returned = reply.card32(16) as usize;
        if returned * BUFFER_WIRE_SIZE > reply.remaining() {
            return Err(reply.malformed(format!(
                "{returned} buffers announced but only {} bytes follow",
                reply.remaining()
            )));
        }

        let mut buffers = Vec::with_capacity(returned);
        for _ in 0..returned {
            let bytes = reply.read(BUFFER_WIRE_SIZE)?;
            buffers.push(Buffer::from_wire(&bytes));
        }
        trace!(drawable = drawable.0, width, height, count = buffers.len(), "{name}");
        Ok(BufferSet {
            width,
            height,
            buffers,
        })
    }

    /// Copies `src` into `dest` of `drawable`, limited to `region`.
    pub fn copy_region(
        &self,
        drawable: Drawable,
        region: Region,
        dest: Attachment,
        src: Attachment,
    ) -> Result<(), Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let request = Request::new("DRI2CopyRegion", major, X_DRI2_COPY_REGION)
            .card32(drawable.0)
            .card32(region.0)
            .card32(dest.raw())
            .card32(src.raw());

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        conn.reply("DRI2CopyRegion", sequence)?;
        Ok(())
    }

    fn void_request(&self, name: &'static str, minor: u8, drawable: Drawable) {
        let result = self
            .extension
            .opcode(&self.display)
            .and_then(|major| {
                self.display
                    .send_void(Request::new(name, major, minor).card32(drawable.0))
            });
        if let Err(err) = result {
            debug!(request = name, drawable = drawable.0, %err, "request not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use pretty_assertions::assert_eq;

    fn client(server: &FakeServer) -> Dri2Client {
        Dri2Client::new(Arc::new(Display::new(server.transport())))
    }

    #[test]
    fn query_extension_and_version() {
        let server = FakeServer::new();
        let dri2 = client(&server);
        assert!(dri2.query_extension());
        let version = dri2.query_version(DRI2_VERSION).unwrap();
        assert_eq!(version, server.dri2_version());
    }

    #[test]
    fn query_extension_is_false_without_dri2() {
        let server = FakeServer::builder().without_dri2().build();
        let dri2 = client(&server);
        assert!(!dri2.query_extension());
        assert!(matches!(
            dri2.query_version(DRI2_VERSION),
            Err(Dri2Error::ExtensionMissing(DRI2_NAME))
        ));
    }

    #[test]
    fn connect_returns_driver_and_device() {
        let server = FakeServer::builder()
            .driver("i965", "/dev/dri/card0")
            .build();
        let dri2 = client(&server);
        let info = dri2.connect(0x100, DriverType::Dri).unwrap();
        assert_eq!(info.driver_name, "i965");
        assert_eq!(info.device_name, "/dev/dri/card0");
        assert_eq!(server.unread_bytes(), 0);
    }

    #[test]
    fn connect_without_driver_name_keeps_connection_usable() {
        let server = FakeServer::builder().driver("", "/dev/dri/card0").build();
        let dri2 = client(&server);
        assert!(dri2.query_extension());

        let err = dri2.connect(0x100, DriverType::Dri).unwrap_err();
        assert!(matches!(
            err,
            Dri2Error::NoDriver {
                driver_len: 0,
                device_len: 14,
                ..
            }
        ));
        assert_eq!(server.unread_bytes(), 0);

        // The next exchange must start on a packet boundary.
        assert_eq!(dri2.query_version(DRI2_VERSION).unwrap(), server.dri2_version());
    }

    #[test]
    fn authenticate_checks_the_token() {
        let server = FakeServer::builder().accept_magic(0xfeed).build();
        let dri2 = client(&server);
        dri2.authenticate(0x100, 0xfeed).unwrap();
        assert!(matches!(
            dri2.authenticate(0x100, 0xbad),
            Err(Dri2Error::NotAuthenticated { window: 0x100 })
        ));
    }

    #[test]
    fn get_buffers_for_a_live_drawable() {
        let server = FakeServer::builder().drawable_size(800, 600).build();
        let dri2 = client(&server);
        let drawable = Drawable(0x0040_0001);
        dri2.create_drawable(drawable);

        let set = dri2.get_buffers(drawable, &[Attachment::BackLeft]).unwrap();
        assert_eq!(set.width, 800);
        assert_eq!(set.height, 600);
        assert_eq!(set.buffers.len(), 1);
        assert_eq!(set.buffers[0].attachment_kind(), Some(Attachment::BackLeft));
        assert_eq!(set.buffers[0].pitch, 800 * 4);
        assert_eq!(server.unread_bytes(), 0);
    }

    #[test]
    fn empty_buffer_list_is_not_an_error() {
        let server = FakeServer::new();
        server.set_buffer_count(Some(0));
        let dri2 = client(&server);
        let drawable = Drawable(0x0040_0001);
        dri2.create_drawable(drawable);

        let set = dri2.get_buffers(drawable, &[Attachment::BackLeft]).unwrap();
        assert!(set.buffers.is_empty());
    }

    #[test]
    fn get_buffers_with_format_sends_pairs() {
        let server = FakeServer::new();
        let dri2 = client(&server);
        let drawable = Drawable(0x0040_0001);
        dri2.create_drawable(drawable);

        let set = dri2
            .get_buffers_with_format(
                drawable,
                &[(Attachment::BackLeft, 32), (Attachment::Depth, 24)],
            )
            .unwrap();
        let kinds: Vec<_> = set.buffers.iter().map(Buffer::attachment_kind).collect();
        assert_eq!(kinds, vec![Some(Attachment::BackLeft), Some(Attachment::Depth)]);
    }

    #[test]
    fn get_buffers_on_unknown_drawable_fails_cleanly() {
        let server = FakeServer::new();
        let dri2 = client(&server);
        let err = dri2
            .get_buffers(Drawable(0xdead), &[Attachment::BackLeft])
            .unwrap_err();
        assert!(matches!(err, Dri2Error::Server { .. }));
        assert!(dri2.query_version(DRI2_VERSION).is_ok());
    }

    #[test]
    fn destroying_an_unknown_drawable_does_not_poison_later_replies() {
        let server = FakeServer::new();
        let dri2 = client(&server);
        assert!(dri2.query_extension());

        // The server answers this with an asynchronous BadDrawable.
        dri2.destroy_drawable(Drawable(0xdead));
        assert_eq!(dri2.query_version(DRI2_VERSION).unwrap(), server.dri2_version());
        assert_eq!(server.unread_bytes(), 0);
    }

    #[test]
    fn copy_region_reports_server_failures() {
        let server = FakeServer::new();
        let dri2 = client(&server);
        let drawable = Drawable(0x0040_0001);
        dri2.create_drawable(drawable);

        dri2.copy_region(drawable, Region::NONE, Attachment::FrontLeft, Attachment::BackLeft)
            .unwrap();
        assert_eq!(server.copies().len(), 1);

        server.fail_copies(true);
        assert!(dri2
            .copy_region(drawable, Region::NONE, Attachment::FrontLeft, Attachment::BackLeft)
            .is_err());
        assert_eq!(server.copies().len(), 1);
    }
}

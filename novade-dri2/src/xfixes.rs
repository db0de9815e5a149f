//! XFixes region requests, used for the clip region of a copy.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::display::{Display, ExtensionCell};
use crate::dri2::Version;
use crate::error::Dri2Error;
use crate::wire::Request;

pub const XFIXES_NAME: &str = "XFIXES";

/// Protocol version requested by default.
pub const XFIXES_VERSION: Version = Version { major: 2, minor: 0 };

const X_XFIXES_QUERY_VERSION: u8 = 0;
const X_XFIXES_CREATE_REGION: u8 = 5;
const X_XFIXES_DESTROY_REGION: u8 = 10;

/// A server-side region id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(pub u32);

impl Region {
    /// The `None` resource id.
    pub const NONE: Region = Region(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// An X rectangle: signed origin, unsigned extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rectangle {
    pub const fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug)]
pub struct XFixesClient {
    display: Arc<Display>,
    extension: ExtensionCell,
}

impl XFixesClient {
    pub fn new(display: Arc<Display>) -> Self {
        Self {
            display,
            extension: ExtensionCell::new(XFIXES_NAME),
        }
    }

    pub fn display(&self) -> &Arc<Display> {
        &self.display
    }

    pub fn query_extension(&self) -> bool {
        match self.extension.get(&self.display) {
            Ok(info) => info.is_some(),
            Err(err) => {
                warn!(%err, "XFixes extension query failed");
                false
            }
        }
    }

    /// Announces the client version. XFixes requests other than this one are
    /// rejected by the server until it has been sent.
    pub fn query_version(&self, requested: Version) -> Result<Version, Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let request = Request::new("XFixesQueryVersion", major, X_XFIXES_QUERY_VERSION)
            .card32(requested.major)
            .card32(requested.minor);

        let mut conn = self.display.lock()?;
        let sequence = conn.send(request)?;
        let reply = conn.reply("XFixesQueryVersion", sequence)?;
        let version = Version::new(reply.card32(8), reply.card32(12));
        debug!(?requested, ?version, "negotiated XFixes version");
        Ok(version)
    }

    /// Creates a region covering the union of `rects`.
    ///
    /// The id is allocated and the request written under one connection lock.
    pub fn create_region(&self, rects: &[Rectangle]) -> Result<Region, Dri2Error> {
        let major = self.extension.opcode(&self.display)?;
        let mut conn = self.display.lock()?;
        let region = Region(conn.generate_id()?);

        let request = rects.iter().fold(
            Request::new("XFixesCreateRegion", major, X_XFIXES_CREATE_REGION).card32(region.0),
            |request, rect| {
                request
                    .int16(rect.x)
                    .int16(rect.y)
                    .card16(rect.width)
                    .card16(rect.height)
            },
        );
        conn.send(request)?;
        trace!(region = region.0, rects = rects.len(), "created region");
        Ok(region)
    }

    /// Destroys `region`. Errors are dropped like any other asynchronous error.
    pub fn destroy_region(&self, region: Region) {
        if region.is_none() {
            return;
        }
        let result = self.extension.opcode(&self.display).and_then(|major| {
            self.display.send_void(
                Request::new("XFixesDestroyRegion", major, X_XFIXES_DESTROY_REGION)
                    .card32(region.0),
            )
        });
        match result {
            Ok(()) => trace!(region = region.0, "destroyed region"),
            Err(err) => debug!(region = region.0, %err, "region not destroyed"),
        }
    }
}

//! Client side of the X11 DRI2 extension and the XFixes region requests.
//!
//! The crate does not open X connections. The windowing layer hands over an
//! established connection as a [`Transport`]; [`Display`] serializes the
//! request/reply exchanges on it, and [`Dri2Client`] and [`XFixesClient`]
//! encode and decode the individual requests.
//!
//! ```ignore
//! let display = Arc::new(Display::new(transport));
//! let dri2 = Dri2Client::new(Arc::clone(&display));
//! let info = dri2.connect(root, DriverType::Dri)?;
//! ```

pub mod display;
pub mod dri2;
pub mod error;
pub mod wire;
pub mod xfixes;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use display::{ConnectionGuard, Display, ExtensionInfo, ReplyReader, Transport};
pub use dri2::{
    Attachment, Buffer, BufferSet, ConnectInfo, Drawable, DriverType, Dri2Client, Version,
    DRI2_NAME, DRI2_VERSION,
};
pub use error::Dri2Error;
pub use xfixes::{Rectangle, Region, XFixesClient, XFIXES_NAME, XFIXES_VERSION};

//! DRI2 presentation backend for native Direct3D 9 adapters.
//!
//! A [`Driver`] is probed once per process through a [`DriverLoader`]. It
//! hands out [`PresentGroup`]s, one [`Present`] backend per display head, and
//! authenticated DRM devices for the adapter factory. Backends share the X
//! connection and a [`DrawableCache`] through a [`PresentContext`].
//!
//! Window system calls (device contexts, cursors, gamma, display settings)
//! go through the [`WindowSystem`] trait so the backend can sit under any
//! window manager integration.

pub mod config;
pub mod context;
pub mod device;
pub mod drawable;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod group;
pub mod logging;
pub mod params;
pub mod present;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod window;

pub use config::{ConfigLoader, LoggingConfig, PresentConfig};
pub use context::PresentContext;
pub use device::DrmDevice;
pub use drawable::{DrawableCache, DrawableGuard, DrawableRecord, DrawableRef};
pub use driver::{AdapterFactory, Driver, DriverLoader, ADAPTER_MAJOR_VERSION, DRIVER_VERSION};
pub use error::{result_code, ConfigError, PresentError, ResultCode};
pub use geometry::{Point, Rect};
pub use group::{Dri2PresentGroup, PresentGroup};
pub use params::{
    DisplayMode, DisplayRotation, Format, PresentFlags, PresentStats, PresentationParameters,
    RasterStatus, ScanlineOrdering, SwapEffect, MAX_BACK_BUFFERS,
};
pub use present::{BackBuffer, Dri2Present, Present, CURSOR_SIZE};
pub use window::{
    BitmapHandle, CursorHandle, DeviceContext, DisplaySettings, DrawableGeometry, GammaRamp,
    WindowHandle, WindowSystem,
};

//! The window-system services the backend relies on.
//!
//! Window handles, device contexts and the queries on them belong to the
//! windowing layer. It implements [`WindowSystem`]; everything in here is
//! read-only or releases what it handed out, and any query may fail.

use novade_dri2::Drawable;

use crate::geometry::{Point, Rect};

/// Opaque handle of a top-level or child window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowHandle(pub u64);

/// A device context obtained for a window; must be released with
/// [`WindowSystem::release_dc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceContext(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub u64);

/// The X drawable behind a device context and the rectangle the context
/// covers inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableGeometry {
    pub drawable: Drawable,
    pub rect: Rect,
}

/// Current settings of a display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub bits_per_pixel: u32,
    /// 0, 1, 2, 3 for 0, 90, 180 and 270 degrees.
    pub orientation: u32,
    pub interlaced: bool,
}

/// 256-entry gamma ramp per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: [u16; 256],
    pub green: [u16; 256],
    pub blue: [u16; 256],
}

impl GammaRamp {
    /// The identity ramp.
    pub fn linear() -> Self {
        let mut channel = [0u16; 256];
        for (i, value) in channel.iter_mut().enumerate() {
            *value = (i as u16) << 8 | i as u16;
        }
        Self {
            red: channel,
            green: channel,
            blue: channel,
        }
    }
}

/// Queries and primitives of the windowing layer.
///
/// Implementations must be callable from any thread.
pub trait WindowSystem: Send + Sync {
    /// Client area of `window`, origin at (0, 0).
    fn client_rect(&self, window: WindowHandle) -> Option<Rect>;

    /// Obtains a device context clipped to `window` and its siblings.
    fn acquire_dc(&self, window: WindowHandle) -> Option<DeviceContext>;

    fn release_dc(&self, window: WindowHandle, dc: DeviceContext);

    fn drawable_geometry(&self, dc: DeviceContext) -> Option<DrawableGeometry>;

    /// Root window of the screen `drawable` lives on.
    fn root_window(&self, drawable: Drawable) -> Option<Drawable>;

    /// Name of sub-device `index` of the display adapter called `device_name`.
    fn display_device_name(&self, device_name: &str, index: u32) -> Option<String>;

    fn display_settings(&self, device_name: &str) -> Option<DisplaySettings>;

    /// Cursor position in screen coordinates.
    fn cursor_pos(&self) -> Option<Point>;

    fn set_cursor_pos(&self, pos: Point) -> bool;

    fn screen_to_client(&self, window: WindowHandle, pos: Point) -> Option<Point>;

    /// Creates a bitmap from packed rows of `bits_per_pixel`-sized pixels.
    fn create_bitmap(
        &self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        bits: &[u8],
    ) -> Option<BitmapHandle>;

    fn delete_bitmap(&self, bitmap: BitmapHandle);

    fn create_cursor(
        &self,
        hotspot: Point,
        mask: BitmapHandle,
        color: BitmapHandle,
    ) -> Option<CursorHandle>;

    fn destroy_cursor(&self, cursor: CursorHandle);

    /// Shows `cursor`, or hides the cursor for `None`.
    fn show_cursor(&self, cursor: Option<CursorHandle>);

    fn set_gamma_ramp(&self, dc: DeviceContext, ramp: &GammaRamp) -> bool;
}

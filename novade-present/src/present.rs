//! Per-window presentation backend.
//!
//! A [`Dri2Present`] hands the adapter the DRI2 back buffer of the window it
//! presents to ([`Present::get_buffer`]) and later copies that buffer to the
//! front through the cached clip region ([`Present::present`]). The other
//! methods are thin wrappers over the window system.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use novade_dri2::{Attachment, Drawable, Region};
use tracing::{debug, error, trace, warn};

use crate::context::PresentContext;
use crate::error::PresentError;
use crate::geometry::{Point, Rect};
use crate::params::{
    DisplayMode, DisplayRotation, Format, PresentFlags, PresentStats, PresentationParameters,
    RasterStatus, ScanlineOrdering,
};
use crate::window::{CursorHandle, GammaRamp, WindowHandle};

/// Cursor images are square ARGB bitmaps of this size.
pub const CURSOR_SIZE: u32 = 32;

/// The buffer an adapter renders into, as returned by [`Present::get_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackBuffer {
    /// Global name of the buffer object.
    pub name: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bytes_per_pixel: u32,
    /// Where the window's device context sits inside the drawable.
    pub source_rect: Rect,
}

/// A presentation backend as seen by the rendering adapter.
pub trait Present: Send + Sync + fmt::Debug {
    /// The parameters after clamping.
    fn presentation_parameters(&self) -> PresentationParameters;

    /// Acquires the back buffer of the target window.
    ///
    /// The target is `window_override`, else the device window, else the
    /// focus window. `dest_rect` restricts the area the next
    /// [`Present::present`] copies, relative to the window.
    fn get_buffer(
        &self,
        window_override: Option<WindowHandle>,
        dest_rect: Option<Rect>,
    ) -> Result<BackBuffer, PresentError>;

    fn get_front_buffer(&self) -> Result<BackBuffer, PresentError>;

    /// Copies the back buffer acquired by the last [`Present::get_buffer`]
    /// to the front.
    fn present(&self, flags: PresentFlags) -> Result<(), PresentError>;

    fn get_raster_status(&self) -> Result<RasterStatus, PresentError>;

    fn get_display_mode(&self) -> Result<(DisplayMode, DisplayRotation), PresentError>;

    fn get_present_stats(&self) -> Result<PresentStats, PresentError>;

    /// Cursor position relative to the focus window.
    fn get_cursor_pos(&self) -> Result<Point, PresentError>;

    fn set_cursor_pos(&self, pos: Point) -> Result<(), PresentError>;

    /// Replaces the cursor with `image` (32×32 ARGB) when given, then shows or
    /// hides it.
    fn set_cursor(
        &self,
        image: Option<&[u32]>,
        hotspot: Option<Point>,
        show: bool,
    ) -> Result<(), PresentError>;

    fn set_gamma_ramp(
        &self,
        ramp: &GammaRamp,
        window_override: Option<WindowHandle>,
    ) -> Result<(), PresentError>;

    /// Client area of `window`, or of the focus window.
    fn get_window_rect(&self, window: Option<WindowHandle>) -> Result<Rect, PresentError>;
}

/// The drawable and region of the last acquired buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferSlot {
    drawable: Drawable,
    region: Region,
}

/// [`Present`] implementation on top of DRI2 copy-region swaps.
pub struct Dri2Present {
    context: Arc<PresentContext>,
    params: PresentationParameters,
    focus_window: WindowHandle,
    device_name: String,
    slot: Mutex<Option<BufferSlot>>,
    cursor: Mutex<Option<CursorHandle>>,
}

impl fmt::Debug for Dri2Present {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dri2Present")
            .field("params", &self.params)
            .field("focus_window", &self.focus_window)
            .field("device_name", &self.device_name)
            .field("slot", &self.slot)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Dri2Present {
    /// Creates a backend presenting to `focus_window` (or to the device
    /// window of `params` if there is no focus window).
    ///
    /// The buffer count and format are clamped; a zero back buffer width or
    /// height is replaced by the client area of the drawing window, or by the
    /// configured fallback size when that cannot be queried.
    pub fn new(
        context: Arc<PresentContext>,
        device_name: impl Into<String>,
        params: &PresentationParameters,
        focus_window: Option<WindowHandle>,
    ) -> Result<Arc<Self>, PresentError> {
        let Some(focus_window) = focus_window.or(params.device_window) else {
            error!("no focus window specified for presentation backend");
            return Err(PresentError::invalid_call(
                "neither a focus window nor a device window was given",
            ));
        };
        let draw_window = params.device_window.unwrap_or(focus_window);

        let mut params = params.clone();
        params.clamp_buffers();

        let client = context.windows().client_rect(draw_window).unwrap_or_else(|| {
            let fallback = context.config().fallback_size;
            warn!(
                window = draw_window.0,
                width = fallback.width,
                height = fallback.height,
                "client rect query failed, using fallback size"
            );
            Rect::from_size(fallback.width as i32, fallback.height as i32)
        });
        if params.back_buffer_width == 0 {
            params.back_buffer_width = client.right.max(0) as u32;
        }
        if params.back_buffer_height == 0 {
            params.back_buffer_height = client.bottom.max(0) as u32;
        }

        let device_name = device_name.into();
        debug!(
            focus = focus_window.0,
            device = %device_name,
            width = params.back_buffer_width,
            height = params.back_buffer_height,
            count = params.back_buffer_count,
            "created present backend"
        );
        context.backend_created();
        Ok(Arc::new(Self {
            context,
            params,
            focus_window,
            device_name,
            slot: Mutex::new(None),
            cursor: Mutex::new(None),
        }))
    }

    pub fn focus_window(&self) -> WindowHandle {
        self.focus_window
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<BufferSlot>>, PresentError> {
        self.slot
            .lock()
            .map_err(|_| PresentError::driver_internal("buffer slot lock poisoned"))
    }

    fn cursor(&self) -> Result<MutexGuard<'_, Option<CursorHandle>>, PresentError> {
        self.cursor
            .lock()
            .map_err(|_| PresentError::driver_internal("cursor lock poisoned"))
    }

    /// Builds a cursor from a 32×32 ARGB image. The bitmaps are always freed.
    fn create_cursor(&self, image: &[u32], hotspot: Point) -> Option<CursorHandle> {
        let windows = self.context.windows();
        let mask_bits = vec![0xffu8; (CURSOR_SIZE * CURSOR_SIZE / 8) as usize];
        let color_bits: Vec<u8> = image.iter().flat_map(|px| px.to_ne_bytes()).collect();

        let mask = windows.create_bitmap(CURSOR_SIZE, CURSOR_SIZE, 1, &mask_bits);
        let color = windows.create_bitmap(CURSOR_SIZE, CURSOR_SIZE, 32, &color_bits);
        let cursor = match (mask, color) {
            (Some(mask), Some(color)) => windows.create_cursor(hotspot, mask, color),
            _ => None,
        };
        if let Some(mask) = mask {
            windows.delete_bitmap(mask);
        }
        if let Some(color) = color {
            windows.delete_bitmap(color);
        }
        cursor
    }
}

impl Present for Dri2Present {
    fn presentation_parameters(&self) -> PresentationParameters {
        self.params.clone()
    }

    fn get_buffer(
        &self,
        window_override: Option<WindowHandle>,
        dest_rect: Option<Rect>,
    ) -> Result<BackBuffer, PresentError> {
        let window = window_override
            .or(self.params.device_window)
            .unwrap_or(self.focus_window);
        trace!(window = window.0, ?dest_rect, "get_buffer");

        let record = self.context.cache().get(window)?;
        let mut drawable = record.lock()?;
        if !drawable.is_live() {
            return Err(PresentError::driver_internal(format!(
                "window {:#x} was destroyed",
                window.0
            )));
        }

        let set = self
            .context
            .dri2()
            .get_buffers(drawable.drawable(), &[Attachment::BackLeft])
            .map_err(|err| {
                error!(drawable = drawable.drawable().0, %err, "DRI2GetBuffers failed");
                PresentError::from(err)
            })?;
        let Some(buffer) = set.buffers.first() else {
            error!(drawable = drawable.drawable().0, "DRI2GetBuffers returned no buffer");
            return Err(PresentError::driver_internal("no back buffer available"));
        };

        let source_rect = drawable.source_rect();
        let dest = source_rect.destination(dest_rect.as_ref());
        trace!(?source_rect, ?dest, "destination");
        let region = drawable.clip_region_for(dest)?;

        *self.slot()? = Some(BufferSlot {
            drawable: drawable.drawable(),
            region,
        });

        Ok(BackBuffer {
            name: buffer.name,
            width: set.width,
            height: set.height,
            stride: buffer.pitch,
            bytes_per_pixel: buffer.bytes_per_pixel,
            source_rect,
        })
    }

    fn get_front_buffer(&self) -> Result<BackBuffer, PresentError> {
        warn!("get_front_buffer is not supported");
        Err(PresentError::invalid_call("front buffer readback is not supported"))
    }

    fn present(&self, flags: PresentFlags) -> Result<(), PresentError> {
        trace!(?flags, "present");
        let Some(slot) = *self.slot()? else {
            error!("present without an acquired buffer");
            return Err(PresentError::driver_internal("no buffer has been acquired"));
        };

        let display = self.context.display();
        display.flush()?;
        self.context
            .dri2()
            .copy_region(
                slot.drawable,
                slot.region,
                Attachment::FrontLeft,
                Attachment::BackLeft,
            )
            .map_err(|err| {
                error!(
                    drawable = slot.drawable.0,
                    region = slot.region.0,
                    %err,
                    "DRI2CopyRegion failed"
                );
                PresentError::driver_internal(format!("copy to the front buffer failed: {err}"))
            })
    }

    fn get_raster_status(&self) -> Result<RasterStatus, PresentError> {
        warn!("get_raster_status is not supported");
        Err(PresentError::invalid_call("raster status is not supported"))
    }

    fn get_display_mode(&self) -> Result<(DisplayMode, DisplayRotation), PresentError> {
        let settings = self
            .context
            .windows()
            .display_settings(&self.device_name)
            .unwrap_or_else(|| {
                warn!(device = %self.device_name, "display settings unavailable");
                Default::default()
            });
        let mode = DisplayMode {
            width: settings.width,
            height: settings.height,
            refresh_rate: settings.refresh_rate,
            format: Format::for_display_depth(settings.bits_per_pixel),
            scanline_ordering: if settings.interlaced {
                ScanlineOrdering::Interlaced
            } else {
                ScanlineOrdering::Progressive
            },
        };
        Ok((mode, DisplayRotation::from_orientation(settings.orientation)))
    }

    fn get_present_stats(&self) -> Result<PresentStats, PresentError> {
        warn!("get_present_stats is not supported");
        Err(PresentError::invalid_call("present statistics are not supported"))
    }

    fn get_cursor_pos(&self) -> Result<Point, PresentError> {
        let windows = self.context.windows();
        windows
            .cursor_pos()
            .and_then(|pos| windows.screen_to_client(self.focus_window, pos))
            .ok_or_else(|| PresentError::driver_internal("cursor position unavailable"))
    }

    fn set_cursor_pos(&self, pos: Point) -> Result<(), PresentError> {
        if self.context.windows().set_cursor_pos(pos) {
            Ok(())
        } else {
            Err(PresentError::driver_internal("moving the cursor failed"))
        }
    }

    fn set_cursor(
        &self,
        image: Option<&[u32]>,
        hotspot: Option<Point>,
        show: bool,
    ) -> Result<(), PresentError> {
        let mut current = self.cursor()?;
        if let Some(image) = image {
            let Some(hotspot) = hotspot else {
                return Err(PresentError::invalid_call("cursor image without a hotspot"));
            };
            let expected = (CURSOR_SIZE * CURSOR_SIZE) as usize;
            if image.len() != expected {
                return Err(PresentError::invalid_call(format!(
                    "cursor image has {} pixels, expected {expected}",
                    image.len()
                )));
            }
            match self.create_cursor(image, hotspot) {
                Some(cursor) => {
                    if let Some(old) = current.replace(cursor) {
                        self.context.windows().destroy_cursor(old);
                    }
                }
                None => warn!("cursor creation failed, keeping the previous cursor"),
            }
        }
        self.context
            .windows()
            .show_cursor(if show { *current } else { None });
        Ok(())
    }

    fn set_gamma_ramp(
        &self,
        ramp: &GammaRamp,
        window_override: Option<WindowHandle>,
    ) -> Result<(), PresentError> {
        let window = window_override.unwrap_or(self.focus_window);
        let windows = self.context.windows();
        let dc = windows
            .acquire_dc(window)
            .ok_or_else(|| PresentError::driver_internal("no device context for gamma ramp"))?;
        let ok = windows.set_gamma_ramp(dc, ramp);
        windows.release_dc(window, dc);
        if ok {
            Ok(())
        } else {
            Err(PresentError::driver_internal("setting the gamma ramp failed"))
        }
    }

    fn get_window_rect(&self, window: Option<WindowHandle>) -> Result<Rect, PresentError> {
        let window = window.unwrap_or(self.focus_window);
        self.context.windows().client_rect(window).ok_or_else(|| {
            PresentError::invalid_call(format!("no client rect for window {:#x}", window.0))
        })
    }
}

impl Drop for Dri2Present {
    fn drop(&mut self) {
        let cursor = match self.cursor.get_mut() {
            Ok(cursor) => cursor.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cursor) = cursor {
            self.context.windows().destroy_cursor(cursor);
        }
        self.context.backend_dropped();
        trace!(focus = self.focus_window.0, "present backend released");
    }
}

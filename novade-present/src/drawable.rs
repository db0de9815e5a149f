//! Window → DRI2 drawable cache.
//!
//! Each window that has been presented to gets one [`DrawableRecord`]: the X
//! drawable, the device context it was looked up through, the rectangle that
//! context covers, and the XFixes clip region of the last copy destination.
//!
//! Locking is two-level. The map lock is held only to look up, insert or
//! remove entries. Everything that talks to the window system or the X server
//! happens under the record's own lock (or, for a record still being built,
//! under no lock at all), so presenting to one window never waits on the X
//! traffic of another.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use novade_dri2::{Drawable, Dri2Client, Region, XFixesClient};
use tracing::{debug, trace, warn};

use crate::error::PresentError;
use crate::geometry::Rect;
use crate::window::{DeviceContext, WindowHandle, WindowSystem};

/// Mutable part of a record.
#[derive(Debug)]
struct DrawableState {
    /// Rectangle of the device context inside the drawable, refreshed on
    /// every lookup.
    source_rect: Rect,
    /// Destination the clip region was built for.
    dest_rect: Rect,
    clip_region: Option<Region>,
    /// Set once the record has been removed and its resources released.
    torn_down: bool,
}

/// The cached state of one window.
#[derive(Debug)]
pub struct DrawableRecord {
    window: WindowHandle,
    drawable: Drawable,
    dc: DeviceContext,
    state: Mutex<DrawableState>,
}

impl DrawableRecord {
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn drawable(&self) -> Drawable {
        self.drawable
    }

    pub fn device_context(&self) -> DeviceContext {
        self.dc
    }

    fn lock(&self) -> Result<MutexGuard<'_, DrawableState>, PresentError> {
        self.state
            .lock()
            .map_err(|_| PresentError::driver_internal("drawable record lock poisoned"))
    }
}

/// A record handed out by [`DrawableCache::get`].
///
/// Dropping it releases the reference; the record itself stays cached until
/// [`DrawableCache::destroy`].
#[derive(Debug)]
pub struct DrawableRef {
    record: Arc<DrawableRecord>,
    xfixes: Arc<XFixesClient>,
}

impl DrawableRef {
    pub fn window(&self) -> WindowHandle {
        self.record.window
    }

    pub fn drawable(&self) -> Drawable {
        self.record.drawable
    }

    /// Locks the record for one buffer acquisition.
    pub fn lock(&self) -> Result<DrawableGuard<'_>, PresentError> {
        Ok(DrawableGuard {
            record: &self.record,
            state: self.record.lock()?,
            xfixes: &self.xfixes,
        })
    }
}

/// Exclusive access to a record's mutable state.
pub struct DrawableGuard<'a> {
    record: &'a DrawableRecord,
    state: MutexGuard<'a, DrawableState>,
    xfixes: &'a XFixesClient,
}

impl fmt::Debug for DrawableGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawableGuard")
            .field("record", &self.record)
            .field("state", &*self.state)
            .finish()
    }
}

impl DrawableGuard<'_> {
    pub fn drawable(&self) -> Drawable {
        self.record.drawable
    }

    pub fn source_rect(&self) -> Rect {
        self.state.source_rect
    }

    pub fn dest_rect(&self) -> Rect {
        self.state.dest_rect
    }

    pub fn clip_region(&self) -> Option<Region> {
        self.state.clip_region
    }

    /// `false` once the window has been destroyed.
    pub fn is_live(&self) -> bool {
        !self.state.torn_down
    }

    /// Returns a clip region covering `dest`, reusing the cached one when it
    /// was built for the same rectangle.
    pub fn clip_region_for(&mut self, dest: Rect) -> Result<Region, PresentError> {
        if self.state.dest_rect != dest {
            if let Some(region) = self.state.clip_region.take() {
                trace!(region = region.0, ?dest, "destination moved, dropping clip region");
                self.xfixes.destroy_region(region);
            }
        }
        if let Some(region) = self.state.clip_region {
            return Ok(region);
        }

        let region = self.xfixes.create_region(&[dest.to_rectangle()])?;
        debug!(
            window = self.record.window.0,
            region = region.0,
            ?dest,
            "created clip region"
        );
        self.state.clip_region = Some(region);
        self.state.dest_rect = dest;
        Ok(region)
    }
}

/// Process-wide window → record map.
pub struct DrawableCache {
    records: Mutex<HashMap<WindowHandle, Arc<DrawableRecord>>>,
    dri2: Arc<Dri2Client>,
    xfixes: Arc<XFixesClient>,
    windows: Arc<dyn WindowSystem>,
}

impl fmt::Debug for DrawableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawableCache")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl DrawableCache {
    pub fn new(
        dri2: Arc<Dri2Client>,
        xfixes: Arc<XFixesClient>,
        windows: Arc<dyn WindowSystem>,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            dri2,
            xfixes,
            windows,
        }
    }

    fn records(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<WindowHandle, Arc<DrawableRecord>>>, PresentError> {
        self.records
            .lock()
            .map_err(|_| PresentError::driver_internal("drawable cache lock poisoned"))
    }

    /// Returns the record of `window`, creating it on first use.
    ///
    /// For a cached record the device-context rectangle is re-read; if it
    /// moved, the clip region is dropped. A failed re-read keeps the old
    /// rectangle. Concurrent first calls for one window may each build a
    /// record, but only one is kept and every caller gets that one.
    pub fn get(&self, window: WindowHandle) -> Result<DrawableRef, PresentError> {
        loop {
            let cached = self.records()?.get(&window).cloned();
            let record = match cached {
                Some(record) => record,
                None => self.insert_or_discard(window)?,
            };
            if self.refresh(&record)? {
                return Ok(DrawableRef {
                    record,
                    xfixes: Arc::clone(&self.xfixes),
                });
            }
            // Destroyed between the lookup and the refresh; look again.
            trace!(window = window.0, "record destroyed while looking it up");
        }
    }

    /// Re-reads the record's rectangle. Returns `false` for a torn down record.
    fn refresh(&self, record: &DrawableRecord) -> Result<bool, PresentError> {
        let mut state = record.lock()?;
        if state.torn_down {
            return Ok(false);
        }
        match self.windows.drawable_geometry(record.dc) {
            Some(geometry) if geometry.rect != state.source_rect => {
                debug!(
                    window = record.window.0,
                    old = ?state.source_rect,
                    new = ?geometry.rect,
                    "window moved"
                );
                state.source_rect = geometry.rect;
                if let Some(region) = state.clip_region.take() {
                    self.xfixes.destroy_region(region);
                }
            }
            Some(_) => {}
            None => warn!(
                window = record.window.0,
                "window update check failed, keeping the last rectangle"
            ),
        }
        Ok(true)
    }

    fn insert_or_discard(&self, window: WindowHandle) -> Result<Arc<DrawableRecord>, PresentError> {
        trace!(window = window.0, "no drawable for window, creating one");
        let candidate = Arc::new(self.create_record(window)?);

        let winner = {
            let mut records = self.records()?;
            match records.get(&window) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    records.insert(window, Arc::clone(&candidate));
                    None
                }
            }
        };

        match winner {
            Some(existing) => {
                debug!(window = window.0, "lost creation race, discarding candidate");
                self.tear_down(&candidate)?;
                Ok(existing)
            }
            None => Ok(candidate),
        }
    }

    fn create_record(&self, window: WindowHandle) -> Result<DrawableRecord, PresentError> {
        let dc = self.windows.acquire_dc(window).ok_or_else(|| {
            PresentError::driver_internal(format!("no device context for window {:#x}", window.0))
        })?;
        let Some(geometry) = self.windows.drawable_geometry(dc) else {
            self.windows.release_dc(window, dc);
            return Err(PresentError::driver_internal(format!(
                "X drawable lookup failed for window {:#x}",
                window.0
            )));
        };

        self.dri2.create_drawable(geometry.drawable);
        debug!(
            window = window.0,
            drawable = geometry.drawable.0,
            rect = ?geometry.rect,
            "created DRI2 drawable"
        );
        Ok(DrawableRecord {
            window,
            drawable: geometry.drawable,
            dc,
            state: Mutex::new(DrawableState {
                source_rect: geometry.rect,
                dest_rect: Rect::default(),
                clip_region: None,
                torn_down: false,
            }),
        })
    }

    /// Releases the server drawable, device context and clip region of `record`.
    fn tear_down(&self, record: &DrawableRecord) -> Result<(), PresentError> {
        let mut state = record.lock()?;
        if state.torn_down {
            return Ok(());
        }
        state.torn_down = true;
        self.dri2.destroy_drawable(record.drawable);
        self.windows.release_dc(record.window, record.dc);
        if let Some(region) = state.clip_region.take() {
            self.xfixes.destroy_region(region);
        }
        Ok(())
    }

    /// Forgets `window` and releases its resources. Unknown windows are ignored.
    pub fn destroy(&self, window: WindowHandle) -> Result<(), PresentError> {
        let removed = self.records()?.remove(&window);
        if let Some(record) = removed {
            debug!(window = window.0, drawable = record.drawable.0, "destroying drawable");
            self.tear_down(&record)?;
        }
        Ok(())
    }

    pub fn contains(&self, window: WindowHandle) -> bool {
        self.records().map(|r| r.contains_key(&window)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

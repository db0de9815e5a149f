//! An in-memory [`WindowSystem`] for tests.
//!
//! It keeps track of every device context, bitmap and cursor it hands out so
//! tests can check that the backend releases what it takes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use novade_dri2::Drawable;

use crate::geometry::{Point, Rect};
use crate::window::{
    BitmapHandle, CursorHandle, DeviceContext, DisplaySettings, DrawableGeometry, GammaRamp,
    WindowHandle, WindowSystem,
};

#[derive(Debug, Clone)]
struct FakeWindow {
    drawable: Drawable,
    client_rect: Option<Rect>,
    dc_rect: Rect,
    fail_geometry: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    windows: HashMap<WindowHandle, FakeWindow>,
    dcs: HashMap<DeviceContext, WindowHandle>,
    bitmaps: HashSet<BitmapHandle>,
    cursors: HashSet<CursorHandle>,
    shown_cursor: Option<CursorHandle>,
    root: Option<Drawable>,
    devices: Vec<String>,
    settings: HashMap<String, DisplaySettings>,
    cursor_pos: Option<Point>,
    /// Screen position of each window's client origin.
    origins: HashMap<WindowHandle, Point>,
    fail_cursor_creation: bool,
    fail_gamma: bool,
    gamma_ramps: Vec<(WindowHandle, GammaRamp)>,
    next_handle: u64,
}

impl FakeState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Debug, Default)]
pub struct FakeWindowSystem {
    state: Mutex<FakeState>,
    geometry_delay: Mutex<Option<Duration>>,
    geometry_queries: AtomicUsize,
}

impl FakeWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a window backed by `drawable` whose device context covers `rect`.
    /// Its client area has the same size as `rect`.
    pub fn add_window(&self, drawable: Drawable, rect: Rect) -> WindowHandle {
        let mut state = self.state();
        let window = WindowHandle(0x1_0000 + state.next());
        state.windows.insert(
            window,
            FakeWindow {
                drawable,
                client_rect: Some(Rect::from_size(rect.width(), rect.height())),
                dc_rect: rect,
                fail_geometry: false,
            },
        );
        state.origins.insert(window, Point::new(rect.left, rect.top));
        window
    }

    pub fn set_dc_rect(&self, window: WindowHandle, rect: Rect) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.dc_rect = rect;
        }
    }

    /// `None` makes client-area queries for `window` fail.
    pub fn set_client_rect(&self, window: WindowHandle, rect: Option<Rect>) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.client_rect = rect;
        }
    }

    pub fn fail_geometry(&self, window: WindowHandle, fail: bool) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.fail_geometry = fail;
        }
    }

    /// Makes every drawable lookup sleep, widening race windows.
    pub fn set_geometry_delay(&self, delay: Option<Duration>) {
        *self
            .geometry_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn geometry_queries(&self) -> usize {
        self.geometry_queries.load(Ordering::SeqCst)
    }

    pub fn outstanding_dcs(&self) -> usize {
        self.state().dcs.len()
    }

    pub fn set_root(&self, root: Option<Drawable>) {
        self.state().root = root;
    }

    pub fn add_display_device(&self, name: &str, settings: Option<DisplaySettings>) {
        let mut state = self.state();
        state.devices.push(name.to_string());
        if let Some(settings) = settings {
            state.settings.insert(name.to_string(), settings);
        }
    }

    pub fn set_screen_cursor_pos(&self, pos: Option<Point>) {
        self.state().cursor_pos = pos;
    }

    pub fn screen_cursor_pos(&self) -> Option<Point> {
        self.state().cursor_pos
    }

    pub fn live_bitmaps(&self) -> usize {
        self.state().bitmaps.len()
    }

    pub fn live_cursors(&self) -> usize {
        self.state().cursors.len()
    }

    pub fn shown_cursor(&self) -> Option<CursorHandle> {
        self.state().shown_cursor
    }

    pub fn fail_cursor_creation(&self, fail: bool) {
        self.state().fail_cursor_creation = fail;
    }

    pub fn fail_gamma(&self, fail: bool) {
        self.state().fail_gamma = fail;
    }

    /// Windows whose gamma ramp was set, in order.
    pub fn gamma_windows(&self) -> Vec<WindowHandle> {
        self.state().gamma_ramps.iter().map(|(w, _)| *w).collect()
    }
}

impl WindowSystem for FakeWindowSystem {
    fn client_rect(&self, window: WindowHandle) -> Option<Rect> {
        self.state().windows.get(&window)?.client_rect
    }

    fn acquire_dc(&self, window: WindowHandle) -> Option<DeviceContext> {
        let mut state = self.state();
        if !state.windows.contains_key(&window) {
            return None;
        }
        let dc = DeviceContext(state.next());
        state.dcs.insert(dc, window);
        Some(dc)
    }

    fn release_dc(&self, window: WindowHandle, dc: DeviceContext) {
        let mut state = self.state();
        if state.dcs.get(&dc) == Some(&window) {
            state.dcs.remove(&dc);
        }
    }

    fn drawable_geometry(&self, dc: DeviceContext) -> Option<DrawableGeometry> {
        self.geometry_queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .geometry_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let state = self.state();
        let window = state.dcs.get(&dc)?;
        let w = state.windows.get(window)?;
        if w.fail_geometry {
            return None;
        }
        Some(DrawableGeometry {
            drawable: w.drawable,
            rect: w.dc_rect,
        })
    }

    fn root_window(&self, _drawable: Drawable) -> Option<Drawable> {
        self.state().root
    }

    fn display_device_name(&self, _device_name: &str, index: u32) -> Option<String> {
        self.state().devices.get(index as usize).cloned()
    }

    fn display_settings(&self, device_name: &str) -> Option<DisplaySettings> {
        self.state().settings.get(device_name).copied()
    }

    fn cursor_pos(&self) -> Option<Point> {
        self.state().cursor_pos
    }

    fn set_cursor_pos(&self, pos: Point) -> bool {
        self.state().cursor_pos = Some(pos);
        true
    }

    fn screen_to_client(&self, window: WindowHandle, pos: Point) -> Option<Point> {
        let origin = *self.state().origins.get(&window)?;
        Some(Point::new(pos.x - origin.x, pos.y - origin.y))
    }

    fn create_bitmap(
        &self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        bits: &[u8],
    ) -> Option<BitmapHandle> {
        let stride = ((width * bits_per_pixel + 7) / 8) as usize;
        if bits.len() < stride * height as usize {
            return None;
        }
        let mut state = self.state();
        let bitmap = BitmapHandle(state.next());
        state.bitmaps.insert(bitmap);
        Some(bitmap)
    }

    fn delete_bitmap(&self, bitmap: BitmapHandle) {
        self.state().bitmaps.remove(&bitmap);
    }

    fn create_cursor(
        &self,
        _hotspot: Point,
        mask: BitmapHandle,
        color: BitmapHandle,
    ) -> Option<CursorHandle> {
        let mut state = self.state();
        if state.fail_cursor_creation
            || !state.bitmaps.contains(&mask)
            || !state.bitmaps.contains(&color)
        {
            return None;
        }
        let cursor = CursorHandle(state.next());
        state.cursors.insert(cursor);
        Some(cursor)
    }

    fn destroy_cursor(&self, cursor: CursorHandle) {
        let mut state = self.state();
        state.cursors.remove(&cursor);
        if state.shown_cursor == Some(cursor) {
            state.shown_cursor = None;
        }
    }

    fn show_cursor(&self, cursor: Option<CursorHandle>) {
        self.state().shown_cursor = cursor;
    }

    fn set_gamma_ramp(&self, dc: DeviceContext, ramp: &GammaRamp) -> bool {
        let mut state = self.state();
        if state.fail_gamma {
            return false;
        }
        let Some(window) = state.dcs.get(&dc).copied() else {
            return false;
        };
        state.gamma_ramps.push((window, ramp.clone()));
        true
    }
}

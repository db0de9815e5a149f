//! Services shared by every backend of a process.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use novade_dri2::{Display, Dri2Client, XFixesClient};

use crate::config::PresentConfig;
use crate::drawable::DrawableCache;
use crate::window::WindowSystem;

/// The X connection, protocol clients, window system and drawable cache.
///
/// Created once per process and shared as `Arc<PresentContext>`.
pub struct PresentContext {
    dri2: Arc<Dri2Client>,
    xfixes: Arc<XFixesClient>,
    windows: Arc<dyn WindowSystem>,
    cache: DrawableCache,
    config: PresentConfig,
    live_backends: AtomicUsize,
}

impl fmt::Debug for PresentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentContext")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .field("live_backends", &self.live_backends)
            .finish_non_exhaustive()
    }
}

impl PresentContext {
    pub fn new(
        display: Arc<Display>,
        windows: Arc<dyn WindowSystem>,
        config: PresentConfig,
    ) -> Arc<Self> {
        let dri2 = Arc::new(Dri2Client::new(Arc::clone(&display)));
        let xfixes = Arc::new(XFixesClient::new(display));
        let cache = DrawableCache::new(Arc::clone(&dri2), Arc::clone(&xfixes), Arc::clone(&windows));
        Arc::new(Self {
            dri2,
            xfixes,
            windows,
            cache,
            config,
            live_backends: AtomicUsize::new(0),
        })
    }

    pub fn display(&self) -> &Arc<Display> {
        self.dri2.display()
    }

    pub fn dri2(&self) -> &Dri2Client {
        &self.dri2
    }

    pub fn xfixes(&self) -> &XFixesClient {
        &self.xfixes
    }

    pub fn windows(&self) -> &dyn WindowSystem {
        self.windows.as_ref()
    }

    pub fn cache(&self) -> &DrawableCache {
        &self.cache
    }

    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    /// Number of present backends currently alive.
    pub fn live_backends(&self) -> usize {
        self.live_backends.load(Ordering::Acquire)
    }

    pub(crate) fn backend_created(&self) {
        self.live_backends.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn backend_dropped(&self) {
        self.live_backends.fetch_sub(1, Ordering::AcqRel);
    }
}

//! Driver entry points: capability probe, present groups and adapters.

use std::fmt;
use std::sync::{Arc, Mutex};

use novade_dri2::{Drawable, DriverType, Version};
use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::context::PresentContext;
use crate::device::DrmDevice;
use crate::error::PresentError;
use crate::group::{Dri2PresentGroup, PresentGroup};
use crate::params::PresentationParameters;
use crate::window::{DeviceContext, WindowHandle};

/// Interface version callers must ask for in [`DriverLoader::get`].
pub const DRIVER_VERSION: u32 = 0;

/// Major version of the adapter factory interface this driver is built against.
pub const ADAPTER_MAJOR_VERSION: u32 = 0;

/// Creates native rendering adapters on an authenticated DRM device.
pub trait AdapterFactory: Send + Sync {
    type Adapter;

    fn major_version(&self) -> u32;

    fn minor_version(&self) -> u32;

    fn create_adapter(&self, device: DrmDevice) -> Result<Self::Adapter, PresentError>;
}

/// A probed, usable driver.
pub struct Driver<F> {
    context: Arc<PresentContext>,
    factory: F,
    dri2_version: Version,
    xfixes_version: Version,
}

impl<F> fmt::Debug for Driver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("dri2_version", &self.dri2_version)
            .field("xfixes_version", &self.xfixes_version)
            .finish_non_exhaustive()
    }
}

impl<F: AdapterFactory> Driver<F> {
    /// Checks that the factory and the X server support everything the
    /// driver needs.
    pub fn probe(context: Arc<PresentContext>, factory: F) -> Result<Self, PresentError> {
        if factory.major_version() != ADAPTER_MAJOR_VERSION {
            return Err(PresentError::Unavailable(format!(
                "adapter factory has version {}.{}, expected {}.x",
                factory.major_version(),
                factory.minor_version(),
                ADAPTER_MAJOR_VERSION
            )));
        }

        let config = context.config();
        if !context.dri2().query_extension() {
            return Err(PresentError::Unavailable(
                "X server doesn't support DRI2".to_string(),
            ));
        }
        let dri2_version = context
            .dri2()
            .query_version(config.dri2_version.into())
            .map_err(|err| PresentError::Unavailable(format!("unable to query DRI2: {err}")))?;
        debug!(major = dri2_version.major, minor = dri2_version.minor, "got DRI2 version");

        let xfixes_version = context
            .xfixes()
            .query_version(config.xfixes_version.into())
            .map_err(|err| PresentError::Unavailable(format!("unable to query XFixes: {err}")))?;
        debug!(
            major = xfixes_version.major,
            minor = xfixes_version.minor,
            "got XFixes version"
        );

        Ok(Self {
            context,
            factory,
            dri2_version,
            xfixes_version,
        })
    }

    pub fn context(&self) -> &Arc<PresentContext> {
        &self.context
    }

    pub fn dri2_version(&self) -> Version {
        self.dri2_version
    }

    pub fn xfixes_version(&self) -> Version {
        self.xfixes_version
    }

    /// Creates the backends of device `device_name`; see [`Dri2PresentGroup::new`].
    pub fn create_present_group(
        &self,
        device_name: &str,
        adapter: u32,
        focus_window: Option<WindowHandle>,
        params: &[PresentationParameters],
    ) -> Result<Arc<dyn PresentGroup>, PresentError> {
        let group =
            Dri2PresentGroup::new(&self.context, device_name, adapter, focus_window, params)?;
        Ok(group as Arc<dyn PresentGroup>)
    }

    /// Opens and authenticates the DRM device serving the screen of `dc` and
    /// creates an adapter on it.
    pub fn create_adapter(&self, dc: DeviceContext) -> Result<F::Adapter, PresentError> {
        let windows = self.context.windows();
        let drawable = match windows.drawable_geometry(dc) {
            Some(geometry) => geometry.drawable,
            None => {
                warn!(dc = dc.0, "X11 drawable lookup failed");
                Drawable::default()
            }
        };
        let root = windows.root_window(drawable).unwrap_or_else(|| {
            warn!(drawable = drawable.0, "unable to get root window");
            drawable
        });

        let info = self
            .context
            .dri2()
            .connect(root.0, DriverType::Dri)
            .map_err(|err| {
                warn!(window = root.0, %err, "unable to connect DRI2");
                err
            })?;

        let device = DrmDevice::open(&info.device_name).map_err(|err| {
            warn!(device = %info.device_name, %err, "failed to open DRM device");
            err
        })?;
        let magic = device.magic().map_err(|err| {
            warn!(device = %info.device_name, %err, "DRM_IOCTL_GET_MAGIC failed");
            err
        })?;
        debug!(driver = %info.driver_name, device = %info.device_name, "associated DRM device");

        self.context
            .dri2()
            .authenticate(root.0, magic)
            .map_err(|err| {
                warn!(window = root.0, %err, "DRI2 authentication failed");
                err
            })?;

        let adapter = self.factory.create_adapter(device).map_err(|err| {
            warn!(%err, "unable to create adapter");
            err
        })?;
        info!(device = %info.device_name, "created adapter");
        Ok(adapter)
    }

    /// Forgets the cached drawable of a window that is being destroyed.
    pub fn destroy_window(&self, window: WindowHandle) -> Result<(), PresentError> {
        self.context.cache().destroy(window)
    }
}

/// Lazily probes the driver once and hands it out.
pub struct DriverLoader<F> {
    context: Arc<PresentContext>,
    factory: Mutex<Option<F>>,
    driver: OnceCell<Option<Arc<Driver<F>>>>,
}

impl<F> fmt::Debug for DriverLoader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverLoader")
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}

impl<F: AdapterFactory> DriverLoader<F> {
    pub fn new(context: Arc<PresentContext>, factory: F) -> Self {
        Self {
            context,
            factory: Mutex::new(Some(factory)),
            driver: OnceCell::new(),
        }
    }

    /// Returns the driver if `version` matches [`DRIVER_VERSION`] and the
    /// probe succeeded. The probe runs on the first call only.
    pub fn get(&self, version: u32) -> Option<Arc<Driver<F>>> {
        if version != DRIVER_VERSION {
            error!(
                requested = version,
                supported = DRIVER_VERSION,
                "driver interface version mismatch"
            );
            return None;
        }
        self.driver.get_or_init(|| self.probe()).clone()
    }

    fn probe(&self) -> Option<Arc<Driver<F>>> {
        let factory = match self.factory.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }?;
        match Driver::probe(Arc::clone(&self.context), factory) {
            Ok(driver) => Some(Arc::new(driver)),
            Err(err) => {
                error!(%err, "native Direct3D will be unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresentConfig;
    use crate::geometry::Rect;
    use crate::testing::FakeWindowSystem;
    use crate::window::WindowSystem;
    use novade_dri2::testing::FakeServer;
    use novade_dri2::Display;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        major: u32,
        created: Arc<AtomicUsize>,
    }

    impl AdapterFactory for CountingFactory {
        type Adapter = DrmDevice;

        fn major_version(&self) -> u32 {
            self.major
        }

        fn minor_version(&self) -> u32 {
            1
        }

        fn create_adapter(&self, device: DrmDevice) -> Result<DrmDevice, PresentError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(device)
        }
    }

    fn context(server: &FakeServer, windows: &Arc<FakeWindowSystem>) -> Arc<PresentContext> {
        PresentContext::new(
            Arc::new(Display::new(server.transport())),
            windows.clone(),
            PresentConfig::default(),
        )
    }

    #[test]
    fn probe_negotiates_versions() {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let loader = DriverLoader::new(context(&server, &windows), CountingFactory::default());

        let driver = loader.get(DRIVER_VERSION).unwrap();
        assert_eq!(driver.dri2_version(), Version::new(1, 4));
        assert_eq!(driver.xfixes_version(), Version::new(2, 0));
    }

    #[test]
    fn probe_runs_once() {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let loader = DriverLoader::new(context(&server, &windows), CountingFactory::default());

        let first = loader.get(DRIVER_VERSION).unwrap();
        let second = loader.get(DRIVER_VERSION).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(server.request_count("DRI2QueryVersion"), 1);
    }

    #[test]
    fn wrong_interface_version_is_refused() {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let loader = DriverLoader::new(context(&server, &windows), CountingFactory::default());
        assert!(loader.get(DRIVER_VERSION + 1).is_none());
        assert!(server.requests().is_empty(), "no probe for a mismatched version");
    }

    #[test]
    fn incompatible_factory_makes_the_driver_unavailable() {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let factory = CountingFactory {
            major: ADAPTER_MAJOR_VERSION + 1,
            ..Default::default()
        };
        let err = Driver::probe(context(&server, &windows), factory).unwrap_err();
        assert!(matches!(err, PresentError::Unavailable(_)));
    }

    #[test]
    fn missing_dri2_makes_the_driver_unavailable() {
        let server = FakeServer::builder().without_dri2().build();
        let windows = Arc::new(FakeWindowSystem::new());
        let loader = DriverLoader::new(context(&server, &windows), CountingFactory::default());
        assert!(loader.get(DRIVER_VERSION).is_none());
        assert!(loader.get(DRIVER_VERSION).is_none());
        assert_eq!(server.request_count("QueryExtension"), 1);
    }

    #[test]
    fn missing_xfixes_makes_the_driver_unavailable() {
        let server = FakeServer::builder().without_xfixes().build();
        let windows = Arc::new(FakeWindowSystem::new());
        let err = Driver::probe(context(&server, &windows), CountingFactory::default())
            .unwrap_err();
        assert!(matches!(err, PresentError::Unavailable(msg) if msg.contains("XFixes")));
    }

    #[test]
    fn adapter_creation_fails_without_a_driver_name() {
        let server = FakeServer::builder().driver("", "").build();
        let windows = Arc::new(FakeWindowSystem::new());
        let window = windows.add_window(Drawable(0x0060_0001), Rect::from_size(640, 480));
        let factory = CountingFactory::default();
        let created = Arc::clone(&factory.created);
        let driver = Driver::probe(context(&server, &windows), factory).unwrap();

        let dc = windows.acquire_dc(window).unwrap();
        let err = driver.create_adapter(dc).unwrap_err();
        assert!(matches!(err, PresentError::Protocol(_)));
        assert_eq!(err.code(), crate::ResultCode::DriverInternalError);
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(server.unread_bytes(), 0);
    }

    #[test]
    fn adapter_creation_fails_on_a_missing_device_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("card0");
        let server = FakeServer::builder()
            .driver("fake", node.to_str().unwrap())
            .build();
        let windows = Arc::new(FakeWindowSystem::new());
        windows.set_root(Some(Drawable(0x0000_0123)));
        let window = windows.add_window(Drawable(0x0060_0001), Rect::from_size(640, 480));
        let driver = Driver::probe(context(&server, &windows), CountingFactory::default()).unwrap();

        let dc = windows.acquire_dc(window).unwrap();
        let err = driver.create_adapter(dc).unwrap_err();
        assert!(matches!(err, PresentError::Device { .. }));
        assert_eq!(server.request_count("DRI2Authenticate"), 0);
    }

    #[test]
    fn adapter_creation_needs_a_real_drm_node() {
        let node = tempfile::NamedTempFile::new().unwrap();
        let server = FakeServer::builder()
            .driver("fake", node.path().to_str().unwrap())
            .build();
        let windows = Arc::new(FakeWindowSystem::new());
        let window = windows.add_window(Drawable(0x0060_0001), Rect::from_size(640, 480));
        let driver = Driver::probe(context(&server, &windows), CountingFactory::default()).unwrap();

        let dc = windows.acquire_dc(window).unwrap();
        assert!(matches!(
            driver.create_adapter(dc),
            Err(PresentError::Device { .. })
        ));
    }

    #[test]
    fn destroy_window_drops_the_cached_drawable() {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let window = windows.add_window(Drawable(0x0060_0001), Rect::from_size(640, 480));
        let driver = Driver::probe(context(&server, &windows), CountingFactory::default()).unwrap();

        driver.context().cache().get(window).unwrap();
        driver.destroy_window(window).unwrap();
        assert!(driver.context().cache().is_empty());
        assert!(server.live_drawables().is_empty());
    }
}

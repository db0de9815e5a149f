//! One present backend per display head.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::PresentContext;
use crate::error::PresentError;
use crate::params::PresentationParameters;
use crate::present::{Dri2Present, Present};
use crate::window::WindowHandle;

/// The backends of a device, indexed by head.
pub trait PresentGroup: Send + Sync + fmt::Debug {
    fn head_count(&self) -> usize;

    /// Backend of head `index`.
    fn get_present(&self, index: usize) -> Result<Arc<dyn Present>, PresentError>;

    /// Not supported; always an invalid call.
    fn create_additional_present(
        &self,
        params: &PresentationParameters,
    ) -> Result<Arc<dyn Present>, PresentError>;
}

#[derive(Debug)]
pub struct Dri2PresentGroup {
    backends: Vec<Arc<Dri2Present>>,
}

impl Dri2PresentGroup {
    /// Builds one backend per entry of `params`.
    ///
    /// Head `i` presents on sub-device `adapter + i` of `device_name`. A
    /// single head always uses sub-device 0 whatever `adapter` says. A sub-device that cannot be found leaves the backend
    /// with an empty device name. If any backend fails, the ones already
    /// built are released and the error is returned.
    pub fn new(
        context: &Arc<PresentContext>,
        device_name: &str,
        adapter: u32,
        focus_window: Option<WindowHandle>,
        params: &[PresentationParameters],
    ) -> Result<Arc<Self>, PresentError> {
        let adapter = if params.len() == 1 { 0 } else { adapter };

        let mut backends = Vec::with_capacity(params.len());
        for (head, head_params) in params.iter().enumerate() {
            let index = adapter.saturating_add(head as u32);
            let sub_device = context
                .windows()
                .display_device_name(device_name, index)
                .unwrap_or_else(|| {
                    warn!(head, device = device_name, "couldn't find sub-device");
                    String::new()
                });

            let backend = Dri2Present::new(
                Arc::clone(context),
                sub_device,
                head_params,
                focus_window,
            )
            .map_err(|err| {
                error!(head, %err, "creating present backend failed");
                err
            })?;
            backends.push(backend);
        }

        debug!(heads = backends.len(), device = device_name, "created present group");
        Ok(Arc::new(Self { backends }))
    }

    /// Concrete backend of head `index`.
    pub fn backend(&self, index: usize) -> Option<&Arc<Dri2Present>> {
        self.backends.get(index)
    }
}

impl PresentGroup for Dri2PresentGroup {
    fn head_count(&self) -> usize {
        self.backends.len()
    }

    fn get_present(&self, index: usize) -> Result<Arc<dyn Present>, PresentError> {
        match self.backends.get(index) {
            Some(backend) => Ok(Arc::clone(backend) as Arc<dyn Present>),
            None => {
                error!(index, heads = self.backends.len(), "head index out of range");
                Err(PresentError::invalid_call(format!(
                    "head {index} out of range, group has {}",
                    self.backends.len()
                )))
            }
        }
    }

    fn create_additional_present(
        &self,
        _params: &PresentationParameters,
    ) -> Result<Arc<dyn Present>, PresentError> {
        warn!("create_additional_present is not supported");
        Err(PresentError::invalid_call("additional swap chains are not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresentConfig;
    use crate::geometry::Rect;
    use crate::testing::FakeWindowSystem;
    use novade_dri2::testing::FakeServer;
    use novade_dri2::{Display, Drawable};
    use pretty_assertions::assert_eq;

    fn context() -> (Arc<FakeWindowSystem>, Arc<PresentContext>, WindowHandle) {
        let server = FakeServer::new();
        let windows = Arc::new(FakeWindowSystem::new());
        let window = windows.add_window(Drawable(0x0060_0001), Rect::from_size(800, 600));
        windows.add_display_device("\\\\.\\DISPLAY1", None);
        windows.add_display_device("\\\\.\\DISPLAY2", None);
        let context = PresentContext::new(
            Arc::new(Display::new(server.transport())),
            windows.clone(),
            PresentConfig::default(),
        );
        (windows, context, window)
    }

    #[test]
    fn single_head_ignores_the_adapter_index() {
        let (_windows, context, window) = context();
        let group = Dri2PresentGroup::new(
            &context,
            "\\\\.\\DISPLAY",
            1,
            Some(window),
            &[PresentationParameters::default()],
        )
        .unwrap();
        assert_eq!(group.head_count(), 1);
        assert_eq!(group.backend(0).unwrap().device_name(), "\\\\.\\DISPLAY1");
    }

    #[test]
    fn multi_head_counts_from_the_adapter_index() {
        let (windows, context, window) = context();
        windows.add_display_device("\\\\.\\DISPLAY3", None);
        let params = vec![PresentationParameters::default(); 2];
        let group = Dri2PresentGroup::new(&context, "\\\\.\\DISPLAY", 1, Some(window), &params)
            .unwrap();
        assert_eq!(group.head_count(), 2);
        assert_eq!(group.backend(0).unwrap().device_name(), "\\\\.\\DISPLAY2");
        assert_eq!(group.backend(1).unwrap().device_name(), "\\\\.\\DISPLAY3");

        let group = Dri2PresentGroup::new(&context, "\\\\.\\DISPLAY", 0, Some(window), &params)
            .unwrap();
        assert_eq!(group.backend(0).unwrap().device_name(), "\\\\.\\DISPLAY1");
        assert_eq!(group.backend(1).unwrap().device_name(), "\\\\.\\DISPLAY2");
    }

    #[test]
    fn missing_sub_device_is_tolerated() {
        let (_windows, context, window) = context();
        let params = vec![PresentationParameters::default(); 2];
        let group = Dri2PresentGroup::new(&context, "\\\\.\\DISPLAY", 5, Some(window), &params)
            .unwrap();
        assert_eq!(group.backend(0).unwrap().device_name(), "");
        assert_eq!(group.backend(1).unwrap().device_name(), "");
    }

    #[test]
    fn head_lookup_is_bounds_checked() {
        let (_windows, context, window) = context();
        let group = Dri2PresentGroup::new(
            &context,
            "",
            0,
            Some(window),
            &[PresentationParameters::default()],
        )
        .unwrap();
        assert!(group.get_present(0).is_ok());
        assert!(matches!(group.get_present(1), Err(PresentError::InvalidCall(_))));
        assert!(matches!(
            group.create_additional_present(&PresentationParameters::default()),
            Err(PresentError::InvalidCall(_))
        ));
    }

    #[test]
    fn dropping_the_group_releases_its_backends() {
        let (_windows, context, window) = context();
        let params = vec![PresentationParameters::default(); 2];
        let group = Dri2PresentGroup::new(&context, "", 0, Some(window), &params).unwrap();
        let head = group.get_present(1).unwrap();
        assert_eq!(context.live_backends(), 2);

        drop(group);
        assert_eq!(context.live_backends(), 1, "a handed-out head outlives the group");
        drop(head);
        assert_eq!(context.live_backends(), 0);
    }
}

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use novade_dri2::testing::FakeServer;
use novade_dri2::{Attachment, Display, Drawable, Rectangle};
use novade_present::testing::FakeWindowSystem;
use novade_present::{
    AdapterFactory, Dri2Present, DriverLoader, DrmDevice, Present, PresentConfig, PresentContext,
    PresentError, PresentFlags, PresentationParameters, Rect, ResultCode, WindowHandle, WindowSystem,
    DRIVER_VERSION,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

const DRAWABLE: Drawable = Drawable(0x0060_0001);

struct Setup {
    server: FakeServer,
    windows: Arc<FakeWindowSystem>,
    context: Arc<PresentContext>,
    window: WindowHandle,
}

fn setup(server: FakeServer, window_rect: Rect) -> Setup {
    let windows = Arc::new(FakeWindowSystem::new());
    let window = windows.add_window(DRAWABLE, window_rect);
    let context = PresentContext::new(
        Arc::new(Display::new(server.transport())),
        windows.clone(),
        PresentConfig::default(),
    );
    Setup {
        server,
        windows,
        context,
        window,
    }
}

fn backend(s: &Setup) -> Arc<Dri2Present> {
    Dri2Present::new(
        Arc::clone(&s.context),
        "",
        &PresentationParameters::default(),
        Some(s.window),
    )
    .unwrap()
}

fn rect(x: i16, y: i16, width: u16, height: u16) -> Rectangle {
    Rectangle {
        x,
        y,
        width,
        height,
    }
}

#[test]
fn concurrent_first_use_creates_one_drawable() {
    const THREADS: usize = 8;
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    s.windows.set_geometry_delay(Some(Duration::from_millis(20)));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let context = Arc::clone(&s.context);
            let barrier = Arc::clone(&barrier);
            let window = s.window;
            thread::spawn(move || {
                barrier.wait();
                context.cache().get(window).unwrap().drawable()
            })
        })
        .collect();
    let drawables: Vec<Drawable> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(drawables.iter().all(|d| *d == DRAWABLE));
    assert_eq!(s.context.cache().len(), 1);
    assert_eq!(s.server.live_drawables(), vec![DRAWABLE]);
    assert_eq!(
        s.server.drawables_created() - s.server.drawables_destroyed(),
        1
    );
    assert_eq!(s.windows.outstanding_dcs(), 1);
}

#[test]
fn concurrent_presents_share_the_connection() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    let present = backend(&s);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let present = Arc::clone(&present);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    present.get_buffer(None, None).unwrap();
                    present.present(PresentFlags::empty()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(s.server.copies().len(), 40);
    assert_eq!(s.server.live_regions().len(), 1);
    assert_eq!(s.server.unread_bytes(), 0);
}

#[test]
fn clip_region_follows_the_destination() {
    let s = setup(FakeServer::new(), Rect::new(10, 20, 810, 620));
    let present = backend(&s);

    present.get_buffer(None, Some(Rect::new(0, 0, 100, 50))).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    let first = s.server.copies()[0].region;
    assert_eq!(s.server.region_rects(first), Some(vec![rect(10, 20, 100, 50)]));

    present.get_buffer(None, Some(Rect::new(5, 5, 20, 20))).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    let second = s.server.copies()[1].region;
    assert_ne!(first, second);
    assert_eq!(s.server.region_rects(second), Some(vec![rect(15, 25, 20, 20)]));
    assert_eq!(s.server.live_regions(), vec![second]);

    let created = s.server.request_count("XFixesCreateRegion");
    present.get_buffer(None, Some(Rect::new(5, 5, 20, 20))).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.request_count("XFixesCreateRegion"), created);
    assert_eq!(s.server.copies()[2].region, second);
}

#[test]
fn moving_the_window_rebuilds_the_region() {
    let s = setup(FakeServer::new(), Rect::new(0, 0, 640, 480));
    let present = backend(&s);
    present.get_buffer(None, None).unwrap();
    let before = s.server.live_regions();

    s.windows.set_dc_rect(s.window, Rect::new(100, 100, 740, 580));
    let buffer = present.get_buffer(None, None).unwrap();
    assert_eq!(buffer.source_rect, Rect::new(100, 100, 740, 580));

    let after = s.server.live_regions();
    assert_eq!(after.len(), 1);
    assert_ne!(before, after);
    assert_eq!(
        s.server.region_rects(after[0]),
        Some(vec![rect(100, 100, 640, 480)])
    );
}

#[rstest]
#[case::whole_window(None, rect(10, 20, 800, 600))]
#[case::inside(Some(Rect::new(0, 0, 100, 50)), rect(10, 20, 100, 50))]
#[case::clamped_right_and_bottom(Some(Rect::new(700, 500, 300, 300)), rect(710, 520, 100, 100))]
#[case::past_the_edge(Some(Rect::new(900, 700, 10, 10)), rect(810, 620, 0, 0))]
fn destination_is_clamped_to_the_window(#[case] dest: Option<Rect>, #[case] expected: Rectangle) {
    let s = setup(FakeServer::new(), Rect::new(10, 20, 810, 620));
    let present = backend(&s);
    present.get_buffer(None, dest).unwrap();
    present.present(PresentFlags::empty()).unwrap();

    let region = s.server.copies()[0].region;
    assert_eq!(s.server.region_rects(region), Some(vec![expected]));
}

#[test]
fn no_back_buffer_is_a_driver_error() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    s.server.set_buffer_count(Some(0));
    let present = backend(&s);

    let err = present.get_buffer(None, None).unwrap_err();
    assert_eq!(err.code(), ResultCode::DriverInternalError);

    let err = present.present(PresentFlags::empty()).unwrap_err();
    assert!(matches!(err, PresentError::DriverInternal(_)));
    assert!(s.server.copies().is_empty());
    assert_eq!(s.server.unread_bytes(), 0);

    s.server.set_buffer_count(None);
    present.get_buffer(None, None).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.copies().len(), 1);
}

#[test]
fn override_window_takes_priority() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    let other = s
        .windows
        .add_window(Drawable(0x0070_0001), Rect::from_size(320, 200));
    let present = backend(&s);

    present.get_buffer(Some(other), None).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.copies()[0].drawable, Drawable(0x0070_0001));

    present.get_buffer(None, None).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.copies()[1].drawable, DRAWABLE);
}

#[test]
fn destroyed_window_gets_a_fresh_drawable() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    let present = backend(&s);
    present.get_buffer(None, None).unwrap();

    s.context.cache().destroy(s.window).unwrap();
    assert!(s.server.live_drawables().is_empty());
    assert!(s.server.live_regions().is_empty());
    assert_eq!(s.windows.outstanding_dcs(), 0);

    present.get_buffer(None, None).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.live_drawables(), vec![DRAWABLE]);
    assert_eq!(s.server.drawables_created(), 2);
}

#[derive(Debug, Default)]
struct NullFactory;

impl AdapterFactory for NullFactory {
    type Adapter = DrmDevice;

    fn major_version(&self) -> u32 {
        0
    }

    fn minor_version(&self) -> u32 {
        0
    }

    fn create_adapter(&self, device: DrmDevice) -> Result<DrmDevice, PresentError> {
        Ok(device)
    }
}

#[test]
fn group_failure_releases_earlier_heads() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    let loader = DriverLoader::new(Arc::clone(&s.context), NullFactory);
    let driver = loader.get(DRIVER_VERSION).unwrap();

    let params = vec![
        PresentationParameters {
            device_window: Some(s.window),
            ..Default::default()
        },
        PresentationParameters {
            device_window: Some(s.window),
            ..Default::default()
        },
        PresentationParameters::default(),
    ];
    let err = driver
        .create_present_group("", 0, None, &params)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidCall);
    assert_eq!(s.context.live_backends(), 0);
}

#[test]
fn driver_presents_through_a_group() {
    let s = setup(FakeServer::new(), Rect::from_size(640, 480));
    s.windows.add_display_device("\\\\.\\DISPLAY1", None);
    let loader = DriverLoader::new(Arc::clone(&s.context), NullFactory);
    let driver = loader.get(DRIVER_VERSION).unwrap();

    let group = driver
        .create_present_group(
            "\\\\.\\DISPLAY",
            0,
            Some(s.window),
            &[PresentationParameters::default()],
        )
        .unwrap();
    assert_eq!(group.head_count(), 1);

    let head = group.get_present(0).unwrap();
    let buffer = head.get_buffer(None, None).unwrap();
    assert_eq!((buffer.width, buffer.height), (640, 480));
    head.present(PresentFlags::empty()).unwrap();

    let copy = s.server.copies()[0];
    assert_eq!(copy.drawable, DRAWABLE);
    assert_eq!(copy.dest, Attachment::FrontLeft.raw());
    assert_eq!(copy.src, Attachment::BackLeft.raw());

    drop(head);
    drop(group);
    assert_eq!(s.context.live_backends(), 0);
}

#[test]
fn failed_connect_leaves_the_connection_usable() {
    let s = setup(
        FakeServer::builder().driver("", "").build(),
        Rect::from_size(640, 480),
    );
    let loader = DriverLoader::new(Arc::clone(&s.context), NullFactory);
    let driver = loader.get(DRIVER_VERSION).unwrap();

    let dc = s.windows.acquire_dc(s.window).unwrap();
    let err = driver.create_adapter(dc).unwrap_err();
    assert_eq!(err.code(), ResultCode::DriverInternalError);
    assert_eq!(s.server.unread_bytes(), 0);

    let present = backend(&s);
    present.get_buffer(None, None).unwrap();
    present.present(PresentFlags::empty()).unwrap();
    assert_eq!(s.server.copies().len(), 1);
}

#[test]
fn driver_is_unavailable_without_dri2() {
    let s = setup(
        FakeServer::builder().without_dri2().build(),
        Rect::from_size(640, 480),
    );
    let loader = DriverLoader::new(Arc::clone(&s.context), NullFactory);
    assert!(loader.get(DRIVER_VERSION).is_none());
    assert!(loader.get(DRIVER_VERSION + 1).is_none());
}

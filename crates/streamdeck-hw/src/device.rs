//! Stream Deck session: drawing, control commands and key events over a transport.

use hidapi::{HidApi, HidDevice};
use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::buttons::check_button;
use crate::icon::{load_icon, solid_rgb};
use crate::input::{
    ButtonReport, ButtonStates, ButtonTracker, EventDispatcher, EventKind, ListenerOptions,
    Listeners, SubscriptionId,
};
use crate::page::{EncodedPage, PageEncoder, PixelFormat, DEFAULT_CACHE_CAPACITY};
use crate::protocol::{build_brightness_report, build_reset_report, INPUT_REPORT_LENGTH};
use crate::{Error, Result, PRODUCT_ID, VENDOR_ID};

/// Longest single read in [`StreamDeck::poll`] before the transport is released.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Raw report I/O with the device.
pub trait Transport {
    /// Writes one output report.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Sends one feature report.
    fn send_feature_report(&self, data: &[u8]) -> Result<()>;

    /// Reads one input report. A negative timeout blocks; zero bytes means timeout.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

impl Transport for HidDevice {
    fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(HidDevice::write(self, data)?)
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<()> {
        Ok(HidDevice::send_feature_report(self, data)?)
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        Ok(HidDevice::read_timeout(self, buf, timeout_ms)?)
    }
}

/// State guarded together: encoder and page cache, key tracker, decoded files.
#[derive(Debug)]
struct Session {
    encoder: PageEncoder,
    tracker: ButtonTracker,
    icons: HashMap<PathBuf, Arc<[u8]>>,
}

/// A connected 15-key Stream Deck.
///
/// Methods take `&self`; the session can be shared behind an `Arc`. Event
/// handlers run with no lock held, so a handler may draw on the same deck or
/// change its listeners. Handlers must not call [`poll`](Self::poll) or
/// [`handle_report`](Self::handle_report) themselves.
pub struct StreamDeck<D = HidDevice> {
    device: Mutex<D>,
    /// Writers queued for the transport; a polling reader steps aside for them.
    writers_waiting: AtomicUsize,
    path: Option<String>,
    session: Mutex<Session>,
    events: Mutex<EventDispatcher>,
    /// Held while a report is decoded and delivered, so listeners see reports in order.
    delivery: Mutex<()>,
}

impl StreamDeck<HidDevice> {
    /// Opens the first Stream Deck found.
    pub fn open() -> Result<Self> {
        let api = HidApi::new()?;

        let device_info = api
            .device_list()
            .find(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID)
            .ok_or(Error::DeviceNotFound)?;

        let path = device_info.path().to_string_lossy().into_owned();
        let device = device_info.open_device(&api).map_err(|e| {
            debug!("Failed to open device: {}", e);
            Error::DeviceNotFound
        })?;

        info!(
            "Stream Deck opened (VID:{:04X} PID:{:04X}, path={})",
            VENDOR_ID, PRODUCT_ID, path
        );

        Ok(Self::from_parts(device, Some(path), DEFAULT_CACHE_CAPACITY))
    }

    /// Opens a Stream Deck by HID path.
    pub fn open_path(api: &HidApi, path: &str) -> Result<Self> {
        let c_path = CString::new(path).map_err(|_| Error::DeviceNotFound)?;
        let device = api
            .open_path(c_path.as_c_str())
            .map_err(|_| Error::DeviceNotFound)?;

        info!("Stream Deck opened at path: {}", path);

        Ok(Self::from_parts(
            device,
            Some(path.to_string()),
            DEFAULT_CACHE_CAPACITY,
        ))
    }
}

impl<D: Transport> StreamDeck<D> {
    /// Wraps an already open transport.
    pub fn new(device: D) -> Self {
        Self::from_parts(device, None, DEFAULT_CACHE_CAPACITY)
    }

    /// Wraps a transport, keeping at most `capacity` encoded images cached.
    pub fn with_cache_capacity(device: D, capacity: usize) -> Self {
        Self::from_parts(device, None, capacity)
    }

    fn from_parts(device: D, path: Option<String>, capacity: usize) -> Self {
        Self {
            device: Mutex::new(device),
            writers_waiting: AtomicUsize::new(0),
            path,
            session: Mutex::new(Session {
                encoder: PageEncoder::with_cache_capacity(capacity),
                tracker: ButtonTracker::new(),
                icons: HashMap::new(),
            }),
            events: Mutex::new(EventDispatcher::new()),
            delivery: Mutex::new(()),
        }
    }

    /// HID path the device was opened from, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Clears every key and shows the logo.
    pub fn reset(&self) -> Result<()> {
        let device = self.lock_device();
        device.send_feature_report(&build_reset_report())?;
        info!("Stream Deck reset");
        Ok(())
    }

    /// Sets backlight brightness, 0-100.
    pub fn set_brightness(&self, brightness: u8) -> Result<()> {
        let report = build_brightness_report(brightness)?;
        let device = self.lock_device();
        device.send_feature_report(&report)?;
        debug!("Brightness set to {}", brightness);
        Ok(())
    }

    /// Fills a key with a 24-bit `0xRRGGBB` color.
    pub fn draw_color(&self, color: u32, button: u8) -> Result<()> {
        self.draw_image_buffer(&solid_rgb(color), button, PixelFormat::Rgb)
    }

    /// Draws an image file on a key and returns the decoded RGBA buffer.
    ///
    /// Decoded files are kept per path, so redrawing skips decoding.
    pub fn draw_image_file<P: AsRef<Path>>(&self, path: P, button: u8) -> Result<Arc<[u8]>> {
        check_button(button)?;
        let path = path.as_ref();

        let cached = self.session.lock().unwrap().icons.get(path).cloned();
        let pixels = match cached {
            Some(pixels) => pixels,
            None => {
                let pixels: Arc<[u8]> = load_icon(path)?.into();
                self.session
                    .lock()
                    .unwrap()
                    .icons
                    .insert(path.to_path_buf(), pixels.clone());
                pixels
            }
        };

        self.draw_image_buffer(&pixels, button, PixelFormat::Rgba)?;
        Ok(pixels)
    }

    /// Draws a 72x72 RGB or RGBA buffer on a key.
    pub fn draw_image_buffer(&self, pixels: &[u8], button: u8, format: PixelFormat) -> Result<()> {
        let page = self
            .session
            .lock()
            .unwrap()
            .encoder
            .encode(pixels, button, format)?;
        self.write_page(&page)?;
        debug!("Drew button {} (raw key {})", button, page.raw_key());
        Ok(())
    }

    fn write_page(&self, page: &EncodedPage) -> Result<()> {
        let device = self.lock_device();
        device.write(page.page1())?;
        device.write(page.page2())?;
        Ok(())
    }

    /// Locks the transport for a write, ahead of a polling reader.
    fn lock_device(&self) -> MutexGuard<'_, D> {
        self.writers_waiting.fetch_add(1, Ordering::AcqRel);
        let device = self.device.lock().unwrap();
        self.writers_waiting.fetch_sub(1, Ordering::AcqRel);
        device
    }

    /// Replaces the page cache with an empty one holding at most `capacity` images.
    pub fn set_cache_capacity(&self, capacity: usize) {
        self.session.lock().unwrap().encoder = PageEncoder::with_cache_capacity(capacity);
        debug!("Page cache capacity set to {}", capacity);
    }

    /// Current pressed/released state of every key.
    pub fn button_state(&self) -> ButtonStates {
        self.session.lock().unwrap().tracker.state()
    }

    /// Number of encoded images currently cached.
    pub fn cached_pages(&self) -> usize {
        self.session.lock().unwrap().encoder.cache().len()
    }

    /// Decodes one inbound report and notifies listeners.
    ///
    /// Reports other than key state reports are ignored and yield `None`.
    pub fn handle_report(&self, report: &[u8]) -> Result<Option<ButtonReport>> {
        let _delivery = self.delivery.lock().unwrap();
        let decoded = self.session.lock().unwrap().tracker.process(report)?;
        if let Some(decoded) = &decoded {
            self.deliver(|listeners| listeners.dispatch(Instant::now(), decoded));
        }
        Ok(decoded)
    }

    /// Runs listeners detached from the registry, so they may (un)subscribe.
    fn deliver<F: FnOnce(&mut Listeners)>(&self, f: F) {
        let mut listeners = self.events.lock().unwrap().detach();
        f(&mut listeners);
        self.events.lock().unwrap().reattach(listeners);
    }

    /// Waits up to `timeout` (forever if `None`) for one report and handles it.
    ///
    /// The wait is shortened so pending trailing throttle calls fire on time.
    /// The transport is released between short reads, so other threads can
    /// draw while this one waits. Returns true if a report was read.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<bool> {
        let started = Instant::now();
        let mut buf = [0u8; INPUT_REPORT_LENGTH];

        let read = loop {
            let now = Instant::now();
            let left = timeout.map(|t| t.saturating_sub(now - started));
            let remaining = match (left, self.events.lock().unwrap().next_deadline()) {
                (Some(l), Some(d)) => Some(l.min(d.saturating_duration_since(now))),
                (None, Some(d)) => Some(d.saturating_duration_since(now)),
                (l, None) => l,
            };
            let slice = remaining.map_or(READ_SLICE, |r| r.min(READ_SLICE));

            while self.writers_waiting.load(Ordering::Acquire) > 0 {
                std::thread::yield_now();
            }
            let read = {
                let device = self.device.lock().unwrap();
                device.read_timeout(&mut buf, slice.as_micros().div_ceil(1000) as i32)?
            };
            if read > 0 || remaining.is_some_and(|r| r <= slice) {
                break read;
            }
        };

        if read > 0 {
            self.handle_report(&buf[..read])?;
        }
        let _delivery = self.delivery.lock().unwrap();
        self.deliver(|listeners| listeners.flush_due(Instant::now()));
        Ok(read > 0)
    }

    /// Subscribes to key presses on any button.
    pub fn on_pressed<F>(&self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(u8) + Send + 'static,
    {
        self.events.lock().unwrap().on_pressed(options, handler)
    }

    /// Subscribes to key releases on any button.
    pub fn on_released<F>(&self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(u8) + Send + 'static,
    {
        self.events.lock().unwrap().on_released(options, handler)
    }

    /// Subscribes to presses of one button.
    pub fn on_button_pressed<F>(
        &self,
        button: u8,
        options: ListenerOptions,
        handler: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut() + Send + 'static,
    {
        self.events
            .lock()
            .unwrap()
            .on_button_pressed(button, options, handler)
    }

    /// Subscribes to releases of one button.
    pub fn on_button_released<F>(
        &self,
        button: u8,
        options: ListenerOptions,
        handler: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut() + Send + 'static,
    {
        self.events
            .lock()
            .unwrap()
            .on_button_released(button, options, handler)
    }

    /// Subscribes to the full key state after every key report.
    pub fn on_state<F>(&self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(ButtonStates) + Send + 'static,
    {
        self.events.lock().unwrap().on_state(options, handler)
    }

    /// Removes one listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.lock().unwrap().unsubscribe(id)
    }

    /// Removes every listener, e.g. when switching pages of buttons.
    pub fn remove_button_listeners(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Number of listeners for an event kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().listener_count(kind)
    }
}

impl<D> std::fmt::Debug for StreamDeck<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDeck")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::button_to_raw;
    use crate::protocol::{BUTTON_STATE_REPORT_ID, KEY_INDEX_OFFSET, REPORT_LENGTH};
    use crate::ICON_SIZE;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    /// In-memory transport recording everything sent to it.
    #[derive(Default)]
    struct MockTransport {
        writes: Mutex<Vec<Vec<u8>>>,
        features: Mutex<Vec<Vec<u8>>>,
        inbound: Mutex<VecDeque<Vec<u8>>>,
    }

    impl Transport for Arc<MockTransport> {
        fn write(&self, data: &[u8]) -> Result<usize> {
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        }

        fn send_feature_report(&self, data: &[u8]) -> Result<()> {
            self.features.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
            let deadline = u64::try_from(timeout_ms)
                .ok()
                .map(|ms| Instant::now() + Duration::from_millis(ms));
            loop {
                if let Some(report) = self.inbound.lock().unwrap().pop_front() {
                    let len = report.len().min(buf.len());
                    buf[..len].copy_from_slice(&report[..len]);
                    return Ok(len);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Ok(0);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn deck() -> (Arc<MockTransport>, StreamDeck<Arc<MockTransport>>) {
        let transport = Arc::new(MockTransport::default());
        (transport.clone(), StreamDeck::new(transport))
    }

    fn key_report(raw_pressed: &[u8]) -> Vec<u8> {
        let mut report = vec![0u8; INPUT_REPORT_LENGTH];
        report[0] = BUTTON_STATE_REPORT_ID;
        for &raw in raw_pressed {
            report[raw as usize] = 1;
        }
        report
    }

    #[test]
    fn test_reset_and_brightness() {
        let (transport, deck) = deck();
        deck.reset().unwrap();
        deck.set_brightness(100).unwrap();
        deck.set_brightness(0).unwrap();
        assert!(deck.set_brightness(101).is_err());

        let features = transport.features.lock().unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(&features[0][..2], &[0x0B, 0x63]);
        assert_eq!(features[1][5], 100);
        assert_eq!(features[2][5], 0);
    }

    #[test]
    fn test_draw_color_writes_two_pages() {
        let (transport, deck) = deck();
        deck.draw_color(0xFF0000, 1).unwrap();

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), REPORT_LENGTH);
        assert_eq!(writes[0][2], 0x01);
        assert_eq!(writes[1][2], 0x02);
        assert_eq!(writes[0][KEY_INDEX_OFFSET], button_to_raw(1).unwrap());
        assert_eq!(&writes[0][70..73], &[0x00, 0x00, 0xFF]);
    }

    #[test]
    fn test_same_image_on_two_buttons() {
        let (transport, deck) = deck();
        deck.draw_color(0x00FF00, 2).unwrap();
        deck.draw_color(0x00FF00, 14).unwrap();
        assert_eq!(deck.cached_pages(), 1);
        deck.draw_color(0x0000FF, 14).unwrap();
        assert_eq!(deck.cached_pages(), 2);

        deck.set_cache_capacity(1);
        assert_eq!(deck.cached_pages(), 0);

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes[0][KEY_INDEX_OFFSET], button_to_raw(2).unwrap());
        assert_eq!(writes[2][KEY_INDEX_OFFSET], button_to_raw(14).unwrap());
        assert_eq!(writes[3][KEY_INDEX_OFFSET], button_to_raw(14).unwrap());
    }

    #[test]
    fn test_draw_rejects_bad_input() {
        let (transport, deck) = deck();
        assert!(matches!(
            deck.draw_image_buffer(&[0; 10], 1, PixelFormat::Rgb),
            Err(Error::Format { .. })
        ));
        assert!(matches!(
            deck.draw_color(0, 16),
            Err(Error::InvalidIndex(16))
        ));
        assert!(transport.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_draw_image_file_caches_decoded_pixels() {
        let path =
            std::env::temp_dir().join(format!("streamdeck-hw-deck-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(72, 72, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();

        let (transport, deck) = deck();
        let first = deck.draw_image_file(&path, 3).unwrap();
        std::fs::remove_file(&path).ok();

        // Served from the per-path cache once the file is gone
        let second = deck.draw_image_file(&path, 4).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), ICON_SIZE * ICON_SIZE * 4);
        assert_eq!(transport.writes.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_key_events_through_poll() {
        let (transport, deck) = deck();
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        deck.on_pressed(ListenerOptions::unthrottled(), move |b| {
            sink.lock().unwrap().push(format!("down:{}", b))
        });
        let sink = log.clone();
        deck.on_released(ListenerOptions::unthrottled(), move |b| {
            sink.lock().unwrap().push(format!("up:{}", b))
        });
        let sink = log.clone();
        deck.on_state(ListenerOptions::unthrottled(), move |_| {
            sink.lock().unwrap().push("state".to_string())
        });

        let raw = button_to_raw(7).unwrap();
        {
            let mut inbound = transport.inbound.lock().unwrap();
            inbound.push_back(key_report(&[]));
            inbound.push_back(key_report(&[raw]));
            inbound.push_back(key_report(&[]));
        }

        while deck.poll(Some(Duration::ZERO)).unwrap() {}

        assert_eq!(
            *log.lock().unwrap(),
            vec!["state", "down:7", "state", "up:7", "state"]
        );
        assert_eq!(deck.button_state(), ButtonStates::default());
    }

    #[test]
    fn test_handler_can_draw() {
        let transport = Arc::new(MockTransport::default());
        let deck = Arc::new(StreamDeck::new(transport.clone()));

        let handle = deck.clone();
        deck.on_pressed(ListenerOptions::default(), move |b| {
            handle.draw_color(0xFFFFFF, b).unwrap();
        });

        deck.handle_report(&key_report(&[1])).unwrap();
        assert_eq!(transport.writes.lock().unwrap().len(), 2);
        assert!(deck.button_state().is_pressed(5).unwrap());
    }

    #[test]
    fn test_handler_can_change_listeners() {
        let transport = Arc::new(MockTransport::default());
        let deck = Arc::new(StreamDeck::new(transport));
        let next_page = Arc::new(Mutex::new(0));

        let handle = deck.clone();
        let hits = next_page.clone();
        deck.on_pressed(ListenerOptions::unthrottled(), move |_| {
            handle.remove_button_listeners();
            let hits = hits.clone();
            handle.on_pressed(ListenerOptions::unthrottled(), move |_| {
                *hits.lock().unwrap() += 1
            });
        });

        let (done, finished) = mpsc::channel();
        let worker = deck.clone();
        std::thread::spawn(move || {
            worker.handle_report(&key_report(&[1])).unwrap();
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(3))
            .expect("handle_report did not return");

        // The replacement listener only sees later reports
        assert_eq!(deck.listener_count(EventKind::Pressed), 1);
        assert_eq!(*next_page.lock().unwrap(), 0);

        deck.handle_report(&key_report(&[])).unwrap();
        deck.handle_report(&key_report(&[2])).unwrap();
        assert_eq!(*next_page.lock().unwrap(), 1);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself() {
        let transport = Arc::new(MockTransport::default());
        let deck = Arc::new(StreamDeck::new(transport));
        let calls = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let handle = deck.clone();
        let sink = calls.clone();
        let slot = own_id.clone();
        let id = deck.on_pressed(ListenerOptions::unthrottled(), move |_| {
            *sink.lock().unwrap() += 1;
            if let Some(id) = slot.lock().unwrap().take() {
                assert!(handle.unsubscribe(id));
            }
        });
        *own_id.lock().unwrap() = Some(id);

        deck.handle_report(&key_report(&[1])).unwrap();
        deck.handle_report(&key_report(&[])).unwrap();
        deck.handle_report(&key_report(&[1])).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(deck.listener_count(EventKind::Pressed), 0);
    }

    #[test]
    fn test_draw_while_polling() {
        let transport = Arc::new(MockTransport::default());
        let deck = Arc::new(StreamDeck::new(transport.clone()));

        let reader = deck.clone();
        let polling = std::thread::spawn(move || reader.poll(None));
        std::thread::sleep(Duration::from_millis(20));

        let (done, finished) = mpsc::channel();
        let drawer = deck.clone();
        std::thread::spawn(move || {
            drawer.draw_color(0x123456, 1).unwrap();
            drawer.set_brightness(50).unwrap();
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(3))
            .expect("draw blocked by a waiting poll");
        assert_eq!(transport.writes.lock().unwrap().len(), 2);

        transport
            .inbound
            .lock()
            .unwrap()
            .push_back(key_report(&[3]));
        assert!(polling.join().unwrap().unwrap());
        assert!(deck.button_state().is_pressed(3).unwrap());
    }

    #[test]
    fn test_poll_times_out() {
        let (_transport, deck) = deck();
        let started = Instant::now();
        assert!(!deck.poll(Some(Duration::from_millis(120))).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_other_reports_are_ignored() {
        let (_transport, deck) = deck();
        let mut report = key_report(&[1]);
        report[0] = 0x03;
        assert!(deck.handle_report(&report).unwrap().is_none());
        assert_eq!(deck.button_state(), ButtonStates::default());
    }

    #[test]
    fn test_listener_management() {
        let (_transport, deck) = deck();
        let id = deck.on_pressed(ListenerOptions::default(), |_| {});
        deck.on_button_released(3, ListenerOptions::default(), || {})
            .unwrap();
        assert_eq!(deck.listener_count(EventKind::Pressed), 1);
        assert!(deck.unsubscribe(id));
        deck.remove_button_listeners();
        assert_eq!(deck.listener_count(EventKind::Released), 0);
    }

    // Hardware tests are skipped by default
    #[test]
    #[ignore]
    fn test_device_open() {
        let device = StreamDeck::open();
        assert!(device.is_ok());
    }
}

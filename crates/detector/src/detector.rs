//! Public detector handle
//!
//! [`UsbDetector`] owns the monitor thread lifecycle, answers device queries
//! and hands out event subscriptions. Handles are cheap to clone; monitoring
//! stops when the last clone is dropped.

use crate::config::DetectorConfig;
use crate::registry::check_filter;
use crate::source::SourceFactory;
use crate::usb::libusb_factory;
use crate::worker::spawn_monitor_worker;
use common::{Error, MonitorBridge, MonitorCommand, Result, create_monitor_bridge};
use descriptor::{DeviceEvent, DeviceFilter, EventFilter, EventKind, UsbDeviceDescriptor};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, oneshot};
use tokio::task;
use tracing::{debug, error, info, warn};

/// Running monitor thread and the bridge used to reach it
struct MonitorState {
    bridge: MonitorBridge,
    handle: JoinHandle<()>,
}

struct Inner {
    config: DetectorConfig,
    factory: SourceFactory,
    events: broadcast::Sender<DeviceEvent>,
    monitor: Mutex<Option<MonitorState>>,
}

impl Inner {
    fn monitor(&self) -> MutexGuard<'_, Option<MonitorState>> {
        // State stays consistent even if a holder panicked
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_monitor(&self) -> Option<MonitorState> {
        self.monitor().take()
    }

    fn stop(&self) {
        if let Some(state) = self.take_monitor() {
            state.shutdown();
        }
    }
}

impl MonitorState {
    /// Ask the monitor thread to exit and wait for it
    fn shutdown(self) {
        info!("Stopping USB monitoring...");
        if let Err(e) = self.bridge.send_command_blocking(MonitorCommand::Shutdown) {
            // Thread already gone; joining below reaps it
            debug!("Shutdown not delivered: {}", e);
        }
        drop(self.bridge);

        if let Err(e) = self.handle.join() {
            error!("USB monitor thread panicked: {:?}", e);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(state) = self.take_monitor() else {
            return;
        };

        // The thread may be mid-wait (poll interval plus mount settle); keep
        // async workers free while it winds down
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || state.shutdown());
            }
            Err(_) => state.shutdown(),
        }
    }
}

/// USB device detector
///
/// Dropping the last handle stops monitoring. Inside a Tokio runtime the
/// monitor thread is joined on the blocking pool, so the drop itself does
/// not wait; event streams end once the thread has exited.
///
/// ```no_run
/// use usb_detection::{DetectorConfig, EventFilter, EventKind, UsbDetector};
///
/// # async fn demo() -> usb_detection::Result<()> {
/// let detector = UsbDetector::new(DetectorConfig::default());
/// detector.start_monitoring()?;
///
/// let mut added = detector.subscribe(EventFilter::new(EventKind::Add));
/// while let Some(event) = added.next().await {
///     println!("{} {}", event.kind, event.device.device_name);
/// }
///
/// detector.stop_monitoring();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UsbDetector {
    inner: Arc<Inner>,
}

impl UsbDetector {
    /// Create a detector backed by libusb
    pub fn new(config: DetectorConfig) -> Self {
        let factory = libusb_factory(config.clone());
        Self::with_source_factory(config, factory)
    }

    /// Create a detector that takes its devices from `factory`
    pub fn with_source_factory(config: DetectorConfig, factory: SourceFactory) -> Self {
        let (events, _) = broadcast::channel(config.detector.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                events,
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    /// Start the monitor thread
    ///
    /// Returns once the initial device list has been recorded. Calling this
    /// while monitoring is a no-op.
    pub fn start_monitoring(&self) -> Result<()> {
        let mut monitor = self.inner.monitor();

        if let Some(state) = monitor.as_ref() {
            if !state.handle.is_finished() {
                debug!("USB monitoring already running");
                return Ok(());
            }
            warn!("USB monitor thread exited unexpectedly, restarting");
            if let Some(stale) = monitor.take()
                && let Err(e) = stale.handle.join()
            {
                error!("USB monitor thread panicked: {:?}", e);
            }
        }

        info!("Starting USB monitoring...");
        let (bridge, worker) = create_monitor_bridge();
        let handle = spawn_monitor_worker(
            self.inner.factory.clone(),
            worker,
            self.inner.events.clone(),
            self.inner.config.usb.filters.clone(),
            self.inner.config.poll_interval(),
        )?;

        *monitor = Some(MonitorState { bridge, handle });
        Ok(())
    }

    /// Stop the monitor thread and wait for it to exit
    ///
    /// Blocks for up to one poll interval, longer if a mass storage arrival
    /// is waiting out the mount settle delay. Calling this while not
    /// monitoring is a no-op.
    pub fn stop_monitoring(&self) {
        self.inner.stop();
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor()
            .as_ref()
            .is_some_and(|state| !state.handle.is_finished())
    }

    fn bridge(&self) -> Option<MonitorBridge> {
        self.inner.monitor().as_ref().map(|state| state.bridge.clone())
    }

    /// List attached devices matching `filter`
    ///
    /// Served from the monitor's registry while monitoring, otherwise from a
    /// one-shot enumeration on the blocking pool.
    pub async fn find(&self, filter: DeviceFilter) -> Result<Vec<UsbDeviceDescriptor>> {
        if let Some(bridge) = self.bridge() {
            let (tx, rx) = oneshot::channel();
            bridge
                .send_command(MonitorCommand::Find {
                    filter,
                    response: tx,
                })
                .await?;
            return rx
                .await
                .map_err(|e| Error::Channel(format!("Device monitor did not answer: {}", e)));
        }

        let factory = self.inner.factory.clone();
        let allowed = self.inner.config.usb.filters.clone();
        task::spawn_blocking(move || enumerate(&factory, &allowed, &filter))
            .await
            .map_err(|e| Error::Runtime(format!("Enumeration task failed: {}", e)))?
    }

    /// Blocking form of [`find`](Self::find)
    ///
    /// Must not be called from inside an async task.
    pub fn find_blocking(&self, filter: DeviceFilter) -> Result<Vec<UsbDeviceDescriptor>> {
        if let Some(bridge) = self.bridge() {
            let (tx, rx) = oneshot::channel();
            bridge.send_command_blocking(MonitorCommand::Find {
                filter,
                response: tx,
            })?;
            return rx
                .blocking_recv()
                .map_err(|e| Error::Channel(format!("Device monitor did not answer: {}", e)));
        }

        enumerate(&self.inner.factory, &self.inner.config.usb.filters, &filter)
    }

    /// Callback form of [`find`](Self::find), run on a spawned task
    pub fn find_with<F>(&self, filter: DeviceFilter, callback: F) -> Result<task::JoinHandle<()>>
    where
        F: FnOnce(Result<Vec<UsbDeviceDescriptor>>) + Send + 'static,
    {
        let runtime = current_runtime()?;
        let detector = self.clone();
        Ok(runtime.spawn(async move {
            callback(detector.find(filter).await);
        }))
    }

    /// Subscribe to events matching `filter`
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.inner.events.subscribe(),
            kind: Some(filter.kind),
            device: filter.device,
        }
    }

    /// Subscribe to events of every kind for devices matching `device`
    ///
    /// Events arrive in the order they were emitted.
    pub fn subscribe_all(&self, device: DeviceFilter) -> EventStream {
        EventStream {
            rx: self.inner.events.subscribe(),
            kind: None,
            device,
        }
    }

    /// Wait for the next device matching `filter`
    ///
    /// Waits indefinitely; combine with `tokio::time::timeout` to bound it.
    pub async fn once(&self, filter: EventFilter) -> Option<UsbDeviceDescriptor> {
        self.subscribe(filter).next().await.map(|event| event.device)
    }

    /// Call `listener` for every event matching `filter`
    ///
    /// The listener runs on a task of the current Tokio runtime until
    /// [`ListenerHandle::remove`] is called or the detector is dropped.
    pub fn on<F>(&self, filter: EventFilter, mut listener: F) -> Result<ListenerHandle>
    where
        F: FnMut(&UsbDeviceDescriptor) + Send + 'static,
    {
        let runtime = current_runtime()?;
        let mut stream = self.subscribe(filter);
        debug!("Registering listener for {}", filter);

        let task = runtime.spawn(async move {
            while let Some(event) = stream.next().await {
                listener(&event.device);
            }
        });

        Ok(ListenerHandle { filter, task })
    }
}

fn current_runtime() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| Error::Runtime(format!("No Tokio runtime available: {}", e)))
}

/// One-shot enumeration through a fresh source
fn enumerate(
    factory: &SourceFactory,
    allowed: &[String],
    filter: &DeviceFilter,
) -> Result<Vec<UsbDeviceDescriptor>> {
    let mut source = factory()?;
    let mut devices: Vec<UsbDeviceDescriptor> = source
        .snapshot()?
        .into_iter()
        .map(|device| device.descriptor)
        .filter(|d| check_filter(d.vendor_id, d.product_id, allowed) && filter.matches(d))
        .collect();
    devices.sort_by_key(|d| (d.location_id, d.device_address));
    debug!("One-shot enumeration found {} devices", devices.len());
    Ok(devices)
}

/// Stream of events matching a filter
pub struct EventStream {
    rx: broadcast::Receiver<DeviceEvent>,
    /// `None` accepts every kind
    kind: Option<EventKind>,
    device: DeviceFilter,
}

impl EventStream {
    /// Next matching event, or `None` once the detector is gone
    pub async fn next(&mut self) -> Option<DeviceEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event subscriber lagged, missed {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &DeviceEvent) -> bool {
        self.kind.is_none_or(|kind| kind == event.kind) && self.device.matches(&event.device)
    }
}

/// Registered listener; see [`UsbDetector::on`]
///
/// Dropping the handle leaves the listener running.
pub struct ListenerHandle {
    filter: EventFilter,
    task: task::JoinHandle<()>,
}

impl ListenerHandle {
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Unregister the listener
    pub fn remove(self) {
        debug!("Removing listener for {}", self.filter);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DeviceSource, SourceChange, SourceDevice};
    use common::test_utils::{create_mock_descriptor, create_mock_key};
    use std::time::Duration;

    struct StaticSource(Vec<SourceDevice>);

    impl DeviceSource for StaticSource {
        fn snapshot(&mut self) -> Result<Vec<SourceDevice>> {
            Ok(self.0.clone())
        }

        fn wait_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>> {
            std::thread::sleep(timeout);
            Ok(Vec::new())
        }
    }

    fn detector_with(devices: Vec<SourceDevice>) -> UsbDetector {
        let mut config = DetectorConfig::default();
        config.detector.poll_interval_ms = 5;
        let factory: SourceFactory = Arc::new(move || {
            Ok(Box::new(StaticSource(devices.clone())) as Box<dyn DeviceSource>)
        });
        UsbDetector::with_source_factory(config, factory)
    }

    fn device(id: u32, vid: u16, pid: u16) -> SourceDevice {
        SourceDevice::new(create_mock_key(id), create_mock_descriptor(id, vid, pid))
    }

    #[test]
    fn test_start_stop_idempotent() {
        let detector = detector_with(vec![]);
        assert!(!detector.is_monitoring());

        detector.stop_monitoring();
        detector.start_monitoring().unwrap();
        detector.start_monitoring().unwrap();
        assert!(detector.is_monitoring());

        detector.stop_monitoring();
        detector.stop_monitoring();
        assert!(!detector.is_monitoring());
    }

    #[test]
    fn test_find_blocking_without_monitoring() {
        let detector = detector_with(vec![device(2, 0x0781, 0x5581), device(1, 0x16c0, 0x0483)]);

        let all = detector.find_blocking(DeviceFilter::any()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].location_id <= all[1].location_id);

        let teensy = detector.find_blocking(DeviceFilter::vendor(0x16c0)).unwrap();
        assert_eq!(teensy.len(), 1);
        assert_eq!(teensy[0].product_id, 0x0483);
    }

    #[test]
    fn test_config_filters_apply_to_enumeration() {
        let devices = vec![device(1, 0x16c0, 0x0483), device(2, 0x0781, 0x5581)];
        let mut config = DetectorConfig::default();
        config.usb.filters = vec!["0x0781:*".to_string()];
        let factory: SourceFactory = Arc::new(move || {
            Ok(Box::new(StaticSource(devices.clone())) as Box<dyn DeviceSource>)
        });
        let detector = UsbDetector::with_source_factory(config, factory);

        let found = detector.find_blocking(DeviceFilter::any()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vendor_id, 0x0781);
    }

    #[test]
    fn test_on_without_runtime_is_an_error() {
        let detector = detector_with(vec![]);
        let result = detector.on(EventFilter::new(EventKind::Add), |_| {});
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_stream_ends_when_detector_dropped() {
        let detector = detector_with(vec![]);
        let mut stream = detector.subscribe(EventFilter::new(EventKind::Change));
        drop(detector);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_in_runtime_does_not_wait_for_monitor() {
        let mut config = DetectorConfig::default();
        config.detector.poll_interval_ms = 500;
        let factory: SourceFactory =
            Arc::new(|| Ok(Box::new(StaticSource(Vec::new())) as Box<dyn DeviceSource>));
        let detector = UsbDetector::with_source_factory(config, factory);
        detector.start_monitoring().unwrap();

        let mut stream = detector.subscribe_all(DeviceFilter::any());
        let started = std::time::Instant::now();
        drop(detector);
        assert!(started.elapsed() < Duration::from_millis(250));

        // The stream still ends once the monitor thread is reaped
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        assert!(matches!(next, Ok(None)));
    }

    #[test]
    fn test_stream_matching() {
        let detector = detector_with(vec![]);
        let add = DeviceEvent::new(EventKind::Add, create_mock_descriptor(1, 0x16c0, 0x0483));
        let remove = DeviceEvent::new(EventKind::Remove, create_mock_descriptor(1, 0x16c0, 0x0483));

        let adds = detector.subscribe(EventFilter::new(EventKind::Add));
        assert!(adds.matches(&add));
        assert!(!adds.matches(&remove));

        let all = detector.subscribe_all(DeviceFilter::vendor(0x16c0));
        assert!(all.matches(&add));
        assert!(all.matches(&remove));

        let other = detector.subscribe_all(DeviceFilter::vendor(0x0781));
        assert!(!other.matches(&add));
    }
}

//! Monitor worker thread
//!
//! Dedicated thread that owns the device source and registry while
//! monitoring is active. It answers commands from callers through the
//! monitor bridge and broadcasts hot-plug events.
//!
//! The source may block (libusb event handling, polling sleeps), so it never
//! runs on the Tokio runtime.

use crate::registry::DeviceRegistry;
use crate::source::{DeviceSource, SourceChange, SourceFactory};
use common::{Error, MonitorCommand, MonitorWorker, Result};
use descriptor::DeviceEvent;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Back-off after a failed wait on the source
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Monitor worker thread
///
/// Processes commands from callers and turns source changes into events.
pub struct MonitorWorkerThread {
    source: Box<dyn DeviceSource>,
    registry: DeviceRegistry,
    worker: MonitorWorker,
    events: broadcast::Sender<DeviceEvent>,
    poll_interval: Duration,
}

impl MonitorWorkerThread {
    /// Create the worker and record the devices already attached
    pub fn new(
        mut source: Box<dyn DeviceSource>,
        worker: MonitorWorker,
        events: broadcast::Sender<DeviceEvent>,
        allowed_filters: Vec<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut registry = DeviceRegistry::new(allowed_filters);
        registry.seed(source.snapshot()?);

        info!(
            "Device monitor initialized with {} devices",
            registry.len()
        );

        Ok(Self {
            source,
            registry,
            worker,
            events,
            poll_interval,
        })
    }

    /// Run the monitor loop
    ///
    /// Each iteration:
    /// 1. Drains pending commands (non-blocking)
    /// 2. Waits up to the poll interval for source changes
    /// 3. Broadcasts the resulting events in order
    ///
    /// The loop ends on `Shutdown` or once every bridge handle is gone.
    pub fn run(mut self) {
        info!("Device monitor thread started");

        'monitor: loop {
            while let Some(cmd) = self.worker.try_recv_command() {
                match cmd {
                    MonitorCommand::Find { filter, response } => {
                        let devices = self.registry.list(&filter);
                        debug!("Listing {} devices", devices.len());
                        let _ = response.send(devices);
                    }
                    MonitorCommand::Shutdown => {
                        info!("Device monitor shutting down");
                        break 'monitor;
                    }
                }
            }

            if self.worker.is_orphaned() {
                info!("All detector handles dropped, stopping monitor");
                break;
            }

            match self.source.wait_changes(self.poll_interval) {
                Ok(changes) => self.apply(changes),
                Err(e) => {
                    warn!("Error waiting for device changes: {}", e);
                    // Transient libusb failures clear up on retry
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        info!("Device monitor thread stopped");
    }

    /// Feed source changes through the registry and broadcast the events
    fn apply(&mut self, changes: Vec<SourceChange>) {
        for change in changes {
            let events = match change {
                SourceChange::Arrived(device) => self.registry.arrived(device),
                SourceChange::Left { key, fallback } => self.registry.left(key, fallback),
            };

            for event in events {
                debug!(
                    "Emitting {} for {:04x}:{:04x}",
                    event.kind, event.device.vendor_id, event.device.product_id
                );
                if self.events.send(event).is_err() {
                    debug!("No event subscribers");
                }
            }
        }
    }
}

/// Spawn the monitor thread
///
/// The source is created on the new thread. This call blocks until the
/// source has been created and the initial device list recorded, and returns
/// the error if either failed.
pub fn spawn_monitor_worker(
    factory: SourceFactory,
    worker: MonitorWorker,
    events: broadcast::Sender<DeviceEvent>,
    allowed_filters: Vec<String>,
    poll_interval: Duration,
) -> Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

    let handle = std::thread::Builder::new()
        .name("usb-monitor".to_string())
        .spawn(move || {
            let init = factory().and_then(|source| {
                MonitorWorkerThread::new(source, worker, events, allowed_filters, poll_interval)
            });

            match init {
                Ok(monitor) => {
                    let _ = ready_tx.send(Ok(()));
                    monitor.run();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::Other(
                "Device monitor thread exited during startup".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceDevice;
    use common::create_monitor_bridge;
    use common::test_utils::{create_mock_descriptor, create_mock_key};
    use descriptor::{DeviceFilter, EventKind};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Source replaying a fixed script of change batches
    struct ScriptedSource {
        initial: Vec<SourceDevice>,
        batches: VecDeque<Vec<SourceChange>>,
    }

    impl DeviceSource for ScriptedSource {
        fn snapshot(&mut self) -> Result<Vec<SourceDevice>> {
            Ok(self.initial.clone())
        }

        fn wait_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>> {
            match self.batches.pop_front() {
                Some(batch) => Ok(batch),
                None => {
                    std::thread::sleep(timeout);
                    Ok(Vec::new())
                }
            }
        }
    }

    struct FailingSource;

    impl DeviceSource for FailingSource {
        fn snapshot(&mut self) -> Result<Vec<SourceDevice>> {
            Err(Error::Usb("Access denied (insufficient permissions)".to_string()))
        }

        fn wait_changes(&mut self, _timeout: Duration) -> Result<Vec<SourceChange>> {
            Ok(Vec::new())
        }
    }

    fn device(id: u32) -> SourceDevice {
        SourceDevice::new(
            create_mock_key(id),
            create_mock_descriptor(id, 0x16c0, 0x0480 + id as u16),
        )
    }

    /// Build and run a monitor on its own thread, as spawn_monitor_worker does
    fn spawn_scripted(
        source: ScriptedSource,
        worker: MonitorWorker,
        events: broadcast::Sender<DeviceEvent>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            MonitorWorkerThread::new(
                Box::new(source),
                worker,
                events,
                vec![],
                Duration::from_millis(5),
            )
            .unwrap()
            .run()
        })
    }

    #[test]
    fn test_worker_seeds_and_answers_find() {
        let (bridge, worker) = create_monitor_bridge();
        let (events, _rx) = broadcast::channel(16);
        let source = ScriptedSource {
            initial: vec![device(1), device(2)],
            batches: VecDeque::new(),
        };
        let handle = spawn_scripted(source, worker, events);

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command_blocking(MonitorCommand::Find {
                filter: DeviceFilter::any(),
                response: tx,
            })
            .unwrap();
        assert_eq!(rx.blocking_recv().unwrap().len(), 2);

        bridge.send_command_blocking(MonitorCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_worker_broadcasts_changes_in_order() {
        let (bridge, worker) = create_monitor_bridge();
        let (events, mut rx) = broadcast::channel(16);
        let source = ScriptedSource {
            initial: vec![],
            batches: VecDeque::from(vec![
                vec![SourceChange::Arrived(device(3))],
                vec![SourceChange::Left {
                    key: create_mock_key(3),
                    fallback: None,
                }],
            ]),
        };
        let handle = spawn_scripted(source, worker, events);

        let kinds: Vec<EventKind> = (0..4).map(|_| rx.blocking_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Add,
                EventKind::Change,
                EventKind::Remove,
                EventKind::Change
            ]
        );

        bridge.send_command_blocking(MonitorCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_find_queued_before_shutdown_is_answered() {
        let (bridge, worker) = create_monitor_bridge();
        let (events, _rx) = broadcast::channel(16);
        let source = ScriptedSource {
            initial: vec![device(1)],
            batches: VecDeque::new(),
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command_blocking(MonitorCommand::Find {
                filter: DeviceFilter::any(),
                response: tx,
            })
            .unwrap();
        bridge.send_command_blocking(MonitorCommand::Shutdown).unwrap();

        let handle = spawn_scripted(source, worker, events);
        handle.join().unwrap();
        assert_eq!(rx.blocking_recv().unwrap().len(), 1);
    }

    #[test]
    fn test_worker_exits_when_bridge_dropped() {
        let (bridge, worker) = create_monitor_bridge();
        let (events, _rx) = broadcast::channel(16);
        let source = ScriptedSource {
            initial: vec![],
            batches: VecDeque::new(),
        };
        let handle = spawn_scripted(source, worker, events);

        drop(bridge);
        handle.join().unwrap();
    }

    #[test]
    fn test_spawn_reports_init_failure() {
        let (_bridge, worker) = create_monitor_bridge();
        let (events, _rx) = broadcast::channel(16);
        let factory: SourceFactory =
            Arc::new(|| Ok(Box::new(FailingSource) as Box<dyn DeviceSource>));

        let result =
            spawn_monitor_worker(factory, worker, events, vec![], Duration::from_millis(5));
        assert!(matches!(result, Err(Error::Usb(_))));
    }
}

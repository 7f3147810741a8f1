//! libusb device source
//!
//! Uses libusb hot-plug callbacks where the platform supports them and falls
//! back to re-enumerating the bus on every poll otherwise.

use crate::config::DetectorConfig;
use crate::source::{DeviceSource, SourceChange, SourceDevice, diff_keys};
use crate::usb::describe::{Describer, is_root_hub};
use common::{Error, Result};
use descriptor::{DeviceKey, UsbDeviceDescriptor};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Raw notification queued by the hot-plug callback
enum HotplugNotice {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

enum Mode {
    Hotplug {
        _registration: Registration<Context>,
        notices: mpsc::Receiver<HotplugNotice>,
        /// Keys handed out by snapshot() or as arrivals and not yet departed
        reported: HashSet<DeviceKey>,
    },
    Polling {
        /// Keys seen by the previous enumeration
        known: HashSet<DeviceKey>,
    },
}

/// Device source backed by a libusb context
pub struct LibusbSource {
    context: Context,
    describer: Describer,
    skip_root_hubs: bool,
    mode: Mode,
}

impl LibusbSource {
    /// Create a libusb context and register for hot-plug notifications
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let context = Context::new().map_err(usb_error)?;

        let mode = if rusb::has_hotplug() {
            let (tx, notices) = mpsc::channel();
            let registration = HotplugBuilder::new()
                .enumerate(false) // snapshot() enumerates
                .register(&context, Box::new(HotplugCallback { tx }))
                .map_err(usb_error)?;
            debug!("Hot-plug callbacks registered");
            Mode::Hotplug {
                _registration: registration,
                notices,
                reported: HashSet::new(),
            }
        } else {
            info!("libusb hotplug api unsupported, polling for device changes");
            Mode::Polling {
                known: HashSet::new(),
            }
        };

        Ok(Self {
            context,
            describer: Describer::from_config(config),
            skip_root_hubs: config.usb.skip_root_hubs,
            mode,
        })
    }

    /// Whether changes come from hot-plug callbacks rather than polling
    pub fn uses_hotplug(&self) -> bool {
        matches!(self.mode, Mode::Hotplug { .. })
    }

    /// Currently attached devices, keyed by (bus, address)
    fn attached(&self) -> Result<HashMap<DeviceKey, Device<Context>>> {
        let devices = self.context.devices().map_err(usb_error)?;

        Ok(devices
            .iter()
            .filter(|device| !self.is_skipped(device))
            .map(|device| (DeviceKey::new(device.bus_number(), device.address()), device))
            .collect())
    }

    fn is_skipped(&self, device: &Device<Context>) -> bool {
        if !self.skip_root_hubs {
            return false;
        }
        match device.device_descriptor() {
            Ok(desc) => is_root_hub(&desc),
            Err(_) => false,
        }
    }

    fn describe_arrival(&self, device: &Device<Context>) -> Option<SourceChange> {
        match self.describer.describe(device, true) {
            Ok(described) => Some(SourceChange::Arrived(described)),
            Err(e) => {
                warn!(
                    "Failed to describe arrived device (bus={}, addr={}): {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                None
            }
        }
    }

    fn poll_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>> {
        std::thread::sleep(timeout);

        let attached = self.attached()?;
        let current: HashSet<DeviceKey> = attached.keys().copied().collect();

        let Mode::Polling { known } = &self.mode else {
            return Ok(Vec::new());
        };
        let (arrived, left) = diff_keys(known, &current);

        let mut changes = Vec::new();
        let mut described = HashSet::new();
        for key in arrived {
            if let Some(change) = attached.get(&key).and_then(|d| self.describe_arrival(d)) {
                described.insert(key);
                changes.push(change);
            }
        }
        for key in &left {
            changes.push(SourceChange::Left {
                key: *key,
                fallback: None,
            });
        }

        if let Mode::Polling { known } = &mut self.mode {
            known.retain(|key| !left.contains(key));
            known.extend(described);
        }

        Ok(changes)
    }

    fn hotplug_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>> {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => return Err(usb_error(e)),
        }

        let Mode::Hotplug { notices, .. } = &self.mode else {
            return Ok(Vec::new());
        };
        let pending: Vec<HotplugNotice> = notices.try_iter().collect();

        let mut changes = Vec::new();
        for notice in pending {
            match notice {
                HotplugNotice::Arrived(device) => {
                    if self.is_skipped(&device) {
                        continue;
                    }
                    if let Some(change) = self.describe_arrival(&device) {
                        if let (Mode::Hotplug { reported, .. }, SourceChange::Arrived(arrived)) =
                            (&mut self.mode, &change)
                        {
                            reported.insert(arrived.key);
                        }
                        changes.push(change);
                    }
                }
                HotplugNotice::Left(device) => {
                    let key = DeviceKey::new(device.bus_number(), device.address());
                    let skipped = self.is_skipped(&device);
                    let describer = &self.describer;
                    let Mode::Hotplug { reported, .. } = &mut self.mode else {
                        continue;
                    };
                    if let Some(change) = departure(key, skipped, reported, || {
                        describer.describe_departed(&device).map(|d| d.descriptor)
                    }) {
                        changes.push(change);
                    }
                }
            }
        }

        Ok(changes)
    }
}

/// Decide what a hot-plug departure reports
///
/// Devices the source never handed out (skipped root hubs, arrivals that
/// could not be described) leave silently, so every `Left` pairs with an
/// earlier snapshot entry or `Arrived`.
fn departure(
    key: DeviceKey,
    skipped: bool,
    reported: &mut HashSet<DeviceKey>,
    fallback: impl FnOnce() -> Option<UsbDeviceDescriptor>,
) -> Option<SourceChange> {
    if skipped || !reported.remove(&key) {
        debug!("Departure of unreported device {}, ignoring", key);
        return None;
    }
    Some(SourceChange::Left {
        key,
        fallback: fallback(),
    })
}

impl DeviceSource for LibusbSource {
    fn snapshot(&mut self) -> Result<Vec<SourceDevice>> {
        let attached = self.attached()?;

        let mut devices = Vec::with_capacity(attached.len());
        for (key, device) in &attached {
            match self.describer.describe(device, false) {
                Ok(described) => devices.push(described),
                Err(e) => warn!("Failed to describe device {} during enumeration: {}", key, e),
            }
        }

        let keys = devices.iter().map(|d| d.key).collect();
        match &mut self.mode {
            Mode::Polling { known } => *known = keys,
            Mode::Hotplug { reported, .. } => *reported = keys,
        }

        devices.sort_by_key(|d| d.key);
        debug!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    fn wait_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>> {
        if self.uses_hotplug() {
            self.hotplug_changes(timeout)
        } else {
            self.poll_changes(timeout)
        }
    }
}

/// Hot-plug callback handler
///
/// libusb forbids synchronous device I/O inside the callback, so devices are
/// only queued here and described after `handle_events` returns.
struct HotplugCallback {
    tx: mpsc::Sender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.tx.send(HotplugNotice::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.tx.send(HotplugNotice::Left(device));
    }
}

pub(crate) fn usb_error(e: rusb::Error) -> Error {
    Error::Usb(e.to_string())
}

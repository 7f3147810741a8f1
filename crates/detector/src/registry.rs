//! Device registry
//!
//! Tracks attached devices for the monitor thread and turns source changes
//! into the `add`/`remove`/`change` events callers see.

use crate::source::SourceDevice;
use descriptor::{DeviceEvent, DeviceFilter, DeviceKey, EventKind, UsbDeviceDescriptor};
use std::collections::HashMap;
use tracing::{debug, info};

/// Registry of attached devices
pub struct DeviceRegistry {
    /// Descriptors recorded at arrival, keyed by (bus, address)
    devices: HashMap<DeviceKey, UsbDeviceDescriptor>,
    /// Device filters (VID:PID patterns) from configuration
    allowed_filters: Vec<String>,
}

impl DeviceRegistry {
    pub fn new(allowed_filters: Vec<String>) -> Self {
        Self {
            devices: HashMap::new(),
            allowed_filters,
        }
    }

    /// Record the initial device list without emitting events
    pub fn seed(&mut self, devices: Vec<SourceDevice>) {
        for device in devices {
            if self.is_allowed(&device.descriptor) {
                self.devices.insert(device.key, device.descriptor);
            }
        }
        debug!("Registry seeded with {} devices", self.devices.len());
    }

    /// Handle a device arrival
    ///
    /// Yields `add` followed by `change`, or nothing if the device is already
    /// tracked or filtered out.
    pub fn arrived(&mut self, device: SourceDevice) -> Vec<DeviceEvent> {
        if !self.is_allowed(&device.descriptor) {
            debug!(
                "Device ignored by filter: {} vid={:#06x}, pid={:#06x}",
                device.key, device.descriptor.vendor_id, device.descriptor.product_id
            );
            return Vec::new();
        }

        if self.devices.contains_key(&device.key) {
            debug!("Duplicate arrival for {}, ignoring", device.key);
            return Vec::new();
        }

        info!(
            "Device added {}: {:04x}:{:04x} {}",
            device.key,
            device.descriptor.vendor_id,
            device.descriptor.product_id,
            device.descriptor.device_name
        );

        self.devices.insert(device.key, device.descriptor.clone());
        Self::pair(EventKind::Add, device.descriptor)
    }

    /// Handle a device departure
    ///
    /// Reports the descriptor recorded at arrival; `fallback` is used only for
    /// devices the registry never saw. Yields `remove` followed by `change`.
    pub fn left(
        &mut self,
        key: DeviceKey,
        fallback: Option<UsbDeviceDescriptor>,
    ) -> Vec<DeviceEvent> {
        let descriptor = match self.devices.remove(&key) {
            Some(descriptor) => descriptor,
            None => match fallback {
                Some(descriptor) if self.is_allowed(&descriptor) => descriptor,
                _ => {
                    debug!("Departure of untracked device {}, ignoring", key);
                    return Vec::new();
                }
            },
        };

        info!(
            "Device removed {}: {:04x}:{:04x} {}",
            key, descriptor.vendor_id, descriptor.product_id, descriptor.device_name
        );

        Self::pair(EventKind::Remove, descriptor)
    }

    /// Tracked devices matching `filter`, ordered by location id
    pub fn list(&self, filter: &DeviceFilter) -> Vec<UsbDeviceDescriptor> {
        let mut devices: Vec<UsbDeviceDescriptor> = self
            .devices
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        devices.sort_by_key(|d| (d.location_id, d.device_address));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.devices.contains_key(key)
    }

    fn pair(kind: EventKind, descriptor: UsbDeviceDescriptor) -> Vec<DeviceEvent> {
        vec![
            DeviceEvent::new(kind, descriptor.clone()),
            DeviceEvent::new(EventKind::Change, descriptor),
        ]
    }

    fn is_allowed(&self, descriptor: &UsbDeviceDescriptor) -> bool {
        check_filter(
            descriptor.vendor_id,
            descriptor.product_id,
            &self.allowed_filters,
        )
    }
}

/// Check if a VID/PID pair is allowed by the filters
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    // If no filters are defined, all devices are allowed
    if filters.is_empty() {
        return true;
    }

    for filter in filters {
        // Filter format: "0xVID:0xPID" or "0xVID:*"; validated by the config loader
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            continue;
        };

        if matches_part(filter_vid, vid) && matches_part(filter_pid, pid) {
            return true;
        }
    }

    false
}

fn matches_part(pattern: &str, value: u16) -> bool {
    if pattern == "*" {
        return true;
    }

    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);

    u16::from_str_radix(hex, 16)
        .map(|v| v == value)
        .unwrap_or(false)
}

//! Device sources
//!
//! A [`DeviceSource`] is where the monitor thread gets devices from: the
//! libusb-backed [`crate::usb::LibusbSource`] on a real host, or a scripted
//! source in tests.

use common::Result;
use descriptor::{DeviceKey, UsbDeviceDescriptor};
use std::collections::HashSet;
use std::time::Duration;

/// A device as reported by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDevice {
    pub key: DeviceKey,
    pub descriptor: UsbDeviceDescriptor,
}

impl SourceDevice {
    pub fn new(key: DeviceKey, descriptor: UsbDeviceDescriptor) -> Self {
        Self { key, descriptor }
    }
}

/// Hot-plug change observed by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceChange {
    /// Device attached
    Arrived(SourceDevice),
    /// Device detached
    Left {
        key: DeviceKey,
        /// Descriptor to report if the registry never saw the device arrive
        fallback: Option<UsbDeviceDescriptor>,
    },
}

/// Platform seam for enumeration and hot-plug detection
///
/// Sources are created on, and only used from, the monitor thread.
pub trait DeviceSource {
    /// Enumerate the devices attached right now
    fn snapshot(&mut self) -> Result<Vec<SourceDevice>>;

    /// Wait up to `timeout` for hot-plug activity
    ///
    /// Returns an empty list when nothing happened.
    fn wait_changes(&mut self, timeout: Duration) -> Result<Vec<SourceChange>>;
}

/// Builds a fresh source; called once per monitoring session and per
/// one-shot enumeration
pub type SourceFactory = std::sync::Arc<dyn Fn() -> Result<Box<dyn DeviceSource>> + Send + Sync>;

/// Split two key sets into (arrived, left), both sorted
pub fn diff_keys(
    previous: &HashSet<DeviceKey>,
    current: &HashSet<DeviceKey>,
) -> (Vec<DeviceKey>, Vec<DeviceKey>) {
    let mut arrived: Vec<DeviceKey> = current.difference(previous).copied().collect();
    let mut left: Vec<DeviceKey> = previous.difference(current).copied().collect();
    arrived.sort();
    left.sort();
    (arrived, left)
}

//! USB device descriptor
//!
//! The descriptor is an immutable snapshot of a device's identifying
//! attributes, taken when the device is enumerated or hot-plugged.

use crate::error::{DescriptorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Serialized keys of [`UsbDeviceDescriptor`], in declaration order
pub const DESCRIPTOR_KEYS: [&str; 9] = [
    "locationId",
    "vendorId",
    "productId",
    "deviceName",
    "manufacturer",
    "serialNumber",
    "deviceAddress",
    "devNode",
    "mountPath",
];

/// Number of port levels that fit below the bus byte of a location id
pub const MAX_LOCATION_DEPTH: usize = 6;

/// Snapshot of a USB device's identifying attributes
///
/// Text fields are empty rather than absent when the host cannot provide
/// them, so every descriptor carries the same key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UsbDeviceDescriptor {
    /// Bus/port location identifier (see [`location_id`])
    pub location_id: u32,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Product string
    pub device_name: String,
    /// Manufacturer string
    pub manufacturer: String,
    /// Serial number string
    pub serial_number: String,
    /// Address assigned by the host controller
    pub device_address: u8,
    /// OS device node (e.g. `/dev/sdb`)
    pub dev_node: String,
    /// Filesystem mount path of the device node
    pub mount_path: String,
}

impl UsbDeviceDescriptor {
    /// Bus number encoded in the location id
    pub fn bus_number(&self) -> u8 {
        (self.location_id >> 24) as u8
    }

    /// Whether the device is currently mounted somewhere
    pub fn is_mounted(&self) -> bool {
        !self.mount_path.is_empty()
    }
}

/// Registry key for a live device
///
/// Bus number and address are unique among attached devices; an address may
/// be reused after the device leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl DeviceKey {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// Nibble written at the first port level that cannot be encoded
pub const LOCATION_TRUNCATED: u8 = 0x0f;

/// Pack a bus number and port path into a location id
///
/// The bus occupies the top byte and every port level one nibble below it,
/// outermost first: bus 20, ports `[1, 3]` yields `0x1413_0000`. Levels past
/// [`MAX_LOCATION_DEPTH`] are dropped.
///
/// Ports 1 to 14 are stored as is. A port outside that range (root hubs
/// with more than 14 ports) ends the packing with [`LOCATION_TRUNCATED`],
/// so the id never aliases a different path.
pub fn location_id(bus: u8, ports: &[u8]) -> u32 {
    let mut id = (bus as u32) << 24;
    for (level, port) in ports.iter().take(MAX_LOCATION_DEPTH).enumerate() {
        let shift = 20 - 4 * level as u32;
        if !(1..LOCATION_TRUNCATED).contains(port) {
            id |= (LOCATION_TRUNCATED as u32) << shift;
            break;
        }
        id |= (*port as u32) << shift;
    }
    id
}

/// Whether a location id stopped at a port it could not encode
pub fn is_truncated_location(id: u32) -> bool {
    (0..MAX_LOCATION_DEPTH).any(|level| {
        let shift = 20 - 4 * level as u32;
        ((id >> shift) & 0x0f) as u8 == LOCATION_TRUNCATED
    })
}

/// Check that a JSON value has exactly the descriptor key set
///
/// Order is irrelevant; missing keys are reported before unexpected ones.
pub fn check_descriptor_shape(value: &serde_json::Value) -> Result<()> {
    let object = value.as_object().ok_or(DescriptorError::NotAnObject)?;

    let expected: BTreeSet<&str> = DESCRIPTOR_KEYS.iter().copied().collect();
    let actual: BTreeSet<&str> = object.keys().map(String::as_str).collect();

    let missing: Vec<String> = expected
        .difference(&actual)
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DescriptorError::MissingKeys(missing));
    }

    let unexpected: Vec<String> = actual
        .difference(&expected)
        .map(|k| k.to_string())
        .collect();
    if !unexpected.is_empty() {
        return Err(DescriptorError::UnexpectedKeys(unexpected));
    }

    Ok(())
}

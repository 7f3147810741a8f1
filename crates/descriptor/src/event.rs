//! Hot-plug events and subscription filters

use crate::device::UsbDeviceDescriptor;
use crate::error::{DescriptorError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of hot-plug notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Device attached
    Add,
    /// Device detached
    Remove,
    /// Device attached or detached; fired after every `Add` and `Remove`
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Remove => "remove",
            EventKind::Change => "change",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" | "insert" => Ok(EventKind::Add),
            "remove" => Ok(EventKind::Remove),
            "change" => Ok(EventKind::Change),
            other => Err(DescriptorError::UnknownEventKind(other.to_string())),
        }
    }
}

/// A single hot-plug notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub kind: EventKind,
    pub device: UsbDeviceDescriptor,
}

impl DeviceEvent {
    pub fn new(kind: EventKind, device: UsbDeviceDescriptor) -> Self {
        Self { kind, device }
    }
}

/// Vendor/product restriction on descriptors
///
/// `None` matches anything. A product id without a vendor id is allowed and
/// matches that product id from any vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Filter matching every device
    pub fn any() -> Self {
        Self::default()
    }

    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: None,
        }
    }

    pub fn product(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }

    pub fn matches(&self, device: &UsbDeviceDescriptor) -> bool {
        self.vendor_id.is_none_or(|vid| vid == device.vendor_id)
            && self.product_id.is_none_or(|pid| pid == device.product_id)
    }
}

/// Subscription filter: event kind plus an optional device restriction
///
/// Parsed from `<kind>`, `<kind>:<vid>` or `<kind>:<vid>:<pid>`, where ids
/// are decimal (`add:5824:1155`) or 0x-prefixed hex (`add:0x16c0:0x0483`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub kind: EventKind,
    pub device: DeviceFilter,
}

impl EventFilter {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            device: DeviceFilter::any(),
        }
    }

    pub fn with_device(kind: EventKind, device: DeviceFilter) -> Self {
        Self { kind, device }
    }

    pub fn matches(&self, event: &DeviceEvent) -> bool {
        self.kind == event.kind && self.device.matches(&event.device)
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

impl FromStr for EventFilter {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let kind = parts[0].parse()?;

        let device = match parts.as_slice() {
            [_] => DeviceFilter::any(),
            [_, vid] => DeviceFilter {
                vendor_id: parse_wildcard_id(vid, "vendor id")?,
                product_id: None,
            },
            [_, vid, pid] => DeviceFilter {
                vendor_id: parse_wildcard_id(vid, "vendor id")?,
                product_id: parse_wildcard_id(pid, "product id")?,
            },
            _ => return Err(DescriptorError::InvalidFilter(s.to_string())),
        };

        Ok(Self { kind, device })
    }
}

fn parse_wildcard_id(value: &str, field: &'static str) -> Result<Option<u16>> {
    if value.trim() == "*" {
        Ok(None)
    } else {
        parse_id(value, field).map(Some)
    }
}

impl std::fmt::Display for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        match (self.device.vendor_id, self.device.product_id) {
            (Some(vid), Some(pid)) => write!(f, ":{}:{}", vid, pid),
            (Some(vid), None) => write!(f, ":{}", vid),
            (None, Some(pid)) => write!(f, ":*:{}", pid),
            (None, None) => Ok(()),
        }
    }
}

/// Parse a vendor or product id written in decimal or 0x-prefixed hex
pub fn parse_id(value: &str, field: &'static str) -> Result<u16> {
    let value = value.trim();
    let parsed = if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16)
    } else {
        value.parse::<u16>()
    };

    parsed.map_err(|_| DescriptorError::InvalidId {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vendor_id: u16, product_id: u16) -> UsbDeviceDescriptor {
        UsbDeviceDescriptor {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_kind_only() {
        let filter: EventFilter = "remove".parse().unwrap();
        assert_eq!(filter, EventFilter::new(EventKind::Remove));
    }

    #[test]
    fn test_parse_vendor_and_product() {
        let filter: EventFilter = "add:5824:1155".parse().unwrap();
        assert_eq!(filter.device, DeviceFilter::product(5824, 1155));

        let hex: EventFilter = "change:0x16c0:0x0483".parse().unwrap();
        assert_eq!(hex.device, DeviceFilter::product(0x16c0, 0x0483));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "unplug".parse::<EventFilter>(),
            Err(DescriptorError::UnknownEventKind("unplug".to_string()))
        );
        assert!(matches!(
            "add:70000".parse::<EventFilter>(),
            Err(DescriptorError::InvalidId { field: "vendor id", .. })
        ));
        assert!(matches!(
            "add:1:2:3".parse::<EventFilter>(),
            Err(DescriptorError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_filter_matching() {
        let filter: EventFilter = "add:5824".parse().unwrap();
        assert!(filter.matches(&DeviceEvent::new(EventKind::Add, device(5824, 1))));
        assert!(!filter.matches(&DeviceEvent::new(EventKind::Add, device(1, 1))));
        assert!(!filter.matches(&DeviceEvent::new(EventKind::Remove, device(5824, 1))));
    }

    #[test]
    fn test_product_only_filter() {
        let filter = DeviceFilter {
            vendor_id: None,
            product_id: Some(7),
        };
        assert!(filter.matches(&device(1, 7)));
        assert!(filter.matches(&device(2, 7)));
        assert!(!filter.matches(&device(1, 8)));
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["add", "remove:1", "change:5824:1155", "add:*:1155"] {
            let filter: EventFilter = text.parse().unwrap();
            assert_eq!(filter.to_string(), text);
        }
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EventKind::Change).unwrap(), "\"change\"");
    }
}

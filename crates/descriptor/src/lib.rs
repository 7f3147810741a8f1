//! Device descriptor model for usb-detection
//!
//! This crate defines the value types shared by the detector and its callers:
//! the USB device descriptor delivered by enumeration and hot-plug events,
//! the event kinds, and the filters used to subscribe to a subset of devices.
//!
//! # Example
//!
//! ```
//! use descriptor::{EventFilter, EventKind, UsbDeviceDescriptor, check_descriptor_shape};
//!
//! let device = UsbDeviceDescriptor {
//!     vendor_id: 5824,
//!     product_id: 1155,
//!     device_name: "Teensy USB Serial".to_string(),
//!     ..Default::default()
//! };
//!
//! // Every descriptor serializes to exactly the nine descriptor keys
//! let value = serde_json::to_value(&device).unwrap();
//! assert!(check_descriptor_shape(&value).is_ok());
//!
//! // Event names may carry a vendor and product qualifier
//! let filter: EventFilter = "add:5824:1155".parse().unwrap();
//! assert_eq!(filter.kind, EventKind::Add);
//! assert!(filter.device.matches(&device));
//! ```

pub mod device;
pub mod error;
pub mod event;

pub use device::{
    DESCRIPTOR_KEYS, DeviceKey, LOCATION_TRUNCATED, MAX_LOCATION_DEPTH, UsbDeviceDescriptor,
    check_descriptor_shape, is_truncated_location, location_id,
};
pub use error::{DescriptorError, Result};
pub use event::{DeviceEvent, DeviceFilter, EventFilter, EventKind, parse_id};

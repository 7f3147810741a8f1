//! USB device detection
//!
//! Enumerates attached USB devices and reports hot-plug activity as
//! `add`, `remove` and `change` events. Each device is described by a
//! [`UsbDeviceDescriptor`].
//!
//! Architecture:
//! - A dedicated `usb-monitor` thread owns the libusb context and the device
//!   registry while monitoring is active
//! - Callers reach it through an async channel bridge
//! - Events fan out to subscribers over a Tokio broadcast channel

pub mod config;
pub mod detector;
pub mod mounts;
pub mod registry;
pub mod source;
pub mod sysfs;
pub mod usb;
pub mod worker;

pub use common::{Error, Result};
pub use config::DetectorConfig;
pub use descriptor::{DeviceEvent, DeviceFilter, EventFilter, EventKind, UsbDeviceDescriptor};
pub use detector::{EventStream, ListenerHandle, UsbDetector};
pub use source::{DeviceSource, SourceChange, SourceDevice, SourceFactory};
pub use usb::libusb_factory;

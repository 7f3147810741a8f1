//! USB subsystem
//!
//! libusb-backed enumeration and hot-plug detection.
//!
//! This module implements the production [`DeviceSource`](crate::source::DeviceSource):
//! - Device enumeration and descriptor construction
//! - Hot-plug detection through libusb callbacks
//! - Polling fallback where libusb has no hot-plug support
//!
//! Everything here runs on the monitor thread so that blocking libusb calls
//! never stall the Tokio runtime.

pub mod describe;
pub mod source;

pub use describe::Describer;
pub use source::LibusbSource;

use crate::config::DetectorConfig;
use crate::source::{DeviceSource, SourceFactory};
use std::sync::Arc;

/// Factory producing libusb sources for the given configuration
pub fn libusb_factory(config: DetectorConfig) -> SourceFactory {
    Arc::new(move || Ok(Box::new(LibusbSource::new(&config)?) as Box<dyn DeviceSource>))
}

//! Common utilities for usb-detection
//!
//! This crate provides functionality shared by the detector library and its
//! command-line front end: error handling, logging setup, and the async
//! channel bridge between callers and the USB monitor thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{MonitorBridge, MonitorCommand, MonitorWorker, create_monitor_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;

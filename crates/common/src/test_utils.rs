//! Test utilities for usb-detection
//!
//! Provides mock descriptors and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! # fn main() {
//! let device = create_mock_descriptor(1, 0x1234, 0x5678);
//! assert_eq!(device.vendor_id, 0x1234);
//! # }
//! ```

use descriptor::{DeviceKey, UsbDeviceDescriptor, location_id};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock descriptor for testing
///
/// The device sits on bus 1 behind root port `id % 16` with address
/// `id % 128`, matching [`create_mock_key`].
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor;
///
/// let device = create_mock_descriptor(3, 0x1234, 0x5678);
/// assert_eq!(device.device_address, 3);
/// assert_eq!(device.bus_number(), 1);
/// ```
pub fn create_mock_descriptor(id: u32, vendor_id: u16, product_id: u16) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        location_id: location_id(1, &[(id % 14 + 1) as u8]),
        vendor_id,
        product_id,
        device_name: format!("Test Product {}", id),
        manufacturer: format!("Test Manufacturer {}", id),
        serial_number: format!("SN{:06}", id),
        device_address: (id % 128) as u8,
        dev_node: String::new(),
        mount_path: String::new(),
    }
}

/// Create a mock mass storage descriptor with a device node and mount path
pub fn create_mock_mass_storage(id: u32) -> UsbDeviceDescriptor {
    let letter = (b'b' + (id % 24) as u8) as char;
    UsbDeviceDescriptor {
        dev_node: format!("/dev/sd{}", letter),
        mount_path: format!("/media/usb{}", id),
        ..create_mock_descriptor(id, 0x0781, 0x5581)
    }
}

/// Create a descriptor with every optional string left empty
pub fn create_bare_descriptor(id: u32, vendor_id: u16, product_id: u16) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        device_name: String::new(),
        manufacturer: String::new(),
        serial_number: String::new(),
        ..create_mock_descriptor(id, vendor_id, product_id)
    }
}

/// Registry key matching [`create_mock_descriptor`] for the same id
pub fn create_mock_key(id: u32) -> DeviceKey {
    DeviceKey::new(1, (id % 128) as u8)
}

/// Create a list of mock descriptors for testing
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor_list;
///
/// let devices = create_mock_descriptor_list(5);
/// assert_eq!(devices.len(), 5);
/// ```
pub fn create_mock_descriptor_list(count: u32) -> Vec<UsbDeviceDescriptor> {
    (1..=count)
        .map(|i| create_mock_descriptor(i, 0x1000 + (i as u16), 0x2000 + (i as u16)))
        .collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging on
/// an event that never arrives.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

//! Descriptor construction from libusb devices
//!
//! Identifiers come from the USB device descriptor. Strings come from sysfs
//! when the kernel exposes them, which needs no access to the device, and
//! from the string descriptors otherwise. Mass storage devices are also
//! resolved to their block device node and mount point.

use crate::config::DetectorConfig;
use crate::mounts;
use crate::source::SourceDevice;
use crate::sysfs;
use descriptor::{DeviceKey, UsbDeviceDescriptor, location_id};
use rusb::{Device, DeviceDescriptor, DeviceHandle, UsbContext};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// USB class code of mass storage interfaces
const CLASS_MASS_STORAGE: u8 = 0x08;
/// USB class code of hubs
const CLASS_HUB: u8 = 0x09;
/// Vendor id of the Linux Foundation (root hubs)
const VENDOR_LINUX_FOUNDATION: u16 = 0x1d6b;

/// Builds descriptors for libusb devices
#[derive(Debug, Clone)]
pub struct Describer {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    mounts_path: PathBuf,
    mount_settle: Duration,
    resolve_mounts: bool,
}

impl Describer {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            sysfs_root: config.linux.sysfs_root.clone(),
            dev_root: config.linux.dev_root.clone(),
            mounts_path: config.linux.mounts_path.clone(),
            mount_settle: config.mount_settle(),
            resolve_mounts: config.linux.resolve_mounts,
        }
    }

    /// Describe an attached device
    ///
    /// `just_arrived` makes mass storage lookups wait for the block device to
    /// settle first.
    pub fn describe<T: UsbContext>(
        &self,
        device: &Device<T>,
        just_arrived: bool,
    ) -> Result<SourceDevice, rusb::Error> {
        let desc = device.device_descriptor()?;
        let ports = device.port_numbers().unwrap_or_default();
        let bus = device.bus_number();
        let dir = sysfs::usb_device_dir(&self.sysfs_root, bus, &ports);

        let mut descriptor = base_descriptor(device, &desc, &ports);
        descriptor.device_name = sysfs::read_attr(&dir, "product").unwrap_or_default();
        descriptor.manufacturer = sysfs::read_attr(&dir, "manufacturer").unwrap_or_default();
        descriptor.serial_number = sysfs::read_attr(&dir, "serial").unwrap_or_default();

        if descriptor.device_name.is_empty()
            || descriptor.manufacturer.is_empty()
            || descriptor.serial_number.is_empty()
        {
            self.fill_from_string_descriptors(device, &desc, &mut descriptor);
        }

        if is_mass_storage(device, &desc) {
            if just_arrived && !self.mount_settle.is_zero() {
                debug!(
                    "Waiting {:?} for block device of {:04x}:{:04x}",
                    self.mount_settle,
                    desc.vendor_id(),
                    desc.product_id()
                );
                std::thread::sleep(self.mount_settle);
            }

            if let Some(block) = sysfs::find_block_device(&dir) {
                descriptor.dev_node = sysfs::dev_node_path(&self.dev_root, &block);
                if self.resolve_mounts {
                    descriptor.mount_path =
                        mounts::lookup_mount_path(&self.mounts_path, &descriptor.dev_node)
                            .unwrap_or_default();
                }
            }
        }

        Ok(SourceDevice::new(DeviceKey::new(bus, device.address()), descriptor))
    }

    /// Describe a device that already left, from libusb's cached descriptor
    ///
    /// sysfs entries are gone by now, so only identifiers are filled in.
    pub fn describe_departed<T: UsbContext>(&self, device: &Device<T>) -> Option<SourceDevice> {
        let desc = device.device_descriptor().ok()?;
        let ports = device.port_numbers().unwrap_or_default();
        Some(SourceDevice::new(
            DeviceKey::new(device.bus_number(), device.address()),
            base_descriptor(device, &desc, &ports),
        ))
    }

    /// Read the strings sysfs could not provide from the device itself
    fn fill_from_string_descriptors<T: UsbContext>(
        &self,
        device: &Device<T>,
        desc: &DeviceDescriptor,
        descriptor: &mut UsbDeviceDescriptor,
    ) {
        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                debug!(
                    "Cannot open {:04x}:{:04x} for string descriptors: {}",
                    desc.vendor_id(),
                    desc.product_id(),
                    e
                );
                return;
            }
        };

        let (manufacturer, product, serial_number) = read_string_descriptors(&handle, desc);

        if descriptor.device_name.is_empty() {
            descriptor.device_name = product.unwrap_or_default();
        }
        if descriptor.manufacturer.is_empty() {
            descriptor.manufacturer = manufacturer.unwrap_or_default();
        }
        if descriptor.serial_number.is_empty() {
            descriptor.serial_number = serial_number.unwrap_or_default();
        }
    }
}

/// Identifier fields shared by live and departed devices
fn base_descriptor<T: UsbContext>(
    device: &Device<T>,
    desc: &DeviceDescriptor,
    ports: &[u8],
) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        location_id: location_id(device.bus_number(), ports),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        device_address: device.address(),
        ..Default::default()
    }
}

/// Read string descriptors from device
fn read_string_descriptors<T: UsbContext>(
    handle: &DeviceHandle<T>,
    desc: &DeviceDescriptor,
) -> (Option<String>, Option<String>, Option<String>) {
    let manufacturer = desc
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = desc
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial_number = desc
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}

/// Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
pub fn is_root_hub(desc: &DeviceDescriptor) -> bool {
    is_root_hub_ids(desc.vendor_id(), desc.class_code())
}

pub(crate) fn is_root_hub_ids(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == VENDOR_LINUX_FOUNDATION && class_code == CLASS_HUB
}

/// Whether the device or any interface of its active configuration is mass storage
fn is_mass_storage<T: UsbContext>(device: &Device<T>, desc: &DeviceDescriptor) -> bool {
    if desc.class_code() == CLASS_MASS_STORAGE {
        return true;
    }

    let config = match device.active_config_descriptor() {
        Ok(config) => config,
        Err(_) => match device.config_descriptor(0) {
            Ok(config) => config,
            Err(_) => return false,
        },
    };

    config.interfaces().any(|interface| {
        interface
            .descriptors()
            .any(|alt| alt.class_code() == CLASS_MASS_STORAGE)
    })
}

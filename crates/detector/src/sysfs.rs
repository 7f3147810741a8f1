//! sysfs lookups for USB devices
//!
//! libusb identifies devices by bus number and port path; the kernel exposes
//! the same device under `/sys/bus/usb/devices/<bus>-<port>.<port>...`. The
//! string attributes there can be read without opening the device, and the
//! block devices of mass storage gadgets hang somewhere below it.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deepest directory level searched for `block/` entries
///
/// usb device → interface → host → target → lun → block
const MAX_BLOCK_SEARCH_DEPTH: usize = 8;

/// Kernel name of a USB device: `usb<bus>` for root hubs, `<bus>-<ports>` otherwise
pub fn usb_device_name(bus: u8, ports: &[u8]) -> String {
    if ports.is_empty() {
        format!("usb{}", bus)
    } else {
        let path: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
        format!("{}-{}", bus, path.join("."))
    }
}

/// sysfs directory of a USB device below `sysfs_root`
pub fn usb_device_dir(sysfs_root: &Path, bus: u8, ports: &[u8]) -> PathBuf {
    sysfs_root
        .join("bus")
        .join("usb")
        .join("devices")
        .join(usb_device_name(bus, ports))
}

/// Read a sysfs attribute, trimmed; `None` if missing or blank
pub fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let value = fs::read_to_string(dir.join(name)).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Find the first block device beneath a USB device directory
///
/// Returns the kernel name (e.g. `sdb`). Symlinks are not followed, so the
/// `subsystem`/`driver` back-links cannot send the walk around in circles.
/// Names are visited in sorted order to make the pick stable.
pub fn find_block_device(dir: &Path) -> Option<String> {
    find_block_device_at(dir, 0)
}

fn find_block_device_at(dir: &Path, depth: usize) -> Option<String> {
    if depth > MAX_BLOCK_SEARCH_DEPTH {
        return None;
    }

    let mut subdirs: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    subdirs.sort();

    if let Some((_, block_dir)) = subdirs.iter().find(|(name, _)| name == "block") {
        let mut names: Vec<String> = fs::read_dir(block_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        if let Some(name) = names.into_iter().next() {
            debug!("Found block device {} below {}", name, dir.display());
            return Some(name);
        }
    }

    subdirs
        .iter()
        .filter(|(name, _)| name != "block")
        .find_map(|(_, path)| find_block_device_at(path, depth + 1))
}

/// Device node path for a block device name
pub fn dev_node_path(dev_root: &Path, block_name: &str) -> String {
    dev_root.join(block_name).to_string_lossy().into_owned()
}

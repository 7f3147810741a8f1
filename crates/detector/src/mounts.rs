//! Mount table lookup
//!
//! Parses `/proc/mounts`-format tables to find where a device node is
//! mounted.

use std::fs;
use std::path::Path;
use tracing::warn;

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device (e.g. `/dev/sdb1`)
    pub fs_name: String,
    /// Mount point
    pub dir: String,
    pub fs_type: String,
}

/// Parse a mount table
///
/// Lines with fewer than three fields are skipped. Fields are unescaped, so
/// a mount point with a space (`\040`) comes back with a literal space.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let fs_name = fields.next()?;
            let dir = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                fs_name: unescape(fs_name),
                dir: unescape(dir),
                fs_type: unescape(fs_type),
            })
        })
        .collect()
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes
pub fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(bytes: &[u8]) -> bool {
    bytes.len() == 3 && bytes.iter().all(|b| (b'0'..=b'7').contains(b))
}

/// Find the mount point of a device node
///
/// An exact match on the device node wins; otherwise the first partition of
/// the node is used (`/dev/sdb1` for `/dev/sdb`, `/dev/nvme0n1p2` for
/// `/dev/nvme0n1`). `/dev/sdaa1` is not a partition of `/dev/sda`.
pub fn find_mount_path(entries: &[MountEntry], dev_node: &str) -> Option<String> {
    if dev_node.is_empty() {
        return None;
    }

    entries
        .iter()
        .find(|e| e.fs_name == dev_node)
        .or_else(|| {
            entries.iter().find(|e| {
                e.fs_name
                    .strip_prefix(dev_node)
                    .is_some_and(is_partition_suffix)
            })
        })
        .map(|e| e.dir.clone())
}

/// `1`, `12` or `p2`: what the kernel appends to a disk name for a partition
fn is_partition_suffix(suffix: &str) -> bool {
    let digits = suffix.strip_prefix('p').unwrap_or(suffix);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Read the mount table at `path` and look up `dev_node`
///
/// An unreadable table yields `None`.
pub fn lookup_mount_path(path: &Path, dev_node: &str) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => find_mount_path(&parse_mounts(&content), dev_node),
        Err(e) => {
            warn!("Can't open mounted filesystems {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/sdb1 /media/user/USB\\040STICK vfat rw,nosuid,nodev 0 0
/dev/sdc /mnt/whole ext4 rw 0 0
/dev/sdc1 /mnt/part ext4 rw 0 0
";

    #[test]
    fn test_parse_mounts() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[2].dir, "/");
        assert_eq!(entries[2].fs_type, "ext4");
    }

    #[test]
    fn test_unescape_space() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(entries[3].dir, "/media/user/USB STICK");
    }

    #[test]
    fn test_partition_prefix_match() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(
            find_mount_path(&entries, "/dev/sdb").as_deref(),
            Some("/media/user/USB STICK")
        );
    }

    #[test]
    fn test_exact_match_wins() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(find_mount_path(&entries, "/dev/sdc").as_deref(), Some("/mnt/whole"));
        assert_eq!(find_mount_path(&entries, "/dev/sdc1").as_deref(), Some("/mnt/part"));
    }

    #[test]
    fn test_prefix_requires_partition_suffix() {
        let entries = parse_mounts(
            "/dev/sdaa1 /mnt/other ext4 rw 0 0\n/dev/sda2 /mnt/data ext4 rw 0 0\n",
        );
        assert_eq!(find_mount_path(&entries, "/dev/sda").as_deref(), Some("/mnt/data"));

        let entries = parse_mounts("/dev/sdaa1 /mnt/other ext4 rw 0 0\n");
        assert_eq!(find_mount_path(&entries, "/dev/sda"), None);
    }

    #[test]
    fn test_nvme_partition_suffix() {
        let entries = parse_mounts("/dev/nvme0n1p2 /boot vfat rw 0 0\n");
        assert_eq!(find_mount_path(&entries, "/dev/nvme0n1").as_deref(), Some("/boot"));
        assert_eq!(find_mount_path(&entries, "/dev/nvme0"), None);
    }

    #[test]
    fn test_partition_suffix() {
        assert!(is_partition_suffix("1"));
        assert!(is_partition_suffix("12"));
        assert!(is_partition_suffix("p2"));
        assert!(!is_partition_suffix(""));
        assert!(!is_partition_suffix("p"));
        assert!(!is_partition_suffix("a1"));
    }

    #[test]
    fn test_no_match() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(find_mount_path(&entries, "/dev/sdz"), None);
        assert_eq!(find_mount_path(&entries, ""), None);
    }

    #[test]
    fn test_unescape_leaves_plain_backslash() {
        assert_eq!(unescape("a\\b"), "a\\b");
        assert_eq!(unescape("tab\\011x"), "tab\tx");
        assert_eq!(unescape("back\\134slash"), "back\\slash");
    }

    #[test]
    fn test_lookup_missing_table() {
        assert_eq!(
            lookup_mount_path(Path::new("/nonexistent/mounts"), "/dev/sdb"),
            None
        );
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Canonical records for disks reported by macOS `diskutil`
//!
//! These types are the decoded form of diskutil's plist output:
//!
//! - `DiskInfo` → one disk, partition, container or volume (`diskutil info`)
//! - `SystemPartitions` → the whole-system tree (`diskutil list`)
//!
//! Field names follow diskutil's PascalCase plist keys through serde renames,
//! so any serde format carrying the same keys decodes into them.

pub mod disk;
pub mod partition;

pub use disk::{
    APFS_CONTAINER_CONTENT, APFS_FILESYSTEM_TYPE, APFS_PHYSICAL_STORE_CONTENT,
    APFS_VOLUME_CONTENT, ApfsPhysicalStore, DiskInfo,
};
pub use partition::{ApfsPhysicalStoreId, ApfsVolume, DiskPart, Partition, SystemPartitions};

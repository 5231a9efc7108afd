// SPDX-License-Identifier: GPL-3.0-only

//! Single-device records
//!
//! `DiskInfo` is the decoded form of `diskutil info -plist <id>`. It describes
//! one whole disk, partition, APFS container or APFS volume.

use serde::{Deserialize, Serialize};

/// Partition content GUID diskutil reports for an APFS container.
pub const APFS_CONTAINER_CONTENT: &str = "EF57347C-0000-11AA-AA11-00306543ECAC";

/// Partition content GUID diskutil reports for an APFS volume.
pub const APFS_VOLUME_CONTENT: &str = "41504653-0000-11AA-AA11-00306543ECAC";

/// Partition content name of an APFS physical store on a GPT disk.
pub const APFS_PHYSICAL_STORE_CONTENT: &str = "Apple_APFS";

/// Filesystem type diskutil reports for mounted or mountable APFS volumes.
pub const APFS_FILESYSTEM_TYPE: &str = "apfs";

/// One entry of the `APFSPhysicalStores` array in `diskutil info` output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApfsPhysicalStore {
    #[serde(rename = "APFSPhysicalStore")]
    pub device_identifier: String,
}

impl ApfsPhysicalStore {
    pub fn new(device_identifier: impl Into<String>) -> Self {
        Self {
            device_identifier: device_identifier.into(),
        }
    }
}

/// Complete information for a single device
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DiskInfo {
    // === Identity ===
    /// Device identifier (e.g., "disk1s1")
    pub device_identifier: String,

    /// Device node (e.g., "/dev/disk1s1")
    #[serde(default)]
    pub device_node: String,

    /// Whole disk this device lives on (e.g., "disk1")
    #[serde(default)]
    pub parent_whole_disk: String,

    /// Whether this record describes a whole disk rather than a slice of one
    #[serde(default)]
    pub whole_disk: bool,

    /// Partition content or role ("GUID_partition_scheme", "Apple_APFS", a GUID, ...)
    #[serde(default)]
    pub content: String,

    /// Bus the device is attached through ("PCI-Express", "SATA", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_protocol: Option<String>,

    // === Filesystem ===
    /// Short filesystem type ("apfs", "hfs", "msdos")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_type: Option<String>,

    /// Human readable filesystem name ("APFS", "Mac OS Extended (Journaled)")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    /// Mount point; diskutil reports an empty string for unmounted volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    // === Sizes ===
    /// Size in bytes
    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,

    /// Free space in bytes as seen by the mounted filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_space: Option<u64>,

    // === APFS ===
    /// Container this volume belongs to (e.g., "disk1")
    #[serde(
        rename = "APFSContainerReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub apfs_container_reference: Option<String>,

    #[serde(
        rename = "APFSContainerSize",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub apfs_container_size: Option<u64>,

    /// Unallocated space left in the container
    #[serde(
        rename = "APFSContainerFree",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub apfs_container_free: Option<u64>,

    /// Physical devices backing the container. Mojave leaves this out.
    #[serde(rename = "APFSPhysicalStores", default)]
    pub apfs_physical_stores: Vec<ApfsPhysicalStore>,
}

impl DiskInfo {
    /// First physical store backing this device, if diskutil reported one
    pub fn physical_store(&self) -> Option<&str> {
        self.apfs_physical_stores
            .first()
            .map(|store| store.device_identifier.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Replace the physical stores with a single store
    pub fn set_physical_store(&mut self, device_identifier: impl Into<String>) {
        self.apfs_physical_stores = vec![ApfsPhysicalStore::new(device_identifier)];
    }

    /// Whether this record describes an APFS container or volume
    pub fn is_apfs_media(&self) -> bool {
        self.apfs_container_reference
            .as_deref()
            .is_some_and(|reference| !reference.is_empty())
            || self
                .filesystem_type
                .as_deref()
                .is_some_and(|fs| fs.eq_ignore_ascii_case(APFS_FILESYSTEM_TYPE))
            || self.content == APFS_CONTAINER_CONTENT
            || self.content == APFS_VOLUME_CONTENT
    }

    /// APFS media whose physical store linkage is missing
    pub fn needs_physical_store(&self) -> bool {
        self.is_apfs_media() && self.physical_store().is_none()
    }

    /// Mount point, treating diskutil's empty string as unmounted
    pub fn mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref().filter(|mp| !mp.is_empty())
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_point().is_some()
    }

    /// Space available for growing: container free space for APFS media,
    /// filesystem free space otherwise.
    pub fn free_space(&self) -> Option<u64> {
        self.apfs_container_free.or(self.free_space)
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! System-wide partition listing
//!
//! `SystemPartitions` is the decoded form of `diskutil list -plist`. Each
//! top-level `DiskPart` is either a physical disk with `Partitions`, or a
//! synthesized APFS container disk with `APFSVolumes` and the
//! `APFSPhysicalStores` that back it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::disk::{APFS_CONTAINER_CONTENT, APFS_PHYSICAL_STORE_CONTENT};

/// Whole-system listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SystemPartitions {
    /// Every device identifier known to diskutil
    #[serde(default)]
    pub all_disks: Vec<String>,

    #[serde(default)]
    pub all_disks_and_partitions: Vec<DiskPart>,

    #[serde(default)]
    pub volumes_from_disks: Vec<String>,

    #[serde(default)]
    pub whole_disks: Vec<String>,
}

/// A top-level disk and the records it owns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DiskPart {
    pub device_identifier: String,

    #[serde(default)]
    pub content: String,

    #[serde(rename = "OSInternal", default)]
    pub os_internal: bool,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    #[serde(default)]
    pub partitions: Vec<Partition>,

    /// Physical devices backing this disk when it is an APFS container
    #[serde(rename = "APFSPhysicalStores", default)]
    pub apfs_physical_stores: Vec<ApfsPhysicalStoreId>,

    #[serde(rename = "APFSVolumes", default)]
    pub apfs_volumes: Vec<ApfsVolume>,
}

/// A partition slice of a physical disk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Partition {
    pub device_identifier: String,

    #[serde(default)]
    pub content: String,

    #[serde(rename = "DiskUUID", default, skip_serializing_if = "Option::is_none")]
    pub disk_uuid: Option<String>,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    #[serde(rename = "VolumeUUID", default, skip_serializing_if = "Option::is_none")]
    pub volume_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

impl Partition {
    pub fn is_apfs_physical_store(&self) -> bool {
        self.content == APFS_PHYSICAL_STORE_CONTENT
    }
}

/// An APFS volume inside a container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ApfsVolume {
    pub device_identifier: String,

    #[serde(rename = "DiskUUID", default, skip_serializing_if = "Option::is_none")]
    pub disk_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    #[serde(rename = "VolumeUUID", default, skip_serializing_if = "Option::is_none")]
    pub volume_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    #[serde(rename = "OSInternal", default)]
    pub os_internal: bool,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub capacity_in_use: u64,

    /// Physical store backing this volume's container
    #[serde(
        rename = "APFSPhysicalStore",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub physical_store: Option<String>,
}

impl ApfsVolume {
    /// Physical store, treating an empty string as missing
    pub fn physical_store(&self) -> Option<&str> {
        self.physical_store.as_deref().filter(|id| !id.is_empty())
    }

    pub fn needs_physical_store(&self) -> bool {
        self.physical_store().is_none()
    }
}

/// One entry of a container's `APFSPhysicalStores` array in `diskutil list` output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ApfsPhysicalStoreId {
    pub device_identifier: String,
}

impl ApfsPhysicalStoreId {
    pub fn new(device_identifier: impl Into<String>) -> Self {
        Self {
            device_identifier: device_identifier.into(),
        }
    }
}

impl DiskPart {
    /// Whether this is a synthesized APFS container disk
    pub fn is_apfs_container(&self) -> bool {
        self.content == APFS_CONTAINER_CONTENT || !self.apfs_volumes.is_empty()
    }

    pub fn physical_stores(&self) -> impl Iterator<Item = &str> {
        self.apfs_physical_stores
            .iter()
            .map(|store| store.device_identifier.as_str())
    }
}

impl SystemPartitions {
    pub fn find_disk(&self, device_identifier: &str) -> Option<&DiskPart> {
        self.all_disks_and_partitions
            .iter()
            .find(|disk| disk.device_identifier == device_identifier)
    }

    /// Every APFS volume in the tree, in listing order
    pub fn apfs_volumes(&self) -> impl Iterator<Item = &ApfsVolume> {
        self.all_disks_and_partitions
            .iter()
            .flat_map(|disk| disk.apfs_volumes.iter())
    }

    pub fn find_volume(&self, device_identifier: &str) -> Option<&ApfsVolume> {
        self.apfs_volumes()
            .find(|volume| volume.device_identifier == device_identifier)
    }

    /// Every device identifier named by the listing: `AllDisks` plus every
    /// record of the tree.
    pub fn device_identifiers(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = self.all_disks.iter().map(String::as_str).collect();
        for disk in &self.all_disks_and_partitions {
            ids.insert(disk.device_identifier.as_str());
            ids.extend(
                disk.partitions
                    .iter()
                    .map(|partition| partition.device_identifier.as_str()),
            );
            ids.extend(
                disk.apfs_volumes
                    .iter()
                    .map(|volume| volume.device_identifier.as_str()),
            );
        }
        ids
    }

    pub fn contains_device(&self, device_identifier: &str) -> bool {
        self.device_identifiers().contains(device_identifier)
    }

    /// Container references that do not resolve to a record of this tree
    pub fn dangling_physical_stores(&self) -> Vec<&str> {
        let known = self.device_identifiers();
        self.all_disks_and_partitions
            .iter()
            .flat_map(|disk| disk.physical_stores())
            .chain(self.apfs_volumes().filter_map(ApfsVolume::physical_store))
            .filter(|id| !known.contains(id))
            .collect()
    }
}

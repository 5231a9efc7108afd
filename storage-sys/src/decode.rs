// SPDX-License-Identifier: GPL-3.0-only

//! Structured decoding of diskutil output

use storage_types::{DiskInfo, SystemPartitions};
use tracing::debug;

use crate::error::{DiskutilError, Result};

/// Turns raw diskutil output into domain records
pub trait Decoder: Send + Sync {
    fn decode_disk_info(&self, raw: &[u8]) -> Result<DiskInfo>;

    fn decode_system_partitions(&self, raw: &[u8]) -> Result<SystemPartitions>;
}

/// Decodes XML or binary property lists
#[derive(Debug, Clone, Copy, Default)]
pub struct PlistDecoder;

impl Decoder for PlistDecoder {
    fn decode_disk_info(&self, raw: &[u8]) -> Result<DiskInfo> {
        let disk: DiskInfo = plist::from_bytes(raw).map_err(|source| DiskutilError::Decode {
            record: "disk information",
            source,
        })?;
        debug!("Decoded disk information for {}", disk.device_identifier);
        Ok(disk)
    }

    fn decode_system_partitions(&self, raw: &[u8]) -> Result<SystemPartitions> {
        let partitions: SystemPartitions =
            plist::from_bytes(raw).map_err(|source| DiskutilError::Decode {
                record: "system partitions",
                source,
            })?;
        debug!(
            "Decoded {} top-level disks",
            partitions.all_disks_and_partitions.len()
        );
        Ok(partitions)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn decodes_volume_info() {
        let disk = PlistDecoder
            .decode_disk_info(volume_info("disk1s1", Some("disk0s2")).as_bytes())
            .expect("decode info");

        assert_eq!(disk.device_identifier, "disk1s1");
        assert_eq!(disk.physical_store(), Some("disk0s2"));
        assert_eq!(disk.apfs_container_reference.as_deref(), Some("disk1"));
        assert!(!disk.is_mounted());
        assert_eq!(disk.free_space(), Some(52_428_800_000));
    }

    #[test]
    fn decodes_volume_info_without_store() {
        let disk = PlistDecoder
            .decode_disk_info(volume_info("disk1s2", None).as_bytes())
            .expect("decode info");
        assert!(disk.needs_physical_store());
    }

    #[test]
    fn decodes_listing_tree() {
        let parts = PlistDecoder
            .decode_system_partitions(LISTING.as_bytes())
            .expect("decode listing");

        assert_eq!(parts.whole_disks, ["disk0", "disk1"]);
        assert_eq!(parts.all_disks_and_partitions.len(), 2);

        let disk0 = parts.find_disk("disk0").expect("disk0");
        assert_eq!(disk0.partitions.len(), 2);
        assert!(disk0.partitions[1].is_apfs_physical_store());

        let container = parts.find_disk("disk1").expect("disk1");
        assert!(container.is_apfs_container());
        assert_eq!(
            parts.find_volume("disk1s1").unwrap().physical_store(),
            Some("disk1")
        );
        assert!(parts.find_volume("disk1s2").unwrap().needs_physical_store());
    }

    #[test]
    fn decoded_listing_keeps_diskutil_key_names() {
        let parts = PlistDecoder
            .decode_system_partitions(LISTING.as_bytes())
            .expect("decode listing");

        let json = serde_json::to_value(&parts).expect("serialize listing");

        assert_eq!(json["WholeDisks"], serde_json::json!(["disk0", "disk1"]));
        let container = &json["AllDisksAndPartitions"][1];
        assert_eq!(container["DeviceIdentifier"], "disk1");
        assert_eq!(container["APFSVolumes"][0]["APFSPhysicalStore"], "disk1");
        assert!(container["APFSVolumes"][1]["APFSPhysicalStore"].is_null());
    }

    #[test]
    fn malformed_output_is_a_decode_error() {
        let error = PlistDecoder
            .decode_system_partitions(b"Unable to find disk")
            .unwrap_err();
        assert!(matches!(
            error,
            DiskutilError::Decode {
                record: "system partitions",
                ..
            }
        ));
    }

    #[test]
    fn missing_device_identifier_is_a_decode_error() {
        let raw = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>Size</key><integer>1</integer></dict></plist>"#;
        assert!(PlistDecoder.decode_disk_info(raw.as_bytes()).is_err());
    }
}

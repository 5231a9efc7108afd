// SPDX-License-Identifier: GPL-3.0-only

//! APFS physical store backfill
//!
//! Mojave's diskutil leaves the physical store out of both `list` and
//! `info` output. Each APFS volume missing it gets its own `info` query and
//! the recovered store is patched into the already decoded record. A failed
//! volume never undoes the volumes patched before or after it.

use std::collections::BTreeSet;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use storage_types::{ApfsPhysicalStoreId, DiskInfo, SystemPartitions};
use tracing::{debug, info, warn};

use crate::error::{BackfillError, BackfillFailure, Result, VolumeBackfillError};

/// How supplementary queries are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Sequential,
    /// Queries run on a dedicated rayon pool; `None` uses available parallelism
    Parallel { threads: Option<usize> },
}

/// Volume that still needs its physical store, by position in the tree
struct Pending {
    disk: usize,
    volume: usize,
    device_identifier: String,
}

/// Patch every APFS volume of `partitions` that has no physical store.
///
/// `fetch` performs a single-device `info` query. Stores not present in the
/// listing's device set are rejected so the tree never points outside itself.
pub(crate) fn backfill_system_partitions<F>(
    partitions: &mut SystemPartitions,
    fetch: F,
    strategy: Strategy,
) -> std::result::Result<(), BackfillError>
where
    F: Fn(&str) -> Result<DiskInfo> + Sync,
{
    let pending: Vec<Pending> = partitions
        .all_disks_and_partitions
        .iter()
        .enumerate()
        .flat_map(|(disk, part)| {
            part.apfs_volumes
                .iter()
                .enumerate()
                .filter(|(_, volume)| volume.needs_physical_store())
                .map(move |(volume, apfs)| Pending {
                    disk,
                    volume,
                    device_identifier: apfs.device_identifier.clone(),
                })
        })
        .collect();

    if pending.is_empty() {
        debug!("All APFS volumes already carry a physical store");
        return Ok(());
    }

    debug!(
        "Backfilling physical stores for {} APFS volume(s)",
        pending.len()
    );

    let results = {
        let known = partitions.device_identifiers();
        let ids: Vec<&str> = pending
            .iter()
            .map(|p| p.device_identifier.as_str())
            .collect();

        run_queries(&ids, strategy, |id| {
            let store = query_physical_store(id, &fetch)?;
            if !known.is_empty() && !known.contains(store.as_str()) {
                return Err(BackfillFailure::UnknownStore(store));
            }
            Ok(store)
        })
    };

    let attempted = pending.len();
    let mut recovered: Vec<Vec<String>> =
        vec![Vec::new(); partitions.all_disks_and_partitions.len()];
    let mut failures = Vec::new();

    for (target, result) in pending.into_iter().zip(results) {
        match result {
            Ok(store) => {
                debug!(
                    "Physical store for {} is {}",
                    target.device_identifier, store
                );
                partitions.all_disks_and_partitions[target.disk].apfs_volumes[target.volume]
                    .physical_store = Some(store.clone());
                recovered[target.disk].push(store);
            }
            Err(failure) => {
                warn!(
                    "Unable to backfill physical store for {}: {}",
                    target.device_identifier, failure
                );
                failures.push(VolumeBackfillError {
                    device_identifier: target.device_identifier,
                    failure,
                });
            }
        }
    }

    // Containers without their own store list inherit what their volumes reported
    for (part, stores) in partitions
        .all_disks_and_partitions
        .iter_mut()
        .zip(recovered)
    {
        if stores.is_empty() || !part.apfs_physical_stores.is_empty() {
            continue;
        }
        let unique: BTreeSet<String> = stores.into_iter().collect();
        part.apfs_physical_stores = unique.into_iter().map(ApfsPhysicalStoreId::new).collect();
    }

    info!(
        "Backfilled {} of {} APFS physical store(s)",
        attempted - failures.len(),
        attempted
    );

    if failures.is_empty() {
        Ok(())
    } else {
        Err(BackfillError {
            attempted,
            failures,
        })
    }
}

/// Patch a single record when it is APFS media without a physical store.
///
/// The follow-up query targets the same identifier. On hosts whose `info`
/// output never carries the store, this ends as a `StillAbsent` failure and
/// the record is flagged as not recoverable.
pub(crate) fn backfill_disk_info<F>(
    disk: &mut DiskInfo,
    fetch: F,
) -> std::result::Result<(), BackfillError>
where
    F: Fn(&str) -> Result<DiskInfo>,
{
    if !disk.needs_physical_store() {
        return Ok(());
    }

    match query_physical_store(&disk.device_identifier, &fetch) {
        Ok(store) => {
            debug!("Physical store for {} is {}", disk.device_identifier, store);
            disk.set_physical_store(store);
            Ok(())
        }
        Err(failure) => {
            warn!(
                "Unable to backfill physical store for {}: {}",
                disk.device_identifier, failure
            );
            Err(BackfillError {
                attempted: 1,
                failures: vec![VolumeBackfillError {
                    device_identifier: disk.device_identifier.clone(),
                    failure,
                }],
            })
        }
    }
}

fn query_physical_store<F>(id: &str, fetch: &F) -> std::result::Result<String, BackfillFailure>
where
    F: Fn(&str) -> Result<DiskInfo>,
{
    let fetched = fetch(id).map_err(|error| BackfillFailure::Query(Box::new(error)))?;
    fetched
        .physical_store()
        .map(str::to_string)
        .ok_or(BackfillFailure::StillAbsent)
}

fn run_queries<Q>(
    ids: &[&str],
    strategy: Strategy,
    query: Q,
) -> Vec<std::result::Result<String, BackfillFailure>>
where
    Q: Fn(&str) -> std::result::Result<String, BackfillFailure> + Sync,
{
    let Strategy::Parallel { threads } = strategy else {
        return ids.iter().map(|&id| query(id)).collect();
    };

    let threads = threads
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, usize::from))
        .clamp(1, ids.len().max(1));

    match ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(|| ids.par_iter().map(|&id| query(id)).collect()),
        Err(error) => {
            warn!("Backfill thread pool unavailable, querying sequentially: {}", error);
            ids.iter().map(|&id| query(id)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use storage_types::{ApfsVolume, DiskPart, Partition, APFS_CONTAINER_CONTENT};

    use super::*;
    use crate::error::DiskutilError;

    /// Answers `info` queries from a map and records which ids were asked for
    struct FakeInfo {
        stores: HashMap<&'static str, Option<&'static str>>,
        asked: Mutex<Vec<String>>,
    }

    impl FakeInfo {
        fn new(stores: &[(&'static str, Option<&'static str>)]) -> Self {
            Self {
                stores: stores.iter().copied().collect(),
                asked: Mutex::new(Vec::new()),
            }
        }

        fn fetch(&self, id: &str) -> Result<DiskInfo> {
            self.asked.lock().unwrap().push(id.to_string());
            match self.stores.get(id) {
                Some(store) => {
                    let mut disk = DiskInfo {
                        device_identifier: id.to_string(),
                        filesystem_type: Some("apfs".to_string()),
                        ..Default::default()
                    };
                    if let Some(store) = store {
                        disk.set_physical_store(*store);
                    }
                    Ok(disk)
                }
                None => Err(DiskutilError::InvalidDeviceIdentifier(id.to_string())),
            }
        }

        fn asked(&self) -> Vec<String> {
            let mut asked = self.asked.lock().unwrap().clone();
            asked.sort();
            asked
        }
    }

    fn volume(id: &str, store: Option<&str>) -> ApfsVolume {
        ApfsVolume {
            device_identifier: id.to_string(),
            physical_store: store.map(str::to_string),
            ..Default::default()
        }
    }

    fn listing(volumes: Vec<ApfsVolume>) -> SystemPartitions {
        let mut all_disks = vec![
            "disk0".to_string(),
            "disk0s1".to_string(),
            "disk0s2".to_string(),
            "disk1".to_string(),
        ];
        all_disks.extend(volumes.iter().map(|v| v.device_identifier.clone()));

        SystemPartitions {
            all_disks,
            all_disks_and_partitions: vec![
                DiskPart {
                    device_identifier: "disk0".to_string(),
                    content: "GUID_partition_scheme".to_string(),
                    partitions: vec![
                        Partition {
                            device_identifier: "disk0s1".to_string(),
                            content: "EFI".to_string(),
                            ..Default::default()
                        },
                        Partition {
                            device_identifier: "disk0s2".to_string(),
                            content: "Apple_APFS".to_string(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                DiskPart {
                    device_identifier: "disk1".to_string(),
                    content: APFS_CONTAINER_CONTENT.to_string(),
                    apfs_volumes: volumes,
                    ..Default::default()
                },
            ],
            whole_disks: vec!["disk0".to_string(), "disk1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn patches_only_volumes_missing_a_store() {
        let fake = FakeInfo::new(&[("disk1s2", Some("disk1"))]);
        let mut parts = listing(vec![
            volume("disk1s1", Some("disk1")),
            volume("disk1s2", None),
        ]);
        let before_disk0 = parts.all_disks_and_partitions[0].clone();

        backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
            .expect("backfill succeeds");

        assert_eq!(fake.asked(), ["disk1s2"]);
        assert_eq!(parts.find_volume("disk1s1").unwrap().physical_store(), Some("disk1"));
        assert_eq!(parts.find_volume("disk1s2").unwrap().physical_store(), Some("disk1"));
        assert_eq!(parts.all_disks_and_partitions[0], before_disk0);
    }

    #[test]
    fn already_populated_tree_is_left_alone() {
        let fake = FakeInfo::new(&[]);
        let mut parts = listing(vec![
            volume("disk1s1", Some("disk0s2")),
            volume("disk1s2", Some("disk0s2")),
        ]);
        let before = parts.clone();

        for _ in 0..2 {
            backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
                .expect("nothing to do");
        }

        assert!(fake.asked().is_empty());
        assert_eq!(parts, before);
    }

    #[test]
    fn tree_without_apfs_volumes_is_a_no_op() {
        let fake = FakeInfo::new(&[]);
        let mut parts = listing(Vec::new());
        let before = parts.clone();

        backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
            .expect("no-op");

        assert!(fake.asked().is_empty());
        assert_eq!(parts, before);
    }

    #[test]
    fn keeps_successful_volumes_when_siblings_fail() {
        let fake = FakeInfo::new(&[
            ("disk1s1", Some("disk0s2")),
            ("disk1s3", Some("disk0s2")),
            ("disk1s4", None),
        ]);
        let mut parts = listing(vec![
            volume("disk1s1", None),
            volume("disk1s2", None),
            volume("disk1s3", None),
            volume("disk1s4", None),
        ]);
        let before_disk0 = parts.all_disks_and_partitions[0].clone();

        let error =
            backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
                .unwrap_err();

        assert_eq!(error.attempted, 4);
        assert_eq!(
            error.device_identifiers().collect::<Vec<_>>(),
            ["disk1s2", "disk1s4"]
        );
        assert!(matches!(error.failures[0].failure, BackfillFailure::Query(_)));
        assert!(matches!(error.failures[1].failure, BackfillFailure::StillAbsent));

        assert_eq!(parts.find_volume("disk1s1").unwrap().physical_store(), Some("disk0s2"));
        assert_eq!(parts.find_volume("disk1s3").unwrap().physical_store(), Some("disk0s2"));
        assert!(parts.find_volume("disk1s2").unwrap().needs_physical_store());
        assert!(parts.find_volume("disk1s4").unwrap().needs_physical_store());
        assert_eq!(parts.all_disks_and_partitions[0], before_disk0);
        assert_eq!(fake.asked().len(), 4);
    }

    #[test]
    fn container_inherits_recovered_stores() {
        let fake = FakeInfo::new(&[("disk1s1", Some("disk0s2")), ("disk1s2", Some("disk0s2"))]);
        let mut parts = listing(vec![volume("disk1s1", None), volume("disk1s2", None)]);

        backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
            .expect("backfill succeeds");

        let container = parts.find_disk("disk1").unwrap();
        assert_eq!(container.physical_stores().collect::<Vec<_>>(), ["disk0s2"]);
    }

    #[test]
    fn rejects_stores_outside_the_listing() {
        let fake = FakeInfo::new(&[("disk1s1", Some("disk9s2"))]);
        let mut parts = listing(vec![volume("disk1s1", None)]);

        let error =
            backfill_system_partitions(&mut parts, |id| fake.fetch(id), Strategy::Sequential)
                .unwrap_err();

        assert!(matches!(
            &error.failures[0].failure,
            BackfillFailure::UnknownStore(store) if store == "disk9s2"
        ));
        assert!(parts.find_volume("disk1s1").unwrap().needs_physical_store());
        assert!(parts.find_disk("disk1").unwrap().apfs_physical_stores.is_empty());
    }

    #[test]
    fn parallel_queries_patch_their_own_volumes() {
        let ids = ["disk1s1", "disk1s2", "disk1s3", "disk1s4", "disk1s5", "disk1s6"];
        let fake = FakeInfo::new(&[
            ("disk1s1", Some("disk0s2")),
            ("disk1s2", Some("disk0s2")),
            ("disk1s3", None),
            ("disk1s4", Some("disk0s2")),
            ("disk1s5", Some("disk0s2")),
            ("disk1s6", Some("disk0s2")),
        ]);
        let mut parts = listing(ids.iter().map(|id| volume(id, None)).collect());

        let error = backfill_system_partitions(
            &mut parts,
            |id| fake.fetch(id),
            Strategy::Parallel { threads: Some(3) },
        )
        .unwrap_err();

        assert_eq!(fake.asked(), ids);
        assert_eq!(error.device_identifiers().collect::<Vec<_>>(), ["disk1s3"]);
        for id in ids.iter().filter(|id| **id != "disk1s3") {
            assert_eq!(parts.find_volume(id).unwrap().physical_store(), Some("disk0s2"));
        }
    }

    #[test]
    fn single_record_is_patched_from_fresh_info() {
        let fake = FakeInfo::new(&[("disk1s1", Some("disk0s2"))]);
        let mut disk = DiskInfo {
            device_identifier: "disk1s1".to_string(),
            apfs_container_reference: Some("disk1".to_string()),
            ..Default::default()
        };

        backfill_disk_info(&mut disk, |id| fake.fetch(id)).expect("backfill succeeds");

        assert_eq!(disk.physical_store(), Some("disk0s2"));
        assert_eq!(fake.asked(), ["disk1s1"]);
    }

    #[test]
    fn single_record_failure_leaves_record_intact() {
        let fake = FakeInfo::new(&[("disk1s1", None)]);
        let mut disk = DiskInfo {
            device_identifier: "disk1s1".to_string(),
            filesystem_type: Some("apfs".to_string()),
            size: 42,
            ..Default::default()
        };
        let before = disk.clone();

        let error = backfill_disk_info(&mut disk, |id| fake.fetch(id)).unwrap_err();

        assert_eq!(error.attempted, 1);
        assert_eq!(error.device_identifiers().collect::<Vec<_>>(), ["disk1s1"]);
        assert_eq!(disk, before);
    }

    #[test]
    fn single_record_without_store_in_fresh_info_is_flagged() {
        let fake = FakeInfo::new(&[("disk1s2", None)]);
        let mut disk = DiskInfo {
            device_identifier: "disk1s2".to_string(),
            apfs_container_reference: Some("disk1".to_string()),
            ..Default::default()
        };

        let error = backfill_disk_info(&mut disk, |id| fake.fetch(id)).unwrap_err();

        assert_eq!(fake.asked(), ["disk1s2"]);
        assert_eq!(error.failures.len(), 1);
        assert!(matches!(error.failures[0].failure, BackfillFailure::StillAbsent));
        assert!(disk.needs_physical_store());
    }

    #[test]
    fn non_apfs_record_is_not_queried() {
        let fake = FakeInfo::new(&[]);
        let mut disk = DiskInfo {
            device_identifier: "disk0s1".to_string(),
            content: "EFI".to_string(),
            ..Default::default()
        };

        backfill_disk_info(&mut disk, |id| fake.fetch(id)).expect("no-op");
        assert!(fake.asked().is_empty());
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Release-aware diskutil wrapper
//!
//! [`Diskutil`] runs every read as invoke → decode → backfill. The backfill
//! step only happens for releases whose profile requires it, and its failure
//! never discards the decoded record: it comes back as the diagnostic of a
//! [`Fetched`] value instead.

use semver::Version;
use storage_types::{DiskInfo, SystemPartitions};
use tracing::{debug, info};

use crate::backfill::{self, Strategy};
use crate::command::{CommandBuilder, ContainerSize, DiskutilCommand};
use crate::config::Config;
use crate::decode::{Decoder, PlistDecoder};
use crate::error::{BackfillError, DiskutilError, Result};
use crate::release::{Product, Profile, Release};
use crate::runner::{CommandRunner, SystemRunner};

/// A decoded record plus an optional backfill diagnostic.
///
/// A diagnostic means the record is usable but some APFS volumes are still
/// missing their physical store.
#[derive(Debug)]
pub struct Fetched<T> {
    value: T,
    diagnostic: Option<BackfillError>,
}

impl<T> Fetched<T> {
    pub fn complete(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    pub fn incomplete(value: T, diagnostic: BackfillError) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn diagnostic(&self) -> Option<&BackfillError> {
        self.diagnostic.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.diagnostic.is_none()
    }

    pub fn into_parts(self) -> (T, Option<BackfillError>) {
        (self.value, self.diagnostic)
    }

    /// Treat an incomplete record as an error
    pub fn into_result(self) -> Result<T> {
        match self.diagnostic {
            None => Ok(self.value),
            Some(diagnostic) => Err(DiskutilError::Backfill(diagnostic)),
        }
    }
}

/// Operations offered on top of macOS diskutil
pub trait DiskUtility {
    /// Information for one disk, partition, container or volume
    fn info(&self, id: &str) -> Result<Fetched<DiskInfo>>;

    /// Every disk and partition, filtered by `args` as `diskutil list` would
    fn list(&self, args: &[String]) -> Result<Fetched<SystemPartitions>>;

    /// Repair the given disk. Needs root.
    fn repair_disk(&self, id: &str) -> Result<String>;

    /// Resize an APFS container; [`ContainerSize::Maximum`] grows it into
    /// all available space
    fn resize_container(&self, id: &str, size: &ContainerSize) -> Result<String>;
}

/// diskutil bound to one host release
pub struct Diskutil<R = SystemRunner, D = PlistDecoder> {
    product: Product,
    profile: Profile,
    commands: CommandBuilder,
    strategy: Strategy,
    runner: R,
    decoder: D,
}

impl Diskutil {
    /// Detect the host release and configure diskutil from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let sw_vers = config.sw_vers_path();
        let product = Product::detect(&SystemRunner, &sw_vers.to_string_lossy())?;
        Ok(Self::for_product(product, SystemRunner, PlistDecoder).with_config(config))
    }
}

impl<R: CommandRunner, D: Decoder> Diskutil<R, D> {
    /// Bind to the release named by `release` ("mojave", "big sur", ...)
    pub fn select(release: &str, version: Version, runner: R, decoder: D) -> Result<Self> {
        let release: Release = release.parse()?;
        Ok(Self::for_product(
            Product::new(release, version),
            runner,
            decoder,
        ))
    }

    pub fn for_product(product: Product, runner: R, decoder: D) -> Self {
        let profile = product.release.profile();
        info!(
            "Using {:?} diskutil profile for macOS {} {}",
            profile, product.release, product.version
        );

        Self {
            product,
            profile,
            commands: CommandBuilder::default(),
            strategy: Strategy::default(),
            runner,
            decoder,
        }
    }

    pub fn with_commands(mut self, commands: CommandBuilder) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_commands(config.commands())
            .with_strategy(config.strategy())
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn release(&self) -> Release {
        self.product.release
    }

    /// Exact product version; no behavior depends on it yet
    pub fn version(&self) -> &Version {
        &self.product.version
    }

    fn run(&self, command: &DiskutilCommand) -> Result<String> {
        let argv = self.commands.argv(command)?;
        debug!("diskutil: {}", command.operation());
        let output =
            self.runner
                .execute(&argv, None, &[])
                .map_err(|source| DiskutilError::Command {
                    operation: command.operation(),
                    stderr: source.stderr().to_string(),
                    source,
                })?;
        Ok(output.stdout)
    }

    /// Invoke and decode `diskutil info` without any backfill
    fn fetch_info(&self, id: &str) -> Result<DiskInfo> {
        let raw = self.run(&DiskutilCommand::Info { id: id.to_string() })?;
        self.decoder.decode_disk_info(raw.as_bytes())
    }

    /// Invoke and decode `diskutil list` without any backfill
    fn fetch_list(&self, args: &[String]) -> Result<SystemPartitions> {
        let raw = self.run(&DiskutilCommand::List {
            args: args.to_vec(),
        })?;
        self.decoder.decode_system_partitions(raw.as_bytes())
    }
}

impl<R: CommandRunner, D: Decoder> DiskUtility for Diskutil<R, D> {
    fn info(&self, id: &str) -> Result<Fetched<DiskInfo>> {
        let mut disk = self.fetch_info(id)?;

        if self.profile == Profile::Standard {
            return Ok(Fetched::complete(disk));
        }

        match backfill::backfill_disk_info(&mut disk, |id| self.fetch_info(id)) {
            Ok(()) => Ok(Fetched::complete(disk)),
            Err(diagnostic) => Ok(Fetched::incomplete(disk, diagnostic)),
        }
    }

    fn list(&self, args: &[String]) -> Result<Fetched<SystemPartitions>> {
        let mut partitions = self.fetch_list(args)?;

        if self.profile == Profile::Standard {
            return Ok(Fetched::complete(partitions));
        }

        match backfill::backfill_system_partitions(
            &mut partitions,
            |id| self.fetch_info(id),
            self.strategy,
        ) {
            Ok(()) => Ok(Fetched::complete(partitions)),
            Err(diagnostic) => Ok(Fetched::incomplete(partitions, diagnostic)),
        }
    }

    fn repair_disk(&self, id: &str) -> Result<String> {
        info!("Repairing disk {}", id);
        self.run(&DiskutilCommand::RepairDisk { id: id.to_string() })
    }

    fn resize_container(&self, id: &str, size: &ContainerSize) -> Result<String> {
        info!("Resizing container {} to {}", id, size);
        self.run(&DiskutilCommand::ResizeContainer {
            id: id.to_string(),
            size: size.clone(),
        })
    }
}

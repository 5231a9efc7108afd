// SPDX-License-Identifier: GPL-3.0-only

//! macOS diskutil operations for storage management
//!
//! This crate wraps the `diskutil` command-line tool:
//! - Reading disk information and the system partition listing as typed records
//! - Backfilling APFS physical stores on releases whose output omits them
//! - Repairing disks and resizing APFS containers
//!
//! Host release detection picks the behavior once; everything after that goes
//! through [`Diskutil`].

pub mod backfill;
pub mod command;
pub mod config;
pub mod decode;
pub mod diskutil;
pub mod error;
pub mod logging;
pub mod release;
pub mod runner;

pub use backfill::Strategy;
pub use command::{CommandBuilder, ContainerSize, DiskutilCommand};
pub use config::{Config, LogLevel};
pub use decode::{Decoder, PlistDecoder};
pub use diskutil::{DiskUtility, Diskutil, Fetched};
pub use error::{
    check_grow_free_space, BackfillError, BackfillFailure, DiskutilError, FreeSpaceError, Result,
    VolumeBackfillError, MINIMUM_GROW_FREE_SPACE,
};
pub use release::{Product, Profile, Release};
pub use runner::{CommandOutput, CommandRunner, RunError, SystemRunner};

// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::runner::RunError;

/// Minimum free space (in bytes) a container needs before diskutil's
/// `resizeContainer` is worth attempting.
pub const MINIMUM_GROW_FREE_SPACE: u64 = 1_000_000;

/// Error types for diskutil operations
#[derive(Error, Debug)]
pub enum DiskutilError {
    #[error("unsupported macOS release: {0}")]
    UnsupportedRelease(String),

    #[error("invalid product version {version:?}: {reason}")]
    InvalidProductVersion { version: String, reason: String },

    #[error("diskutil: failed to {operation}, stderr: [{stderr}]: {source}")]
    Command {
        operation: &'static str,
        stderr: String,
        #[source]
        source: RunError,
    },

    #[error("failed to decode {record} from diskutil output: {source}")]
    Decode {
        record: &'static str,
        #[source]
        source: plist::Error,
    },

    #[error(transparent)]
    Backfill(#[from] BackfillError),

    #[error(transparent)]
    FreeSpace(#[from] FreeSpaceError),

    #[error("invalid container size {0:?}")]
    InvalidSize(String),

    #[error("invalid device identifier {0:?}")]
    InvalidDeviceIdentifier(String),

    #[error("config {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl DiskutilError {
    /// Captured stderr of the failed command, if this error came from one
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Command { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type alias for diskutil operations
pub type Result<T> = std::result::Result<T, DiskutilError>;

/// Not enough free space to grow a container
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{free_space_bytes} bytes available")]
pub struct FreeSpaceError {
    free_space_bytes: u64,
}

impl FreeSpaceError {
    pub fn new(free_space_bytes: u64) -> Self {
        Self { free_space_bytes }
    }

    pub fn free_space_bytes(&self) -> u64 {
        self.free_space_bytes
    }
}

/// Check whether `free_space_bytes` is enough to grow a container.
///
/// diskutil enforces this itself; callers use it to skip a resize that
/// cannot succeed.
pub fn check_grow_free_space(free_space_bytes: u64) -> std::result::Result<(), FreeSpaceError> {
    if free_space_bytes <= MINIMUM_GROW_FREE_SPACE {
        return Err(FreeSpaceError::new(free_space_bytes));
    }
    Ok(())
}

/// Why a single volume's physical store could not be recovered
#[derive(Error, Debug)]
pub enum BackfillFailure {
    #[error("{0}")]
    Query(#[source] Box<DiskutilError>),

    #[error("physical store still absent")]
    StillAbsent,

    #[error("physical store {0} is not part of the listing")]
    UnknownStore(String),
}

/// A volume the reconciler could not patch
#[derive(Debug)]
pub struct VolumeBackfillError {
    pub device_identifier: String,
    pub failure: BackfillFailure,
}

impl fmt::Display for VolumeBackfillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device_identifier, self.failure)
    }
}

/// One or more volumes kept an empty physical store after backfill.
///
/// The record it accompanies is still usable; only the listed volumes are
/// missing their linkage.
#[derive(Error, Debug)]
#[error(
    "failed to backfill physical store for {} of {attempted} APFS volume(s): {}",
    .failures.len(),
    join_failures(.failures)
)]
pub struct BackfillError {
    pub attempted: usize,
    pub failures: Vec<VolumeBackfillError>,
}

impl BackfillError {
    /// Device identifiers left without a physical store
    pub fn device_identifiers(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .map(|failure| failure.device_identifier.as_str())
    }
}

fn join_failures(failures: &[VolumeBackfillError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

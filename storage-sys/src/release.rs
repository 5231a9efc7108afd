// SPDX-License-Identifier: GPL-3.0-only

//! Host release resolution
//!
//! diskutil's output differs between macOS releases. Every supported release
//! maps to one [`Profile`] here; the pipeline only ever looks at the profile.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use tracing::debug;

use crate::error::{DiskutilError, Result};
use crate::runner::CommandRunner;

/// How decoded records have to be treated after a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// diskutil output is complete
    Standard,
    /// diskutil leaves out APFS physical stores; they are fetched per volume
    BackfillRequired,
}

/// Supported macOS releases, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Release {
    Mojave,
    Catalina,
    BigSur,
    Monterey,
}

impl Release {
    pub const ALL: [Release; 4] = [
        Release::Mojave,
        Release::Catalina,
        Release::BigSur,
        Release::Monterey,
    ];

    pub fn profile(self) -> Profile {
        match self {
            Self::Mojave => Profile::BackfillRequired,
            Self::Catalina | Self::BigSur | Self::Monterey => Profile::Standard,
        }
    }

    /// Release shipped with the given `sw_vers -productVersion`
    pub fn for_version(version: &Version) -> Result<Self> {
        match (version.major, version.minor) {
            (10, 14) => Ok(Self::Mojave),
            (10, 15) => Ok(Self::Catalina),
            (11, _) => Ok(Self::BigSur),
            (12, _) => Ok(Self::Monterey),
            _ => Err(DiskutilError::UnsupportedRelease(version.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mojave => "Mojave",
            Self::Catalina => "Catalina",
            Self::BigSur => "Big Sur",
            Self::Monterey => "Monterey",
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Release {
    type Err = DiskutilError;

    fn from_str(identifier: &str) -> Result<Self> {
        let normalized: String = identifier
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "mojave" => Ok(Self::Mojave),
            "catalina" => Ok(Self::Catalina),
            "bigsur" => Ok(Self::BigSur),
            "monterey" => Ok(Self::Monterey),
            _ => Err(DiskutilError::UnsupportedRelease(identifier.to_string())),
        }
    }
}

/// The host's macOS product: release plus exact version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub release: Release,
    pub version: Version,
}

impl Product {
    pub fn new(release: Release, version: Version) -> Self {
        Self { release, version }
    }

    /// Parse `sw_vers -productVersion` output such as "10.14.6" or "12.1"
    pub fn from_product_version(raw: &str) -> Result<Self> {
        let version = parse_product_version(raw)?;
        let release = Release::for_version(&version)?;
        Ok(Self { release, version })
    }

    /// Ask the host for its product version
    pub fn detect<R: CommandRunner>(runner: &R, sw_vers: &str) -> Result<Self> {
        let argv = vec![sw_vers.to_string(), "-productVersion".to_string()];
        let output = runner
            .execute(&argv, None, &[])
            .map_err(|source| DiskutilError::Command {
                operation: "read the product version",
                stderr: source.stderr().to_string(),
                source,
            })?;

        let product = Self::from_product_version(&output.stdout)?;
        debug!("Detected macOS {} ({})", product.release, product.version);
        Ok(product)
    }
}

fn parse_product_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| DiskutilError::InvalidProductVersion {
        version: trimmed.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid("expected major[.minor[.patch]]"));
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| invalid("components must be numeric"))?;
    }

    Ok(Version::new(numbers[0], numbers[1], numbers[2]))
}

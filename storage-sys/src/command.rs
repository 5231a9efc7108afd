// SPDX-License-Identifier: GPL-3.0-only

//! diskutil argument vectors
//!
//! Structured output is requested with `-plist` for every read verb.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DiskutilError, Result};

/// Target size for `diskutil apfs resizeContainer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerSize {
    /// Grow into all available space
    Maximum,
    /// Human readable size such as "110g", "1.5t" or "50%"
    Explicit(String),
}

/// Units diskutil accepts after a size: bytes, powers of 1024, 512-byte
/// sectors and a percentage of the disk.
const SIZE_UNITS: &[char] = &['b', 'k', 'm', 'g', 't', 'p', 'e', 's', '%'];

impl FromStr for ContainerSize {
    type Err = DiskutilError;

    fn from_str(size: &str) -> Result<Self> {
        let trimmed = size.trim();
        let invalid = || DiskutilError::InvalidSize(size.to_string());

        let (magnitude, unit) = match trimmed.char_indices().last() {
            Some((index, last)) if last.is_ascii_alphabetic() || last == '%' => {
                (&trimmed[..index], Some(last.to_ascii_lowercase()))
            }
            Some(_) => (trimmed, None),
            None => return Err(invalid()),
        };

        if let Some(unit) = unit {
            if !SIZE_UNITS.contains(&unit) {
                return Err(invalid());
            }
        }

        let well_formed = !magnitude.is_empty()
            && magnitude.chars().all(|c| c.is_ascii_digit() || c == '.')
            && magnitude.chars().filter(|&c| c == '.').count() <= 1
            && magnitude.chars().any(|c| c.is_ascii_digit());
        if !well_formed {
            return Err(invalid());
        }

        let value: f64 = magnitude.parse().map_err(|_| invalid())?;
        if value == 0.0 {
            return Ok(Self::Maximum);
        }

        Ok(Self::Explicit(trimmed.to_string()))
    }
}

impl fmt::Display for ContainerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // diskutil reads a size of zero as "grow to the maximum"
            Self::Maximum => f.write_str("0"),
            Self::Explicit(size) => f.write_str(size),
        }
    }
}

/// Device identifiers are interpolated into a shell line for `repairDisk`,
/// so only plain identifiers like "disk2" or "disk1s3" are allowed.
pub fn validate_device_identifier(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DiskutilError::InvalidDeviceIdentifier(id.to_string()));
    }
    Ok(())
}

/// A diskutil invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskutilCommand {
    /// `diskutil list -plist [args...]`
    List { args: Vec<String> },
    /// `diskutil info -plist <id>`
    Info { id: String },
    /// `yes | diskutil repairDisk <id>` through a shell
    RepairDisk { id: String },
    /// `diskutil apfs resizeContainer <id> <size>`
    ResizeContainer { id: String, size: ContainerSize },
}

impl DiskutilCommand {
    /// Short description used in error messages
    pub fn operation(&self) -> &'static str {
        match self {
            Self::List { .. } => "list all disks",
            Self::Info { .. } => "fetch disk information",
            Self::RepairDisk { .. } => "repair the disk",
            Self::ResizeContainer { .. } => "resize the container",
        }
    }
}

/// Renders commands against a concrete diskutil binary and shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    diskutil: PathBuf,
    shell: PathBuf,
}

impl CommandBuilder {
    pub fn new(diskutil: impl Into<PathBuf>, shell: impl Into<PathBuf>) -> Self {
        Self {
            diskutil: diskutil.into(),
            shell: shell.into(),
        }
    }

    pub fn diskutil(&self) -> &Path {
        &self.diskutil
    }

    pub fn argv(&self, command: &DiskutilCommand) -> Result<Vec<String>> {
        let diskutil = self.diskutil.to_string_lossy().to_string();

        let argv = match command {
            DiskutilCommand::List { args } => {
                let mut argv = vec![diskutil, "list".to_string(), "-plist".to_string()];
                argv.extend(args.iter().cloned());
                argv
            }
            DiskutilCommand::Info { id } => {
                vec![diskutil, "info".to_string(), "-plist".to_string(), id.clone()]
            }
            DiskutilCommand::RepairDisk { id } => {
                validate_device_identifier(id)?;
                // repairDisk asks for confirmation on stdin
                vec![
                    self.shell.to_string_lossy().to_string(),
                    "-c".to_string(),
                    format!("yes | {diskutil} repairDisk {id}"),
                ]
            }
            DiskutilCommand::ResizeContainer { id, size } => vec![
                diskutil,
                "apfs".to_string(),
                "resizeContainer".to_string(),
                id.clone(),
                size.to_string(),
            ],
        };

        Ok(argv)
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new("/usr/sbin/diskutil", "/bin/zsh")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(raw: &str) -> ContainerSize {
        raw.parse().expect("valid size")
    }

    #[test]
    fn zero_means_grow_to_maximum() {
        assert_eq!(size("0"), ContainerSize::Maximum);
        assert_eq!(size("0g"), ContainerSize::Maximum);
        assert_eq!(size("0.0T"), ContainerSize::Maximum);
    }

    #[test]
    fn accepts_human_readable_sizes() {
        assert_eq!(size("110g"), ContainerSize::Explicit("110g".to_string()));
        assert_eq!(size(" 1.5t "), ContainerSize::Explicit("1.5t".to_string()));
        assert_eq!(size("50%"), ContainerSize::Explicit("50%".to_string()));
        assert_eq!(size("4096"), ContainerSize::Explicit("4096".to_string()));
    }

    #[test]
    fn rejects_malformed_sizes() {
        for raw in ["", "g", "12q", "1..5g", "-3g", "ten", "1 5g"] {
            assert!(
                matches!(raw.parse::<ContainerSize>(), Err(DiskutilError::InvalidSize(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn resize_to_zero_renders_grow_argument() {
        let argv = CommandBuilder::default()
            .argv(&DiskutilCommand::ResizeContainer {
                id: "disk1".to_string(),
                size: size("0"),
            })
            .unwrap();
        assert_eq!(
            argv,
            ["/usr/sbin/diskutil", "apfs", "resizeContainer", "disk1", "0"]
        );
    }

    #[test]
    fn list_forwards_filter_args_verbatim() {
        let argv = CommandBuilder::new("diskutil", "/bin/zsh")
            .argv(&DiskutilCommand::List {
                args: vec!["internal".to_string(), "physical".to_string()],
            })
            .unwrap();
        assert_eq!(argv, ["diskutil", "list", "-plist", "internal", "physical"]);
    }

    #[test]
    fn info_requests_plist() {
        let argv = CommandBuilder::new("diskutil", "/bin/zsh")
            .argv(&DiskutilCommand::Info {
                id: "disk1s1".to_string(),
            })
            .unwrap();
        assert_eq!(argv, ["diskutil", "info", "-plist", "disk1s1"]);
    }

    #[test]
    fn repair_runs_through_shell_with_confirmation() {
        let argv = CommandBuilder::new("diskutil", "/bin/bash")
            .argv(&DiskutilCommand::RepairDisk {
                id: "disk2".to_string(),
            })
            .unwrap();
        assert_eq!(argv, ["/bin/bash", "-c", "yes | diskutil repairDisk disk2"]);
    }

    #[test]
    fn repair_rejects_shell_metacharacters() {
        let result = CommandBuilder::default().argv(&DiskutilCommand::RepairDisk {
            id: "disk2; rm -rf /".to_string(),
        });
        assert!(matches!(
            result,
            Err(DiskutilError::InvalidDeviceIdentifier(_))
        ));
    }
}

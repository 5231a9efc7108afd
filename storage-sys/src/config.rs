// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use which::which;

use crate::backfill::Strategy;
use crate::command::CommandBuilder;
use crate::error::{DiskutilError, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "DISKUTIL_SYS_CONFIG";

const DEFAULT_DISKUTIL: &str = "/usr/sbin/diskutil";
const DEFAULT_SW_VERS: &str = "/usr/bin/sw_vers";
const DEFAULT_SHELL: &str = "/bin/zsh";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// diskutil binary; looked up in PATH when unset
    pub diskutil: Option<PathBuf>,
    /// sw_vers binary; looked up in PATH when unset
    pub sw_vers: Option<PathBuf>,
    /// Shell used to answer repairDisk's confirmation prompt
    pub shell: PathBuf,
    pub parallel_backfill: bool,
    pub backfill_threads: Option<usize>,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            diskutil: None,
            sw_vers: None,
            shell: PathBuf::from(DEFAULT_SHELL),
            parallel_backfill: false,
            backfill_threads: None,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let invalid = |reason: String| DiskutilError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: Config = toml::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load the file named by `DISKUTIL_SYS_CONFIG`, or defaults when unset
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn diskutil_path(&self) -> PathBuf {
        resolve_binary(self.diskutil.as_deref(), "diskutil", DEFAULT_DISKUTIL)
    }

    pub fn sw_vers_path(&self) -> PathBuf {
        resolve_binary(self.sw_vers.as_deref(), "sw_vers", DEFAULT_SW_VERS)
    }

    pub fn commands(&self) -> CommandBuilder {
        CommandBuilder::new(self.diskutil_path(), self.shell.clone())
    }

    pub fn strategy(&self) -> Strategy {
        if self.parallel_backfill {
            Strategy::Parallel {
                threads: self.backfill_threads,
            }
        } else {
            Strategy::Sequential
        }
    }
}

fn resolve_binary(configured: Option<&Path>, name: &str, fallback: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    which(name).unwrap_or_else(|_| PathBuf::from(fallback))
}

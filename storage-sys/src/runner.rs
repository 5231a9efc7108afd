// SPDX-License-Identifier: GPL-3.0-only

//! Subprocess execution
//!
//! Everything diskutil related goes through [`CommandRunner`] so the
//! pipeline can be driven by a scripted runner in tests.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, warn};

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Exit {
        command: String,
        status: String,
        output: CommandOutput,
    },
}

impl RunError {
    /// Standard error text captured before the failure, empty when the
    /// command never ran
    pub fn stderr(&self) -> &str {
        match self {
            Self::Exit { output, .. } => &output.stderr,
            Self::EmptyCommand | Self::Spawn { .. } => "",
        }
    }
}

/// Executes an argument vector and captures its output
pub trait CommandRunner: Send + Sync {
    fn execute(
        &self,
        argv: &[String],
        working_dir: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<CommandOutput, RunError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn execute(
        &self,
        argv: &[String],
        working_dir: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<CommandOutput, RunError> {
        (**self).execute(argv, working_dir, env)
    }
}

pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs commands as child processes of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(
        &self,
        argv: &[String],
        working_dir: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<CommandOutput, RunError> {
        let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;
        let rendered = render(argv);
        debug!("Running {}", rendered);

        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        command.envs(env.iter().map(|(key, value)| (key, value)));

        let output = command.output().map_err(|source| RunError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            warn!("{} failed: {}", rendered, captured.stderr.trim());
            return Err(RunError::Exit {
                command: rendered,
                status: output.status.to_string(),
                output: captured,
            });
        }

        Ok(captured)
    }
}

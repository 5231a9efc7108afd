// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogLevel};

/// Build the filter used by [`init`]: `RUST_LOG` wins, otherwise the
/// configured level applies to this crate and everything else.
pub fn env_filter(level: LogLevel) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = format!("storage_sys={}", level.as_directive())
        .parse()
        .context("invalid log directive for storage_sys")?;

    Ok(EnvFilter::new(level.as_directive()).add_directive(directive))
}

/// Install a stderr subscriber for processes embedding this crate
pub fn init(config: &Config) -> anyhow::Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter(config.log_level)?)
        .with(stderr_layer)
        .try_init()
        .context("failed to install tracing subscriber")
}

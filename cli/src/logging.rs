// Logging setup
//
// stderr always; a daily rolling file as well when `log_dir` is configured.
// `--log-level` wins over RUST_LOG, which wins over the "info" default.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "keybeacon.log";

pub fn env_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(level: Option<&str>, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter(level))
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter(level))
                .with(stderr_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_overrides_env() {
        let filter = env_filter(Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }
}

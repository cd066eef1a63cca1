use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Environment variable holding the log filter (e.g. "offgrid=debug").
pub const LOG_ENV: &str = "OFFGRID_LOG";

/// Install the global subscriber, writing to the configured log file.
///
/// The returned guard flushes the non-blocking writer on drop and must be held
/// for the lifetime of the process.
pub fn init(config: &Config) -> Result<WorkerGuard> {
  let path = config.log_path()?;
  let dir = path
    .parent()
    .ok_or_else(|| eyre!("Log path has no parent directory: {}", path.display()))?;
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Log path has no file name: {}", path.display()))?;

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

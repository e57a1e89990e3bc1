// Logging setup. The JSON-RPC channel owns stdout, so nothing here may ever
// write to it: all output goes to a daily-rolling file under
// .miller/logs/miller-YYYY-MM-DD.log. The returned guard must stay alive for
// the life of the process or buffered lines are lost.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber writing to the workspace log directory.
/// Filter comes from MILLER_LOG (or RUST_LOG), defaulting to `miller=info`.
pub fn init_logging(workspace_root: &Path) -> Result<WorkerGuard> {
    let logs_dir = workspace_root.join(".miller").join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("failed to create log directory {}", logs_dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("miller")
        .filename_suffix("log")
        .build(&logs_dir)
        .context("failed to create rolling log appender")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env("MILLER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("miller=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

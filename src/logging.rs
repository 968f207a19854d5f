use anyhow::Result;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,picta_downloader=debug";

/// Filter directive for a `-v`/`-q` balance: positive is louder
fn filter_for(verbosity: i8) -> &'static str {
    match verbosity {
        v if v > 0 => "debug",
        v if v < 0 => "warn",
        _ => DEFAULT_FILTER,
    }
}

/// Initialize structured logging to stderr.
///
/// `RUST_LOG` wins when set; otherwise `verbosity` picks the filter.
pub fn init_logging(verbosity: i8) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    tracing::debug!("logging initialized");
    Ok(())
}

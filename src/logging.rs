use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var consulted when `RUST_LOG` is not set.
pub const LOG_ENV: &str = "WEB_RECON_RS_LOGLEVEL";

/// Structured logs go to stderr; stdout carries results.
pub fn initialize_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV))
        .unwrap_or_else(|_| format!("{}={default_level}", env!("CARGO_CRATE_NAME")));

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(filter)?)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;
    Ok(())
}

//! LCFS compliance service binary
//!
//! Runs the background schedulers until Ctrl+C or SIGTERM.
//!
//! # Environment Variables
//!
//! * `LCFS__DATABASE__URL` - PostgreSQL connection string
//! * `LCFS__IDENTITY__JWT_SECRET` - shared HMAC secret for bearer tokens
//! * `LCFS__SCHEDULER__AUTO_SUBMIT_AFTER_DAYS` - default 30
//! * `LCFS__CONSUMER__POLL_INTERVAL_MS` - default 1000
//! * `LCFS__LOG_LEVEL` / `RUST_LOG` - log filter (default: info)
//! * `LCFS__LOG_FORMAT` - `pretty` or `json`

use anyhow::Context;

use interface_service::runtime::shutdown_signal;
use interface_service::telemetry::init_tracing;
use interface_service::{bootstrap, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServiceConfig::load().context("loading configuration")?;
    init_tracing(&config.log_level, config.log_format).context("initialising tracing")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting lcfs-service");
    let runtime = bootstrap(&config).await.context("starting runtime")?;

    shutdown_signal().await;
    runtime.shutdown().await;

    tracing::info!("lcfs-service stopped");
    Ok(())
}

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracker::logging::init_logging;
use tracker::services::{
    geolocation::{feed, spawn_line_reader, FixOptions},
    http_store::HttpStore,
    reporter::{DriverId, Reporter, REPORT_INTERVAL},
};
use url::Url;

/// Publishes this device's position for one driver. Reads `lat,lng` fixes
/// from stdin, one per line.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Driver id to report for.
    #[arg(long, env = "DRIVER_ID")]
    id: Option<String>,
    /// Driver link; its `id` parameter wins over `--id`.
    #[arg(long)]
    link: Option<String>,
    /// Tracker server to write to.
    #[arg(long, env = "TRACKER_SERVER", default_value = "http://127.0.0.1:3000")]
    server: Url,
    #[arg(long, default_value_t = REPORT_INTERVAL.as_millis() as u64)]
    interval_ms: u64,
    #[arg(long, default_value_t = 15_000)]
    fix_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let driver_id = match &cli.link {
        Some(link) => DriverId::from_link(link),
        None => DriverId::from_query(cli.id.as_deref()),
    };
    let driver_id = match driver_id {
        Ok(id) => id,
        Err(err) => {
            error!("{err}");
            return Err(err).context("cannot start reporting");
        }
    };

    let (handle, provider) = feed();
    spawn_line_reader(tokio::io::stdin(), handle);

    let reporter = Reporter::new(
        driver_id,
        Arc::new(provider),
        Arc::new(HttpStore::new(cli.server.clone())),
    )
    .with_period(Duration::from_millis(cli.interval_ms))
    .with_options(FixOptions {
        timeout: Duration::from_millis(cli.fix_timeout_ms),
        ..FixOptions::default()
    });

    let mut status = reporter.watch_status();
    info!("{}", *status.borrow_and_update());
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let line = status.borrow_and_update().replace('\n', " ");
            info!("{line}");
        }
    });

    info!(server = %cli.server, driver_id = %reporter.driver_id(), "reporting");
    reporter.run().await;
    Ok(())
}

//! elastic-echo: a benchmarking TCP echo server
//!
//! Clients send newline-terminated lines and get each line back verbatim.
//!
//! Features:
//! - A pool of accept workers, each serving one connection at a time
//! - A single coordinator task owning every counter, growing the pool under load
//! - A per-connection history written as a CSV report on shutdown
//! - Configuration via CLI arguments or TOML file

mod config;
mod coordinator;
mod error;
mod events;
mod handler;
mod record;
mod report;
mod server;
mod worker;

use config::Config;
use report::CsvReport;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status after a signal-triggered shutdown.
const SHUTDOWN_EXIT_CODE: i32 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        initial_workers = config.initial_workers,
        low_water_mark = config.low_water_mark,
        capacity_mode = ?config.capacity_mode,
        report_dir = %config.report_dir.display(),
        "Starting elastic-echo server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = config.threads {
        builder.worker_threads(threads);
    }
    let runtime = builder
        .enable_all()
        .build()
        .map_err(error::ServerError::Runtime)?;

    let sink = CsvReport::new(config.report_dir.clone());

    runtime.block_on(async {
        let server = Server::bind(config)?;
        server.run(sink, server::shutdown_signal()).await;
        Ok::<_, error::ServerError>(())
    })?;

    // Workers and open connections are abandoned, not drained.
    std::process::exit(SHUTDOWN_EXIT_CODE);
}

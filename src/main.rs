//! Application entry point for the ingestion + forecast training pipeline.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Starting the scheduler (C9): ingestion interval, daily training cron,
//!   and the initial-ingestion-then-train trigger
//! - Running until a shutdown signal arrives, then cancelling in-flight
//!   schedules and waiting for them to unwind
//!
//! # Exit codes
//! - `0` normal shutdown (ctrl-c, every schedule loop unwound cleanly)
//! - `1` fatal initialization error (config missing/invalid, DB unreachable)
//! - `2` unrecoverable schedule failure (a schedule loop panicked)
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**, or `DB_USER`/`DB_PASSWORD`/`DB_HOST`/`DB_NAME`)
//! - `SENSOR_BOX_ID`, `TARGET_SENSOR_ID` (**required**)
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`opensense_forecast_pipeline::config`] for the full list.
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use opensense_forecast_pipeline::clock::SystemClock;
use opensense_forecast_pipeline::opensensemap::OpenSenseMapClient;
use opensense_forecast_pipeline::scheduler::Scheduler;
use opensense_forecast_pipeline::store::PgStore;
use opensense_forecast_pipeline::weather::WeatherClient;
use opensense_forecast_pipeline::{config, schema};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store: Arc<dyn opensense_forecast_pipeline::store::SensorStore> = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn opensense_forecast_pipeline::clock::Clock> = Arc::new(SystemClock);
    let http = OpenSenseMapClient::default_client();
    let weather = WeatherClient::new(cfg.weather_api_base.clone(), cfg.sensor_latitude, cfg.sensor_longitude);
    let cfg = Arc::new(cfg);

    let scheduler = Scheduler::new(store, clock, http, weather, cfg);
    let cancel = CancellationToken::new();
    let handles = scheduler.start(cancel.clone());

    tracing::info!("scheduler started, running until shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, cancelling schedules");
    cancel.cancel();

    // §6 exit codes: a schedule loop that panicked rather than returning
    // cleanly after cancellation is an unrecoverable schedule failure (exit
    // 2), distinct from the clean-shutdown path (exit 0) and the fatal
    // startup path above (exit 1, via `?`).
    let mut unrecoverable = false;
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "schedule task panicked instead of shutting down cleanly");
            unrecoverable = true;
        }
    }

    if unrecoverable {
        tracing::error!("shutting down with an unrecoverable schedule failure");
        std::process::exit(2);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    let span_events = match env::var("SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

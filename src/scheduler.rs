//! Scheduler / workflow engine (C9).
//!
//! Three triggers share one store and client set: a recurring ingestion
//! interval under a `CANCEL_NEW` overlap policy, a daily local-time training
//! cron, and a one-shot "box absent at startup" trigger that kicks off the
//! first training run as soon as its ingestion completes cleanly. Grounded
//! in the teacher pack's `schedule_engine.rs` shape (one `tokio::spawn` loop
//! per schedule, `tokio::select!` against a `CancellationToken`).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Timelike, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::ingest;
use crate::opensensemap::OpenSenseMapClient;
use crate::store::SensorStore;
use crate::training;
use crate::weather::WeatherClient;

/// Shared context every schedule loop needs. Cloning is cheap: everything
/// inside is already an `Arc` or a cheaply-cloneable client.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn SensorStore>,
    clock: Arc<dyn Clock>,
    http: OpenSenseMapClient,
    weather: WeatherClient,
    config: Arc<Config>,
    /// `CANCEL_NEW`: held for the duration of one ingestion run; a schedule
    /// tick that finds it locked skips starting a new run instead of
    /// queueing behind it.
    ingestion_lock: Arc<Mutex<()>>,
    training_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SensorStore>,
        clock: Arc<dyn Clock>,
        http: OpenSenseMapClient,
        weather: WeatherClient,
        config: Arc<Config>,
    ) -> Self {
        Scheduler {
            store,
            clock,
            http,
            weather,
            config,
            ingestion_lock: Arc::new(Mutex::new(())),
            training_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Spawns the ingestion interval, the daily training cron, and the
    /// initial-ingestion trigger, returning once all three have been
    /// started. The returned handles join when `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);
        handles.push(self.clone().spawn_ingestion_interval(cancel.clone()));
        handles.push(self.clone().spawn_training_cron(cancel.clone()));
        handles.push(self.spawn_initial_ingestion(cancel));
        handles
    }

    fn spawn_ingestion_interval(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(StdDuration::from_secs(self.config.ingestion_interval_seconds.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.try_run_ingestion("interval").await;
                    }
                }
            }
        })
    }

    fn spawn_training_cron(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_fired_on = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let timezone: chrono_tz::Tz = match self.config.timezone.parse() {
                            Ok(tz) => tz,
                            Err(e) => {
                                error!(timezone = %self.config.timezone, error = %e, "invalid TIMEZONE, skipping cron tick");
                                continue;
                            }
                        };
                        let local_now = Utc::now().with_timezone(&timezone);
                        let today = local_now.date_naive();
                        let due = local_now.hour() == self.config.training_cron_hour
                            && local_now.minute() == self.config.training_cron_minute;
                        if due && last_fired_on != Some(today) {
                            last_fired_on = Some(today);
                            self.try_run_training().await;
                        }
                    }
                }
            }
        })
    }

    /// Runs ingestion once at startup if the target box has never been
    /// seen, then kicks a one-shot training run on its successful
    /// completion (§4.8: "on its successful completion it must kick a
    /// one-shot training run").
    fn spawn_initial_ingestion(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let already_present = match self.store.get_box(&self.config.sensor_box_id).await {
                Ok(existing) => existing.is_some(),
                Err(e) => {
                    error!(error = %e, "failed to check for existing box at startup");
                    return;
                }
            };
            if already_present {
                return;
            }

            info!(box_id = %self.config.sensor_box_id, "box absent at startup, running initial ingestion");
            if let Some(summary) = self.try_run_ingestion("initial").await {
                if summary.is_new_box && summary.all_succeeded() {
                    info!("initial ingestion succeeded, kicking one-shot training run");
                    self.try_run_training().await;
                }
            }
        })
    }

    /// `CANCEL_NEW`: if a previous ingestion run is still in flight,
    /// `try_lock` fails and this tick is dropped rather than queued.
    async fn try_run_ingestion(&self, trigger: &str) -> Option<ingest::IngestionSummary> {
        let guard = match self.ingestion_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(trigger, "ingestion already in progress, skipping this tick (CANCEL_NEW)");
                return None;
            }
        };

        let result = ingest::run_ingestion_cycle(
            &self.http,
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.config.sensor_box_id,
            Duration::days(self.config.initial_time_window_days),
            Duration::days(self.config.fetch_time_window_days),
            self.config.chunk_concurrency,
        )
        .await;

        drop(guard);

        match result {
            Ok(summary) => {
                info!(
                    trigger,
                    chunks = summary.chunks.len(),
                    clean = summary.all_succeeded(),
                    "ingestion cycle finished"
                );
                Some(summary)
            }
            Err(e) => {
                error!(trigger, error = %e, "ingestion cycle failed");
                None
            }
        }
    }

    async fn try_run_training(&self) {
        let guard = match self.training_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("training already in progress, skipping (at most one training run at a time)");
                return;
            }
        };

        let timezone: chrono_tz::Tz = match self.config.timezone.parse() {
            Ok(tz) => tz,
            Err(e) => {
                error!(timezone = %self.config.timezone, error = %e, "invalid TIMEZONE, aborting training run");
                return;
            }
        };

        let now = self.clock.now_utc();
        let result = training::run_training_cycle(
            self.store.as_ref(),
            &self.weather,
            &self.config.target_sensor_id,
            "temp_forecast",
            now,
            self.config.training_lookback_weeks,
            self.config.forecast_horizon,
            &self.config.model_path,
            &timezone,
            self.config.sensor_latitude,
            self.config.sensor_longitude,
            self.config.training_concurrency,
        )
        .await;

        drop(guard);

        match result {
            Ok(outcomes) => {
                let succeeded = outcomes.iter().filter(|o| o.error.is_none()).count();
                info!(succeeded, total = outcomes.len(), "training run finished");
            }
            Err(e) => {
                error!(error = %e, "training run failed outright");
            }
        }
    }
}

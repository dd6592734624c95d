use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, MAX_REFRESH_INTERVAL};
use crate::error::IngestError;
use crate::ingest::{Ingestor, Trigger};

const SECONDS_PER_DAY: i64 = 86_400;

/// Triggers an ingestion pass on wall-clock boundaries: every
/// `interval_minutes` counted from local midnight at a fixed UTC offset.
pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    interval_minutes: u64,
    offset: FixedOffset,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        ingestor: Arc<Ingestor>,
        interval_minutes: u64,
        utc_offset_minutes: i32,
    ) -> anyhow::Result<Self> {
        if !(1..=MAX_REFRESH_INTERVAL).contains(&interval_minutes) {
            anyhow::bail!(
                "scheduler interval must be between 1 and {} minutes",
                MAX_REFRESH_INTERVAL
            );
        }
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| anyhow::anyhow!("invalid UTC offset: {} minutes", utc_offset_minutes))?;

        Ok(Self {
            ingestor,
            interval_minutes,
            offset,
            handle: None,
        })
    }

    pub fn from_config(ingestor: Arc<Ingestor>, config: &Config) -> anyhow::Result<Self> {
        Self::new(ingestor, config.refresh_interval, config.utc_offset_minutes)
    }

    pub fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the timer task. Calling `start` on a started scheduler does nothing.
    pub fn start(&mut self, run_on_start: bool) {
        if self.is_started() {
            warn!("Scheduler already started");
            return;
        }

        info!(
            "Scheduling scrapes every {} minutes (UTC{})",
            self.interval_minutes, self.offset
        );

        let ingestor = self.ingestor.clone();
        let interval_minutes = self.interval_minutes;
        let offset = self.offset;
        self.handle = Some(tokio::spawn(async move {
            run_schedule(ingestor, interval_minutes, offset, run_on_start).await;
        }));
    }

    /// Abort the timer task. A run already in progress is aborted with it.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(
    ingestor: Arc<Ingestor>,
    interval_minutes: u64,
    offset: FixedOffset,
    run_on_start: bool,
) {
    if run_on_start {
        info!("Starting initial scrape");
        run_once(&ingestor, Trigger::Startup).await;
    }

    loop {
        let now = Utc::now();
        let next = next_tick(now, interval_minutes, offset);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        info!("Starting scheduled scrape");
        run_once(&ingestor, Trigger::Scheduled).await;
    }
}

async fn run_once(ingestor: &Ingestor, trigger: Trigger) {
    match ingestor.run(trigger).await {
        Ok(_) => {}
        Err(IngestError::AlreadyRunning) => {
            info!("Scrape already in progress, skipping {:?} run", trigger)
        }
        Err(e) => error!("Scrape failed: {}", e),
    }
}

/// First boundary strictly after `now`. Boundaries restart at local midnight,
/// so an interval that does not divide a day yields a short last slot.
pub fn next_tick(now: DateTime<Utc>, interval_minutes: u64, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let secs_today = i64::from(local.num_seconds_from_midnight());
    let step = interval_minutes.clamp(1, MAX_REFRESH_INTERVAL) as i64 * 60;

    let next = ((secs_today / step + 1) * step).min(SECONDS_PER_DAY);
    let nanos = i64::from(local.nanosecond().min(999_999_999));

    now + chrono::Duration::seconds(next - secs_today) - chrono::Duration::nanoseconds(nanos)
}

//! Quarterly scan trigger.
//!
//! Default schedule: 06:00 UTC on Jan 1, Apr 1, Jul 1 and Oct 1
//! (`0 0 6 1 1,4,7,10 *`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use super::engine::BatchScanner;
use super::types::ScanOptions;
use crate::error::FundamentalsError;

/// Fires a default-options scan whenever the cron schedule comes due.
pub struct ScanScheduler {
    scanner: Arc<BatchScanner>,
    schedule: Schedule,
    check_every: Duration,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<BatchScanner>, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("Invalid scan schedule cron: {}", expression))?;
        Ok(Self {
            scanner,
            schedule,
            check_every: Duration::from_secs(60),
        })
    }

    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether a scheduled time falls in `(last_run, now]`.
    ///
    /// With no previous scan on record the schedule is always due.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(last) => self.next_run_after(last).is_some_and(|next| next <= now),
        }
    }

    /// Start a scan if one is due. Returns the updated last-run time.
    pub async fn tick(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !self.is_due(last_run, now) {
            return last_run;
        }

        info!("Scheduled scan due");
        match self.scanner.run_scan(ScanOptions::default()).await {
            Ok(job) => info!(scan_id = job.id, "Scheduled scan started"),
            Err(FundamentalsError::ScanInProgress(id)) => {
                info!(scan_id = id, "Scheduled scan skipped, another scan is running")
            }
            Err(e) => error!(error = %e, "Scheduled scan failed to start"),
        }
        Some(now)
    }

    /// Run forever, resuming from the most recent scan on record.
    pub async fn run(self) {
        let mut last_run = match self.scanner.get_scan_status().await {
            Ok(job) => job.map(|j| j.created_at),
            Err(e) => {
                warn!(error = %e, "Could not read last scan, treating schedule as due");
                None
            }
        };
        info!(
            last_run = ?last_run,
            next = ?self.next_run_after(Utc::now()),
            "Scan scheduler started"
        );

        let mut ticker = interval(self.check_every);
        loop {
            ticker.tick().await;
            last_run = self.tick(last_run, Utc::now()).await;
        }
    }
}

//! Batch scan orchestration.
//!
//! ```text
//!   idle ──start──► running ──► completed   (failed symbols listed in error_message)
//!                      │
//!                      ├──────► failed      (universe or storage error)
//!                      └─sweep► failed      (age > 6h, or > 1h with no progress)
//! ```
//!
//! The `scan_jobs` row is the single source of truth for the running slot.
//! The scanner keeps only the running job id in memory for fast progress
//! writes and rehydrates it from the table after a restart.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zero_common::config::ScanSettings;

use super::types::{
    Page, PillarScanRow, ScanJob, ScanOptions, ScanOutcome, ScanResultsQuery, ScanStatus,
};
use super::universe::UniverseResolver;
use crate::data::FundamentalStore;
use crate::error::{FundamentalsError, Result};
use crate::pillars::SymbolScorer;

/// Failed symbols listed in a completed job's message.
const MAX_LISTED_FAILURES: usize = 50;

/// Runtime scan parameters.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub retry_delay: Duration,
    pub progress_interval: usize,
    pub stuck_after: chrono::Duration,
    pub stalled_after: chrono::Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ScannerSettings {
    fn from(s: &ScanSettings) -> Self {
        Self {
            batch_size: s.batch_size.max(1),
            batch_delay: Duration::from_millis(s.batch_delay_ms),
            retry_delay: Duration::from_millis(s.retry_delay_ms),
            progress_interval: s.progress_interval.max(1),
            stuck_after: chrono::Duration::hours(s.stuck_after_hours),
            stalled_after: chrono::Duration::minutes(s.stalled_after_minutes),
        }
    }
}

/// Scores a symbol universe in rate-limited batches.
pub struct BatchScanner {
    scorer: Arc<dyn SymbolScorer>,
    store: Arc<FundamentalStore>,
    universe: Arc<UniverseResolver>,
    settings: ScannerSettings,
    /// Cached id of the running job row
    current: Mutex<Option<i64>>,
}

impl BatchScanner {
    pub fn new(
        scorer: Arc<dyn SymbolScorer>,
        store: Arc<FundamentalStore>,
        universe: Arc<UniverseResolver>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            scorer,
            store,
            universe,
            settings,
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Force-fail running jobs that are too old or have stalled.
    ///
    /// Returns the ids of the jobs that were failed.
    pub async fn sweep_stuck_jobs(&self) -> Result<Vec<i64>> {
        let now = Utc::now();
        let mut swept = Vec::new();

        for job in self.store.running_scan_jobs().await? {
            let age = now - job.created_at;
            let reason = if age > self.settings.stuck_after {
                format!(
                    "Scan marked as stuck: running for {} hours",
                    age.num_hours()
                )
            } else if age > self.settings.stalled_after && job.stocks_processed == 0 {
                format!(
                    "Scan marked as stuck: no progress after {} minutes",
                    age.num_minutes()
                )
            } else {
                continue;
            };

            if self.store.fail_scan_job(job.id, &reason, now).await? {
                warn!(scan_id = job.id, reason = %reason, "Swept stuck scan job");
                swept.push(job.id);
            }
        }

        if !swept.is_empty() {
            let mut current = self.current.lock().await;
            if current.is_some_and(|id| swept.contains(&id)) {
                *current = None;
            }
        }
        Ok(swept)
    }

    // ========================================================================
    // Starting
    // ========================================================================

    /// Claim the running slot.
    async fn start_job(&self) -> Result<ScanJob> {
        self.sweep_stuck_jobs().await?;

        let mut current = self.current.lock().await;
        if let Some(id) = *current {
            match self.store.get_scan_job(id).await? {
                Some(job) if job.is_running() => {
                    return Err(FundamentalsError::ScanInProgress(id))
                }
                _ => *current = None,
            }
        }

        match self.store.try_start_scan_job(Utc::now()).await? {
            Some(job) => {
                *current = Some(job.id);
                info!(scan_id = job.id, "Scan job started");
                Ok(job)
            }
            None => {
                if let Some(running) = self.store.running_scan_jobs().await?.first() {
                    return Err(FundamentalsError::ScanInProgress(running.id));
                }
                // The holder finished between the insert and the lookup
                match self.store.try_start_scan_job(Utc::now()).await? {
                    Some(job) => {
                        *current = Some(job.id);
                        info!(scan_id = job.id, "Scan job started");
                        Ok(job)
                    }
                    None => Err(FundamentalsError::Storage(anyhow::anyhow!(
                        "running slot is held but no running scan job was found"
                    ))),
                }
            }
        }
    }

    /// Start a scan in the background and return the new job immediately.
    pub async fn run_scan(self: &Arc<Self>, options: ScanOptions) -> Result<ScanJob> {
        let job = self.start_job().await?;
        let scanner = Arc::clone(self);
        let spawned = job.clone();

        tokio::spawn(async move {
            if let Err(e) = scanner.execute(spawned, options).await {
                error!(error = %e, "Background scan failed");
            }
        });

        Ok(job)
    }

    /// Start a scan and wait for it to finish.
    pub async fn run_scan_to_completion(&self, options: ScanOptions) -> Result<ScanOutcome> {
        let job = self.start_job().await?;
        self.execute(job, options).await
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn execute(&self, job: ScanJob, options: ScanOptions) -> Result<ScanOutcome> {
        let started = Utc::now();
        let result = self.process(&job, &options).await;
        self.release(job.id).await;

        match result {
            Ok((analyzed, failed)) => {
                let message = failure_message(&failed);
                let now = Utc::now();
                let duration = (now - job.created_at).num_seconds().max(0);
                if !self
                    .store
                    .complete_scan_job(job.id, analyzed, now, duration, message.as_deref())
                    .await?
                {
                    warn!(scan_id = job.id, "Scan finished after it was no longer running");
                }
                info!(
                    scan_id = job.id,
                    analyzed,
                    failed = failed.len(),
                    elapsed_secs = (now - started).num_seconds(),
                    "Scan completed"
                );
                let job = self.store.get_scan_job(job.id).await?.unwrap_or(job);
                Ok(ScanOutcome {
                    job,
                    analyzed,
                    failed_symbols: failed,
                })
            }
            Err(e) => {
                error!(scan_id = job.id, error = %e, "Scan failed");
                self.store.fail_scan_job(job.id, &e.to_string(), Utc::now()).await?;
                Err(e)
            }
        }
    }

    async fn release(&self, id: i64) {
        let mut current = self.current.lock().await;
        if *current == Some(id) {
            *current = None;
        }
    }

    /// Resolve, batch, retry. Returns (analyzed, permanently failed).
    async fn process(&self, job: &ScanJob, options: &ScanOptions) -> Result<(usize, Vec<String>)> {
        let symbols = self.universe.resolve(options).await?;
        self.store.set_scan_total(job.id, symbols.len()).await?;

        let mut analyzed = 0usize;
        let mut processed = 0usize;
        let mut retry = Vec::new();
        let batches: Vec<&[String]> = symbols.chunks(self.settings.batch_size).collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            for symbol in batch {
                match self.scan_symbol(job.id, symbol).await {
                    Ok(()) => analyzed += 1,
                    Err(e) => {
                        warn!(
                            scan_id = job.id,
                            symbol = %symbol,
                            error = %e,
                            "Symbol failed, queued for retry"
                        );
                        retry.push(symbol.clone());
                    }
                }
                processed += 1;
                if processed % self.settings.progress_interval == 0 {
                    self.store
                        .update_scan_progress(job.id, analyzed, processed)
                        .await?;
                }
            }

            self.store
                .update_scan_progress(job.id, analyzed, processed)
                .await?;
            info!(
                scan_id = job.id,
                batch = i + 1,
                batches = batch_count,
                analyzed,
                pending_retry = retry.len(),
                "Batch complete"
            );

            if !self.still_running(job.id).await? {
                warn!(scan_id = job.id, "Scan no longer running, stopping");
                return Ok((analyzed, retry));
            }
        }

        let mut failed = Vec::new();
        if !retry.is_empty() {
            debug!(scan_id = job.id, count = retry.len(), "Retrying failed symbols");
            tokio::time::sleep(self.settings.retry_delay).await;

            for symbol in retry {
                match self.scan_symbol(job.id, &symbol).await {
                    Ok(()) => analyzed += 1,
                    Err(e) => {
                        warn!(
                            scan_id = job.id,
                            symbol = %symbol,
                            error = %e,
                            "Symbol failed on retry"
                        );
                        failed.push(symbol);
                    }
                }
            }
            self.store
                .update_scan_progress(job.id, analyzed, processed)
                .await?;
        }

        Ok((analyzed, failed))
    }

    async fn scan_symbol(&self, scan_id: i64, symbol: &str) -> Result<()> {
        let analysis = self.scorer.score_symbol(symbol, false).await?;
        let row = PillarScanRow::from_analysis(scan_id, &analysis);
        self.store.upsert_scan_row(&row).await?;
        Ok(())
    }

    async fn still_running(&self, id: i64) -> Result<bool> {
        Ok(self
            .store
            .get_scan_job(id)
            .await?
            .is_some_and(|j| j.status == ScanStatus::Running))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Running job if any, else the most recent one. Sweeps first.
    pub async fn get_scan_status(&self) -> Result<Option<ScanJob>> {
        self.sweep_stuck_jobs().await?;

        let cached = *self.current.lock().await;
        if let Some(id) = cached {
            if let Some(job) = self.store.get_scan_job(id).await? {
                return Ok(Some(job));
            }
        }
        Ok(self.store.latest_scan_job().await?)
    }

    /// Rows of the requested scan, or the latest completed (else running) one.
    pub async fn get_scan_results(&self, query: &ScanResultsQuery) -> Result<Page<PillarScanRow>> {
        let scan_id = match query.scan_id {
            Some(id) => Some(id),
            None => match self
                .store
                .latest_scan_job_with_status(ScanStatus::Completed)
                .await?
            {
                Some(job) => Some(job.id),
                None => self
                    .store
                    .latest_scan_job_with_status(ScanStatus::Running)
                    .await?
                    .map(|j| j.id),
            },
        };

        match scan_id {
            Some(id) => Ok(self.store.query_scan_rows(id, query).await?),
            None => Ok(Page::empty(query.page(), query.per_page())),
        }
    }
}

fn failure_message(failed: &[String]) -> Option<String> {
    if failed.is_empty() {
        return None;
    }
    let mut listed = failed
        .iter()
        .take(MAX_LISTED_FAILURES)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if failed.len() > MAX_LISTED_FAILURES {
        listed.push_str(&format!(", ... (+{})", failed.len() - MAX_LISTED_FAILURES));
    }
    Some(format!("{} symbol(s) failed: {}", failed.len(), listed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message() {
        assert!(failure_message(&[]).is_none());
        let msg = failure_message(&["AAA".into(), "BBB".into()]).unwrap();
        assert_eq!(msg, "2 symbol(s) failed: AAA, BBB");

        let many: Vec<String> = (0..60).map(|i| format!("S{}", i)).collect();
        let msg = failure_message(&many).unwrap();
        assert!(msg.starts_with("60 symbol(s) failed: S0, S1"));
        assert!(msg.ends_with("(+10)"));
    }

    #[test]
    fn test_settings_from_config() {
        let s = ScannerSettings::default();
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.batch_delay, Duration::from_secs(2));
        assert_eq!(s.progress_interval, 10);
        assert_eq!(s.stuck_after, chrono::Duration::hours(6));
        assert_eq!(s.stalled_after, chrono::Duration::minutes(60));
    }
}

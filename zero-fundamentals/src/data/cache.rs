//! Read-through cache of normalized financial periods.
//!
//! ```text
//!   get_financials(symbol, n, kind, force)
//!        │
//!        ├─ !force && cached rows fresh (< ttl) ──► return cached (newest first, ≤ n)
//!        │
//!        └─ gateway: standardized ──(fail/empty)──► reported ──(fail/empty)──► []
//!                       │                              │
//!                       └──────── normalize ───────────┘
//!                                    │
//!                           upsert all periods ──► return (newest first, ≤ n)
//! ```
//!
//! Provider failures on both endpoints produce an empty vector. Callers
//! decide whether fewer than two periods is an error.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::provider::MarketDataGateway;
use super::storage::FundamentalStore;
use super::{sort_most_recent_first, FinancialPeriod, PeriodKind};
use crate::normalize::Normalizer;

/// Default freshness window.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Financial period cache backed by [`FundamentalStore`].
pub struct FundamentalCache {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<FundamentalStore>,
    normalizer: Normalizer,
    ttl: Duration,
}

impl FundamentalCache {
    pub fn new(gateway: Arc<dyn MarketDataGateway>, store: Arc<FundamentalStore>) -> Self {
        Self {
            gateway,
            store,
            normalizer: Normalizer::new(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Periods for `symbol`, newest first, at most `periods_wanted`.
    pub async fn get_financials(
        &self,
        symbol: &str,
        periods_wanted: usize,
        kind: PeriodKind,
        force_refresh: bool,
        profile_shares_fallback: Option<f64>,
    ) -> Vec<FinancialPeriod> {
        if !force_refresh {
            if let Some(cached) = self.fresh_cached(symbol, periods_wanted, kind).await {
                debug!(symbol, kind = %kind, count = cached.len(), "Financials cache hit");
                return cached;
            }
        }

        debug!(symbol, kind = %kind, force_refresh, "Financials cache miss, fetching");

        let mut periods = self.fetch(symbol, kind, profile_shares_fallback).await;
        if periods.is_empty() {
            return periods;
        }

        sort_most_recent_first(&mut periods);
        if let Err(e) = self.store.upsert_periods(&periods).await {
            warn!(symbol, error = %e, "Failed to persist financial periods");
        }

        periods.truncate(periods_wanted);
        periods
    }

    /// Cached rows if every returned row is within the TTL.
    async fn fresh_cached(
        &self,
        symbol: &str,
        periods_wanted: usize,
        kind: PeriodKind,
    ) -> Option<Vec<FinancialPeriod>> {
        let cached = match self.store.get_periods(symbol, kind, periods_wanted).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to read cached financials");
                return None;
            }
        };

        let now = Utc::now();
        if cached.is_empty() || cached.iter().any(|p| p.is_stale(now, self.ttl)) {
            return None;
        }
        Some(cached)
    }

    /// Standardized endpoint first, reported second; first non-empty wins.
    async fn fetch(
        &self,
        symbol: &str,
        kind: PeriodKind,
        profile_shares_fallback: Option<f64>,
    ) -> Vec<FinancialPeriod> {
        let fetched_at = Utc::now();

        match self.gateway.get_financial_statements(symbol, kind).await {
            Ok(raw) => {
                let periods = self.normalizer.normalize_standardized(
                    symbol,
                    &raw,
                    kind,
                    profile_shares_fallback,
                    fetched_at,
                );
                if !periods.is_empty() {
                    info!(
                        symbol,
                        count = periods.len(),
                        source = "standardized",
                        concepts = self.normalizer.table_version(),
                        "Fetched financials"
                    );
                    return periods;
                }
            }
            Err(e) => {
                debug!(symbol, error = %e, "Standardized financials unavailable");
            }
        }

        match self.gateway.get_financials_reported(symbol, kind).await {
            Ok(raw) => {
                let periods = self.normalizer.normalize_reported(
                    symbol,
                    &raw,
                    kind,
                    profile_shares_fallback,
                    fetched_at,
                );
                if periods.is_empty() {
                    warn!(symbol, "Reported financials contained no usable periods");
                } else {
                    info!(
                        symbol,
                        count = periods.len(),
                        source = "reported",
                        concepts = self.normalizer.table_version(),
                        "Fetched financials"
                    );
                }
                periods
            }
            Err(e) => {
                warn!(symbol, error = %e, "Both financials endpoints failed");
                Vec::new()
            }
        }
    }
}

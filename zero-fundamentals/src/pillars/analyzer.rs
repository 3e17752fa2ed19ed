//! Per-symbol Eight Pillars analysis with a 24h read-through cache.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::aggregate::{aggregate, MAX_WINDOW};
use super::scorer::EightPillarsScorer;
use super::types::EightPillarsAnalysis;
use crate::data::{
    fiscal_year_end_closes, FundamentalCache, FundamentalStore, MarketDataGateway, PeriodKind,
};
use crate::error::{FundamentalsError, Result};

/// Anything that can score one symbol. The batch scanner depends on this.
#[async_trait]
pub trait SymbolScorer: Send + Sync {
    async fn score_symbol(&self, symbol: &str, force_refresh: bool) -> Result<EightPillarsAnalysis>;
}

/// Gateway + cache + scorer, with analysis results persisted per day.
pub struct PillarsAnalyzer {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<FundamentalStore>,
    cache: Arc<FundamentalCache>,
    scorer: EightPillarsScorer,
    ttl: Duration,
}

impl PillarsAnalyzer {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<FundamentalStore>,
        cache: Arc<FundamentalCache>,
    ) -> Self {
        let ttl = cache.ttl();
        Self {
            gateway,
            store,
            cache,
            scorer: EightPillarsScorer::new(),
            ttl,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn cached(&self, symbol: &str) -> Option<EightPillarsAnalysis> {
        let now = Utc::now();
        match self
            .store
            .get_pillar_analysis::<EightPillarsAnalysis>(symbol, now.date_naive(), now - self.ttl)
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to read cached pillar analysis");
                None
            }
        }
    }

    async fn analyze(&self, symbol: &str, force_refresh: bool) -> Result<EightPillarsAnalysis> {
        let profile = self.gateway.get_company_profile(symbol).await?;
        let quote = self.gateway.get_quote(symbol).await?;

        let periods = self
            .cache
            .get_financials(
                symbol,
                MAX_WINDOW,
                PeriodKind::Annual,
                force_refresh,
                profile.shares_outstanding(),
            )
            .await;

        let snapshot = aggregate(&periods).map_err(|e| match e {
            FundamentalsError::InsufficientData { detail, .. } => {
                FundamentalsError::insufficient(symbol, detail)
            }
            other => other,
        })?;

        // Monthly candles covering the oldest fiscal year onwards
        let from = snapshot
            .prior()
            .fiscal_year_end()
            .and_then(|end| (end - Duration::days(366)).and_hms_opt(0, 0, 0))
            .map(|start| Utc.from_utc_datetime(&start))
            .unwrap_or_else(|| Utc::now() - Duration::days(366 * MAX_WINDOW as i64));
        let prices = match self.gateway.get_stock_candles(symbol, "M", from, Utc::now()).await {
            Ok(candles) => fiscal_year_end_closes(&candles, &snapshot.periods),
            Err(e) => {
                warn!(symbol, error = %e, "Year-end prices unavailable, using current P/E");
                Default::default()
            }
        };
        let snapshot = snapshot.with_year_end_prices(prices);

        let mut analysis = self.scorer.score(
            symbol,
            &snapshot,
            profile.market_cap(),
            quote.price(),
            profile.shares_outstanding(),
        );
        analysis.company_name = profile.name.clone();
        analysis.industry = profile.industry.clone();
        Ok(analysis)
    }
}

#[async_trait]
impl SymbolScorer for PillarsAnalyzer {
    async fn score_symbol(
        &self,
        symbol: &str,
        force_refresh: bool,
    ) -> Result<EightPillarsAnalysis> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(FundamentalsError::InvalidInput("symbol is empty".into()));
        }

        if !force_refresh {
            if let Some(hit) = self.cached(&symbol).await {
                debug!(symbol = %symbol, "Pillar analysis cache hit");
                return Ok(hit);
            }
        }

        let analysis = self.analyze(&symbol, force_refresh).await?;

        if let Err(e) = self
            .store
            .save_pillar_analysis(&symbol, analysis.analysis_date, &analysis, analysis.analyzed_at)
            .await
        {
            warn!(symbol = %symbol, error = %e, "Failed to persist pillar analysis");
        }

        info!(
            symbol = %symbol,
            pillars_passed = analysis.pillars_passed,
            total_score = analysis.total_score(),
            "Scored symbol"
        );
        Ok(analysis)
    }
}

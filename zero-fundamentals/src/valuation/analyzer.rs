//! On-demand valuation of a symbol and user-owned snapshots.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::dcf::ValuationEngine;
use super::types::{DcfInputs, SavedValuation, ValuationRequest, ValuationResult};
use crate::data::{FundamentalCache, FundamentalStore, MarketDataGateway, PeriodKind};
use crate::error::{FundamentalsError, Result};
use crate::pillars::aggregate::{aggregate, MAX_WINDOW};

/// Resolves DCF inputs from market data and runs [`ValuationEngine`].
pub struct ValuationAnalyzer {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<FundamentalStore>,
    cache: Arc<FundamentalCache>,
    engine: ValuationEngine,
}

impl ValuationAnalyzer {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<FundamentalStore>,
        cache: Arc<FundamentalCache>,
        engine: ValuationEngine,
    ) -> Self {
        Self {
            gateway,
            store,
            cache,
            engine,
        }
    }

    /// Value `symbol` with defaults for anything `request` leaves out.
    pub async fn calculate_valuation(
        &self,
        symbol: &str,
        request: ValuationRequest,
    ) -> Result<ValuationResult> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(FundamentalsError::InvalidInput("symbol is empty".into()));
        }

        let profile = self.gateway.get_company_profile(&symbol).await?;
        let quote = self.gateway.get_quote(&symbol).await?;
        let beta = match self.gateway.get_basic_financials(&symbol).await {
            Ok(metrics) => metrics.beta(),
            Err(e) => {
                warn!(
                    symbol = %symbol,
                    error = %e,
                    "Basic financials unavailable, beta defaults to 1.0"
                );
                None
            }
        };

        let periods = self
            .cache
            .get_financials(
                &symbol,
                MAX_WINDOW,
                PeriodKind::Annual,
                false,
                profile.shares_outstanding(),
            )
            .await;
        let latest = periods
            .first()
            .ok_or_else(|| {
                FundamentalsError::insufficient(&symbol, "no annual financial periods")
            })?;
        let snapshot = aggregate(&periods).ok();

        let base_fcf = latest
            .free_cash_flow
            .or_else(|| snapshot.as_ref().and_then(|s| s.averages.free_cash_flow));
        let shares = latest
            .shares_outstanding
            .filter(|s| *s > 0.0)
            .or(profile.shares_outstanding())
            .ok_or_else(|| FundamentalsError::insufficient(&symbol, "shares outstanding unknown"))?;

        let growth = request.growth.unwrap_or_else(|| {
            self.engine
                .default_growth(snapshot.as_ref().and_then(|s| s.revenue_cagr()))
        });
        let beta = beta.unwrap_or(1.0);
        let discount = request
            .discount
            .unwrap_or_else(|| self.engine.default_discount(self.engine.capm(Some(beta))));

        let inputs = DcfInputs {
            symbol: symbol.clone(),
            base_fcf,
            base_earnings: latest.net_income,
            base_revenue: latest.revenue,
            shares_outstanding: shares,
            current_price: quote.price(),
            beta,
            growth,
            discount,
            margins: request.margins,
            pe_multiple: request.pe_multiple,
            fcf_multiple: request.fcf_multiple,
            projection_years: request
                .projection_years
                .unwrap_or(self.engine.settings().projection_years),
            terminal_growth: self.engine.settings().terminal_growth,
        };

        let result = self.engine.calculate_dcf(inputs)?;
        info!(
            symbol = %symbol,
            fair_value_medium = ?result.fair_value_medium,
            corrected = result.was_corrected(),
            "Valuation calculated"
        );
        Ok(result)
    }

    // ========================================================================
    // Saved Valuations
    // ========================================================================

    pub async fn save_valuation(
        &self,
        user_id: &str,
        name: &str,
        result: ValuationResult,
    ) -> Result<SavedValuation> {
        if user_id.trim().is_empty() {
            return Err(FundamentalsError::InvalidInput("user id is required".into()));
        }

        let saved = SavedValuation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            symbol: result.symbol.clone(),
            name: if name.trim().is_empty() {
                format!("{} valuation", result.symbol)
            } else {
                name.trim().to_string()
            },
            result,
            created_at: Utc::now(),
        };
        self.store.save_valuation(&saved).await?;
        Ok(saved)
    }

    pub async fn list_valuations(
        &self,
        user_id: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<SavedValuation>> {
        let symbol = symbol.map(|s| s.trim().to_uppercase());
        Ok(self.store.list_valuations(user_id, symbol.as_deref()).await?)
    }

    pub async fn get_valuation(&self, user_id: &str, id: &str) -> Result<SavedValuation> {
        self.store
            .get_valuation(user_id, id)
            .await?
            .ok_or_else(|| FundamentalsError::NotFound(format!("valuation {}", id)))
    }

    pub async fn delete_valuation(&self, user_id: &str, id: &str) -> Result<()> {
        if self.store.delete_valuation(user_id, id).await? {
            Ok(())
        } else {
            Err(FundamentalsError::NotFound(format!("valuation {}", id)))
        }
    }
}

//! Market data gateway contract.
//!
//! `MarketDataGateway` is the only way the pipeline talks to an external
//! market-data API. Every call may fail with a [`ProviderError`]; the cache
//! and normalizer layers turn those failures into "no data" rather than
//! propagating them, while `score_symbol` surfaces quote/profile failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{
    BasicFinancials, Candle, CompanyProfile, PeriodKind, Quote, ReportedFiling,
    StandardizedPeriod,
};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised by data providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),
    /// Invalid or expired token
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Provider quota exceeded
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },
    /// Nothing available for the requested symbol
    #[error("Data not available: {0}")]
    DataNotAvailable(String),
    /// Provider is temporarily down
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    /// Bad request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Unexpected payload or other provider-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {} seconds", secs))
        .unwrap_or_default()
}

impl ProviderError {
    /// Check if the error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Map an HTTP status to a provider error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            401 | 403 => Self::Auth(format!("HTTP {}: {}", status, snippet)),
            404 => Self::DataNotAvailable(format!("HTTP 404: {}", snippet)),
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            400 | 422 => Self::InvalidRequest(format!("HTTP {}: {}", status, snippet)),
            500..=599 => Self::Unavailable(format!("HTTP {}: {}", status, snippet)),
            _ => Self::Internal(format!("HTTP {}: {}", status, snippet)),
        }
    }
}

// ============================================================================
// Gateway Trait
// ============================================================================

/// Contract for external market data.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Pre-standardized statements (`financials` shape), one entry per period.
    async fn get_financial_statements(
        &self,
        symbol: &str,
        freq: PeriodKind,
    ) -> Result<Vec<StandardizedPeriod>, ProviderError>;

    /// SEC-style reported filings.
    async fn get_financials_reported(
        &self,
        symbol: &str,
        freq: PeriodKind,
    ) -> Result<Vec<ReportedFiling>, ProviderError>;

    /// Key metrics including beta.
    async fn get_basic_financials(&self, symbol: &str) -> Result<BasicFinancials, ProviderError>;

    /// Company profile with share count and market cap.
    async fn get_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError>;

    /// Latest quote.
    async fn get_quote(&self, symbol: &str) -> Result<Quote, ProviderError>;

    /// Historical bars. `resolution` uses provider codes ("D", "W", "M").
    async fn get_stock_candles(
        &self,
        symbol: &str,
        resolution: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// Member symbols of an index such as `^GSPC`.
    async fn get_index_constituents(&self, index_symbol: &str)
        -> Result<Vec<String>, ProviderError>;
}

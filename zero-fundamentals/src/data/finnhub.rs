//! Finnhub REST adapter.
//!
//! # Endpoints
//! - `/stock/financials` (standardized; fetched per statement and merged by period)
//! - `/stock/financials-reported` (SEC filings with raw `{concept, value}` lines)
//! - `/stock/metric`, `/stock/profile2`, `/quote`, `/stock/candle`
//! - `/index/constituents`
//!
//! # Rate Limits
//! Free tier allows 60 requests/minute. The limiter is acquired before every
//! request; the standardized statement fetch costs three tokens.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::provider::{MarketDataGateway, ProviderError};
use super::rate_limiter::{RateLimiter, SharedRateLimiter};
use super::{
    BasicFinancials, Candle, CompanyProfile, PeriodKind, Quote, ReportedFiling,
    StandardizedPeriod,
};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

const DEFAULT_RATE_LIMIT_RPM: u32 = 60;

/// Statement codes of the standardized endpoint
const STATEMENTS: [&str; 3] = ["bs", "ic", "cf"];

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StandardizedResponse {
    #[serde(default)]
    financials: Vec<StandardizedPeriod>,
}

#[derive(Debug, Deserialize)]
struct ReportedResponse {
    #[serde(default)]
    data: Vec<ReportedFiling>,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    #[serde(default)]
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ConstituentsResponse {
    #[serde(default)]
    constituents: Vec<String>,
}

// ============================================================================
// Finnhub Gateway
// ============================================================================

/// Finnhub implementation of [`MarketDataGateway`].
pub struct FinnhubGateway {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: SharedRateLimiter,
}

impl FinnhubGateway {
    /// Create a gateway against the public API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_RATE_LIMIT_RPM)
    }

    /// Create a gateway with a custom base URL and request budget.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        rate_limit_rpm: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let rate_limiter = Arc::new(RateLimiter::new("finnhub", rate_limit_rpm));
        debug!(rpm = rate_limit_rpm, burst = rate_limiter.capacity(), "Finnhub gateway configured");

        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            rate_limiter,
        }
    }

    /// Create from config. Returns `None` when no API key is configured.
    pub fn from_config(config: &zero_common::config::Config) -> Option<Self> {
        let api_key = config.finnhub_api_key()?;
        Some(Self::with_base_url(
            api_key,
            config.fundamentals.finnhub_base_url.clone(),
            config.fundamentals.rate_limit_rpm,
        ))
    }

    /// GET a JSON endpoint with rate limiting and status mapping.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from Finnhub");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("X-Finnhub-Token", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("Request timeout".into())
                } else if e.is_connect() {
                    ProviderError::Network("Connection failed".into())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Internal(format!("Failed to parse response: {}", e)))
    }
}

/// Merge per-statement standardized responses into one entry per period.
fn merge_statements(statements: Vec<Vec<StandardizedPeriod>>) -> Vec<StandardizedPeriod> {
    let mut merged: BTreeMap<String, StandardizedPeriod> = BTreeMap::new();

    for statement in statements {
        for period in statement {
            let key = period
                .period
                .clone()
                .or_else(|| period.year.map(|y| format!("{}-{}", y, period.quarter.unwrap_or(0))))
                .unwrap_or_default();
            if key.is_empty() {
                continue;
            }

            let entry = merged.entry(key).or_insert_with(|| StandardizedPeriod {
                period: period.period.clone(),
                year: period.year,
                quarter: period.quarter,
                values: BTreeMap::new(),
            });
            if entry.year.is_none() {
                entry.year = period.year;
            }
            if entry.quarter.is_none() {
                entry.quarter = period.quarter;
            }
            for (k, v) in period.values {
                entry.values.entry(k).or_insert(v);
            }
        }
    }

    merged.into_values().rev().collect()
}

fn candles_from_response(resp: CandleResponse) -> Result<Vec<Candle>, ProviderError> {
    if resp.s == "no_data" {
        return Ok(Vec::new());
    }
    if resp.s != "ok" {
        return Err(ProviderError::Internal(format!("Unexpected candle status: {}", resp.s)));
    }

    let len = [resp.t.len(), resp.o.len(), resp.h.len(), resp.l.len(), resp.c.len()]
        .into_iter()
        .min()
        .unwrap_or(0);

    let mut candles = Vec::with_capacity(len);
    for i in 0..len {
        let timestamp = Utc
            .timestamp_opt(resp.t[i], 0)
            .single()
            .ok_or_else(|| ProviderError::Internal(format!("Invalid timestamp: {}", resp.t[i])))?;
        candles.push(Candle {
            timestamp,
            open: resp.o[i],
            high: resp.h[i],
            low: resp.l[i],
            close: resp.c[i],
            volume: resp.v.get(i).copied().unwrap_or(0.0),
        });
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

// ============================================================================
// MarketDataGateway Implementation
// ============================================================================

#[async_trait]
impl MarketDataGateway for FinnhubGateway {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn get_financial_statements(
        &self,
        symbol: &str,
        freq: PeriodKind,
    ) -> Result<Vec<StandardizedPeriod>, ProviderError> {
        let mut statements = Vec::with_capacity(STATEMENTS.len());
        for statement in STATEMENTS {
            let resp: StandardizedResponse = self
                .get_json(
                    "/stock/financials",
                    &[
                        ("symbol", symbol.to_string()),
                        ("statement", statement.to_string()),
                        ("freq", freq.as_str().to_string()),
                    ],
                )
                .await?;
            statements.push(resp.financials);
        }

        let merged = merge_statements(statements);
        if merged.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "No standardized financials for {}",
                symbol
            )));
        }
        Ok(merged)
    }

    async fn get_financials_reported(
        &self,
        symbol: &str,
        freq: PeriodKind,
    ) -> Result<Vec<ReportedFiling>, ProviderError> {
        let resp: ReportedResponse = self
            .get_json(
                "/stock/financials-reported",
                &[("symbol", symbol.to_string()), ("freq", freq.as_str().to_string())],
            )
            .await?;

        if resp.data.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "No reported financials for {}",
                symbol
            )));
        }
        Ok(resp.data)
    }

    async fn get_basic_financials(&self, symbol: &str) -> Result<BasicFinancials, ProviderError> {
        self.get_json(
            "/stock/metric",
            &[("symbol", symbol.to_string()), ("metric", "all".to_string())],
        )
        .await
    }

    async fn get_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError> {
        let profile: CompanyProfile = self
            .get_json("/stock/profile2", &[("symbol", symbol.to_string())])
            .await?;

        // Unknown symbols come back as `{}`
        if profile.name.is_none() && profile.ticker.is_none() {
            return Err(ProviderError::DataNotAvailable(format!(
                "No profile for {}",
                symbol
            )));
        }
        Ok(profile)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        self.get_json("/quote", &[("symbol", symbol.to_string())]).await
    }

    async fn get_stock_candles(
        &self,
        symbol: &str,
        resolution: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ProviderError> {
        let resp: CandleResponse = self
            .get_json(
                "/stock/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", resolution.to_string()),
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                ],
            )
            .await?;
        candles_from_response(resp)
    }

    async fn get_index_constituents(
        &self,
        index_symbol: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let resp: ConstituentsResponse = self
            .get_json("/index/constituents", &[("symbol", index_symbol.to_string())])
            .await?;
        Ok(resp.constituents)
    }
}

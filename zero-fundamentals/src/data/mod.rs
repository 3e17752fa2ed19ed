//! Market data types, provider contract and local persistence.
//!
//! - [`provider`]: the `MarketDataGateway` contract every data source implements
//! - [`finnhub`]: REST adapter for the Finnhub API
//! - [`storage`]: SQLite store for periods, analyses, scan jobs and valuations
//! - [`cache`]: 24h read-through cache of normalized financial periods

pub mod cache;
pub mod finnhub;
pub mod provider;
pub mod rate_limiter;
pub mod storage;

pub use cache::FundamentalCache;
pub use finnhub::FinnhubGateway;
pub use provider::{MarketDataGateway, ProviderError};
pub use rate_limiter::{RateLimiter, SharedRateLimiter};
pub use storage::FundamentalStore;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Period Kind
// ============================================================================

/// Reporting frequency of a financial period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Annual,
    Quarterly,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarterly => "quarterly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "annual" | "a" | "10-k" => Some(Self::Annual),
            "quarterly" | "q" | "10-q" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Financial Period
// ============================================================================

/// One normalized fiscal period for one symbol.
///
/// Keyed by `(symbol, fiscal_year, period_kind, fiscal_quarter or 0)`.
/// Missing values stay `None`; nothing is zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialPeriod {
    pub symbol: String,
    pub fiscal_year: i32,
    pub fiscal_quarter: Option<u8>,
    pub period_kind: PeriodKind,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub operating_income: Option<f64>,
    pub gross_profit: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub total_equity: Option<f64>,
    pub long_term_debt: Option<f64>,
    pub short_term_debt: Option<f64>,
    pub total_debt: Option<f64>,
    pub cash: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub operating_cash_flow: Option<f64>,
    pub capital_expenditures: Option<f64>,
    pub dividends_paid: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub shares_basic: Option<f64>,
    pub shares_diluted: Option<f64>,
    pub eps: Option<f64>,
    pub filing_date: Option<NaiveDate>,
    /// Last day of the fiscal period, when the provider reports it
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

impl FinancialPeriod {
    /// Empty period with only the key fields set.
    pub fn new(
        symbol: impl Into<String>,
        fiscal_year: i32,
        period_kind: PeriodKind,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            fiscal_year,
            fiscal_quarter: None,
            period_kind,
            revenue: None,
            net_income: None,
            operating_income: None,
            gross_profit: None,
            total_assets: None,
            total_liabilities: None,
            total_equity: None,
            long_term_debt: None,
            short_term_debt: None,
            total_debt: None,
            cash: None,
            free_cash_flow: None,
            operating_cash_flow: None,
            capital_expenditures: None,
            dividends_paid: None,
            shares_outstanding: None,
            shares_basic: None,
            shares_diluted: None,
            eps: None,
            filing_date: None,
            period_end: None,
            fetched_at,
        }
    }

    /// Reported period end, or December 31 of the fiscal year.
    pub fn fiscal_year_end(&self) -> Option<NaiveDate> {
        self.period_end
            .or_else(|| NaiveDate::from_ymd_opt(self.fiscal_year, 12, 31))
    }

    /// Quarter component of the natural key (0 for annual periods).
    pub fn quarter_key(&self) -> u8 {
        self.fiscal_quarter.unwrap_or(0)
    }

    /// Reported EPS, or net income per share when EPS is missing.
    pub fn eps_or_derived(&self) -> Option<f64> {
        if self.eps.is_some() {
            return self.eps;
        }
        match (self.net_income, self.shares_outstanding) {
            (Some(ni), Some(shares)) if shares > 0.0 => Some(ni / shares),
            _ => None,
        }
    }

    /// Whether this row is older than `ttl` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.fetched_at > ttl
    }
}

/// Sort periods most-recent-first.
pub fn sort_most_recent_first(periods: &mut [FinancialPeriod]) {
    periods.sort_by(|a, b| {
        b.fiscal_year
            .cmp(&a.fiscal_year)
            .then_with(|| b.quarter_key().cmp(&a.quarter_key()))
    });
}

// ============================================================================
// Raw Statement Payloads
// ============================================================================

/// A single `{concept, value}` line of a reported statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedLine {
    pub concept: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl ReportedLine {
    /// Numeric value, accepting numbers or numeric strings.
    pub fn numeric(&self) -> Option<f64> {
        let value: Option<f64> = match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.replace(',', "").trim().parse().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Balance sheet, income statement and cash flow lines of one filing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSections {
    #[serde(default)]
    pub bs: Vec<ReportedLine>,
    #[serde(default)]
    pub ic: Vec<ReportedLine>,
    #[serde(default)]
    pub cf: Vec<ReportedLine>,
}

/// One SEC-style filing (`financials-reported` shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFiling {
    pub year: i32,
    #[serde(default)]
    pub quarter: Option<i32>,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub filed_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub report: ReportSections,
}

/// One period of the pre-standardized (`financials`) shape.
///
/// Statement values are kept as a sorted key/value map so normalization is
/// deterministic regardless of provider key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardizedPeriod {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub quarter: Option<i32>,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

/// Either raw statement shape for a single period.
#[derive(Debug, Clone, Copy)]
pub enum RawPeriod<'a> {
    Standardized(&'a StandardizedPeriod),
    Reported(&'a ReportedFiling),
}

// ============================================================================
// Market Data
// ============================================================================

/// Real-time quote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quote {
    /// Current price
    #[serde(rename = "c", default)]
    pub current: f64,
    #[serde(rename = "d", default)]
    pub change: Option<f64>,
    #[serde(rename = "dp", default)]
    pub percent_change: Option<f64>,
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
    #[serde(rename = "o", default)]
    pub open: Option<f64>,
    #[serde(rename = "pc", default)]
    pub previous_close: Option<f64>,
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

impl Quote {
    /// Current price, if the provider returned a usable one.
    pub fn price(&self) -> Option<f64> {
        (self.current.is_finite() && self.current > 0.0).then_some(self.current)
    }
}

/// Company profile. Market cap and share count are reported in millions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, rename = "finnhubIndustry")]
    pub industry: Option<String>,
    #[serde(default)]
    pub market_capitalization: Option<f64>,
    #[serde(default)]
    pub share_outstanding: Option<f64>,
}

impl CompanyProfile {
    /// Market capitalization in currency units.
    pub fn market_cap(&self) -> Option<f64> {
        self.market_capitalization
            .filter(|v| *v > 0.0)
            .map(|v| v * 1_000_000.0)
    }

    /// Shares outstanding as an absolute count.
    pub fn shares_outstanding(&self) -> Option<f64> {
        self.share_outstanding
            .filter(|v| *v > 0.0)
            .map(|v| v * 1_000_000.0)
    }
}

/// Key metrics (`stock/metric?metric=all`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicFinancials {
    #[serde(default)]
    pub metric: HashMap<String, serde_json::Value>,
}

impl BasicFinancials {
    fn number(&self, key: &str) -> Option<f64> {
        self.metric
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
    }

    pub fn beta(&self) -> Option<f64> {
        self.number("beta")
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Last close inside each period's fiscal year, keyed by fiscal year.
///
/// A bar counts when its timestamp falls in the year ending on the period's
/// end date. Periods with no such bar get no entry.
pub fn fiscal_year_end_closes(
    candles: &[Candle],
    periods: &[FinancialPeriod],
) -> BTreeMap<i32, f64> {
    let mut sorted: Vec<&Candle> = candles.iter().collect();
    sorted.sort_by_key(|c| c.timestamp);

    let mut closes = BTreeMap::new();
    for period in periods {
        let Some(end) = period.fiscal_year_end() else {
            continue;
        };
        let start = end - chrono::Duration::days(365);
        let close = sorted
            .iter()
            .rev()
            .map(|c| (c.timestamp.date_naive(), c.close))
            .find(|(day, _)| *day <= end)
            .filter(|(day, _)| *day > start)
            .map(|(_, close)| close);
        if let Some(close) = close {
            closes.insert(period.fiscal_year, close);
        }
    }
    closes
}

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use zero_common::config::Config;
use zero_fundamentals::data::{
    BasicFinancials, Candle, CompanyProfile, FundamentalStore, MarketDataGateway, PeriodKind,
    ProviderError, Quote, ReportedFiling, StandardizedPeriod,
};

/// One annual period in the provider's standardized shape.
#[derive(Debug, Clone, Copy)]
pub struct Annual {
    pub year: i32,
    pub revenue: f64,
    pub net_income: f64,
    pub operating_income: f64,
    pub equity: f64,
    pub free_cash_flow: f64,
    pub long_term_debt: f64,
    pub shares: f64,
    /// Month in which the fiscal year ends
    pub end_month: u32,
}

impl Annual {
    /// A profitable, modestly levered year.
    pub fn healthy(year: i32, revenue: f64) -> Self {
        Self {
            year,
            revenue,
            net_income: revenue * 0.2,
            operating_income: revenue * 0.3,
            equity: revenue,
            free_cash_flow: revenue * 0.25,
            long_term_debt: revenue * 0.5,
            shares: 100_000_000.0,
            end_month: 12,
        }
    }

    pub fn ending_in(mut self, month: u32) -> Self {
        self.end_month = month;
        self
    }

    /// Last day of the fiscal year.
    pub fn period_end(&self) -> NaiveDate {
        let (y, m) = if self.end_month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.end_month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1).expect("valid month").pred_opt().expect("valid day")
    }

    pub fn to_period(self) -> StandardizedPeriod {
        serde_json::from_value(json!({
            "period": self.period_end().to_string(),
            "year": self.year,
            "revenue": self.revenue,
            "netIncome": self.net_income,
            "operatingIncome": self.operating_income,
            "totalEquity": self.equity,
            "freeCashFlow": self.free_cash_flow,
            "longTermDebt": self.long_term_debt,
            "sharesOutstanding": self.shares,
        }))
        .expect("valid standardized period")
    }
}

/// In-memory gateway with call counters.
#[derive(Default)]
pub struct MockGateway {
    financials: Mutex<HashMap<String, Vec<StandardizedPeriod>>>,
    candles: Mutex<Vec<Candle>>,
    /// Symbols whose next profile call fails once
    fail_once: Mutex<HashSet<String>>,
    /// Symbols whose profile calls always fail
    always_fail: Mutex<HashSet<String>>,
    pub price: f64,
    pub beta: Option<f64>,
    pub statement_calls: AtomicU32,
    pub reported_calls: AtomicU32,
    pub profile_calls: AtomicU32,
    pub quote_calls: AtomicU32,
    pub candle_calls: AtomicU32,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            price: 50.0,
            beta: Some(1.0),
            ..Default::default()
        }
    }

    pub fn with_financials(self, symbol: &str, years: &[Annual]) -> Self {
        self.set_financials(symbol, years);
        self
    }

    pub fn set_financials(&self, symbol: &str, years: &[Annual]) {
        let periods = years.iter().map(|a| a.to_period()).collect();
        self.financials
            .lock()
            .unwrap()
            .insert(symbol.to_string(), periods);
    }

    /// Monthly bars as `(year, month, close)`, stamped on the first of the month.
    pub fn with_monthly_closes(self, closes: &[(i32, u32, f64)]) -> Self {
        let bars = closes
            .iter()
            .map(|&(y, m, close)| Candle {
                timestamp: Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0.0,
            })
            .collect();
        *self.candles.lock().unwrap() = bars;
        self
    }

    pub fn fail_once(&self, symbol: &str) {
        self.fail_once.lock().unwrap().insert(symbol.to_string());
    }

    pub fn always_fail(&self, symbol: &str) {
        self.always_fail.lock().unwrap().insert(symbol.to_string());
    }

    pub fn statement_calls(&self) -> u32 {
        self.statement_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_financial_statements(
        &self,
        symbol: &str,
        _freq: PeriodKind,
    ) -> Result<Vec<StandardizedPeriod>, ProviderError> {
        self.statement_calls.fetch_add(1, Ordering::SeqCst);
        self.financials
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no financials for {}", symbol)))
    }

    async fn get_financials_reported(
        &self,
        symbol: &str,
        _freq: PeriodKind,
    ) -> Result<Vec<ReportedFiling>, ProviderError> {
        self.reported_calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::DataNotAvailable(format!("no filings for {}", symbol)))
    }

    async fn get_basic_financials(&self, _symbol: &str) -> Result<BasicFinancials, ProviderError> {
        let mut metric = HashMap::new();
        if let Some(beta) = self.beta {
            metric.insert("beta".to_string(), json!(beta));
        }
        Ok(BasicFinancials { metric })
    }

    async fn get_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.lock().unwrap().contains(symbol) {
            return Err(ProviderError::Unavailable("provider down".into()));
        }
        if self.fail_once.lock().unwrap().remove(symbol) {
            return Err(ProviderError::RateLimited {
                retry_after_secs: None,
            });
        }
        Ok(CompanyProfile {
            name: Some(format!("{} Inc", symbol)),
            ticker: Some(symbol.to_string()),
            industry: Some("Technology".into()),
            share_outstanding: Some(100.0),
            ..Default::default()
        })
    }

    async fn get_quote(&self, _symbol: &str) -> Result<Quote, ProviderError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Quote {
            current: self.price,
            ..Default::default()
        })
    }

    async fn get_stock_candles(
        &self,
        _symbol: &str,
        _resolution: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candles
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= to)
            .cloned()
            .collect())
    }

    async fn get_index_constituents(
        &self,
        index_symbol: &str,
    ) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::DataNotAvailable(format!(
            "no constituents for {}",
            index_symbol
        )))
    }
}

pub fn memory_store() -> Arc<FundamentalStore> {
    Arc::new(FundamentalStore::in_memory().expect("in-memory store"))
}

/// Config with zero scan delays and the given curated universe.
pub fn fast_config(curated: &[&str]) -> Config {
    let mut config = Config::default();
    config.fundamentals.scan.batch_size = 10;
    config.fundamentals.scan.batch_delay_ms = 0;
    config.fundamentals.scan.retry_delay_ms = 0;
    config.fundamentals.scan.curated_symbols = curated.iter().map(|s| s.to_string()).collect();
    config
}

/// Five healthy years of growing revenue.
pub fn growing_history() -> Vec<Annual> {
    (2020..=2024)
        .zip([100.0, 110.0, 121.0, 133.0, 146.0])
        .map(|(year, revenue)| Annual::healthy(year, revenue * 1_000_000.0))
        .collect()
}

//! Symbol universe resolution.
//!
//! ```text
//!   Curated     ── config list, or the built-in list
//!   Russell2000 ── holdings CSV ─(missing/empty)─► universe cache (< N days)
//!                                  ─(stale/empty)─► gateway ^RUT ─► write cache
//!   Combined    ── ^GSPC + ^NDX + curated + Russell2000, first-seen order
//! ```

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zero_common::config::ScanSettings;

use super::types::{ScanOptions, Universe};
use crate::data::{FundamentalStore, MarketDataGateway};
use crate::error::Result;

pub const SP500_INDEX: &str = "^GSPC";
pub const NASDAQ100_INDEX: &str = "^NDX";
pub const RUSSELL2000_INDEX: &str = "^RUT";

/// Large-cap list used when no curated symbols are configured.
pub const DEFAULT_CURATED: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "BRK.B", "JPM", "V", "MA", "JNJ", "UNH",
    "PG", "HD", "KO", "PEP", "COST", "WMT", "MRK", "ABBV", "LLY", "AVGO", "ORCL", "ADBE", "CRM",
    "CSCO", "TXN", "QCOM", "INTC", "AMD", "NKE", "MCD", "SBUX", "DIS", "CMCSA", "VZ", "T", "XOM",
    "CVX", "COP", "BAC", "WFC", "GS", "MS", "AXP", "BLK", "SPGI", "MCO", "CAT", "DE", "HON", "UNP",
    "UPS", "LMT", "RTX", "TMO", "DHR", "ABT", "AMGN", "GILD", "BMY", "PFE", "MDT", "ISRG", "LOW",
    "TGT", "BKNG", "ADP", "INTU", "NOW",
];

/// Resolves the list of symbols a scan will process.
pub struct UniverseResolver {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<FundamentalStore>,
    curated: Vec<String>,
    russell_csv_path: Option<PathBuf>,
    cache_days: i64,
}

impl UniverseResolver {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<FundamentalStore>,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            curated: settings.curated_symbols.clone(),
            russell_csv_path: settings.russell_csv_path.clone(),
            cache_days: settings.universe_cache_days,
        }
    }

    pub async fn resolve(&self, options: &ScanOptions) -> Result<Vec<String>> {
        let symbols = match options.effective_universe() {
            Universe::Curated => self.curated(),
            Universe::Russell2000 => self.russell2000().await?,
            Universe::Combined => self.combined().await,
        };
        info!(
            universe = ?options.effective_universe(),
            count = symbols.len(),
            "Resolved scan universe"
        );
        Ok(symbols)
    }

    pub fn curated(&self) -> Vec<String> {
        if self.curated.is_empty() {
            dedupe(DEFAULT_CURATED.iter().map(|s| s.to_string()))
        } else {
            dedupe(self.curated.iter().cloned())
        }
    }

    /// CSV, then cache, then gateway.
    pub async fn russell2000(&self) -> Result<Vec<String>> {
        if let Some(path) = &self.russell_csv_path {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    let symbols = parse_holdings_csv(&content);
                    if !symbols.is_empty() {
                        debug!(
                            path = %path.display(),
                            count = symbols.len(),
                            "Russell 2000 from CSV"
                        );
                        return Ok(symbols);
                    }
                    warn!(path = %path.display(), "Russell 2000 CSV has no tickers");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Russell 2000 CSV unreadable"),
            }
        }

        self.index(RUSSELL2000_INDEX).await
    }

    /// Cached constituents if fresh, otherwise fetched and written back.
    async fn index(&self, index_symbol: &str) -> Result<Vec<String>> {
        let fresh_after = Utc::now() - Duration::days(self.cache_days);
        match self.store.get_universe(index_symbol, fresh_after).await {
            Ok(cached) if !cached.is_empty() => {
                debug!(index = index_symbol, count = cached.len(), "Universe cache hit");
                return Ok(cached);
            }
            Ok(_) => {}
            Err(e) => warn!(index = index_symbol, error = %e, "Failed to read universe cache"),
        }

        let symbols = dedupe(
            self.gateway
                .get_index_constituents(index_symbol)
                .await?
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty()),
        );

        if let Err(e) = self.store.save_universe(index_symbol, &symbols, Utc::now()).await {
            warn!(index = index_symbol, error = %e, "Failed to cache universe");
        }
        Ok(symbols)
    }

    /// Index members plus curated; an index that fails is skipped.
    async fn combined(&self) -> Vec<String> {
        let mut all = Vec::new();
        for index in [SP500_INDEX, NASDAQ100_INDEX] {
            match self.index(index).await {
                Ok(symbols) => all.extend(symbols),
                Err(e) => warn!(index, error = %e, "Skipping index in combined universe"),
            }
        }
        all.extend(self.curated());
        match self.russell2000().await {
            Ok(symbols) => all.extend(symbols),
            Err(e) => warn!(error = %e, "Skipping Russell 2000 in combined universe"),
        }
        dedupe(all)
    }
}

/// Remove duplicates, keeping first occurrence.
pub fn dedupe(symbols: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Tickers from an iShares-style holdings CSV.
///
/// Lines before the header row (the first containing a `Ticker` column) are
/// skipped. When an `Asset Class` column exists only `Equity` rows are kept.
pub fn parse_holdings_csv(content: &str) -> Vec<String> {
    let mut lines = content.lines();

    let (ticker_col, class_col) = loop {
        let Some(line) = lines.next() else {
            return Vec::new();
        };
        let header = split_csv_line(line);
        if let Some(t) = header.iter().position(|h| h.eq_ignore_ascii_case("ticker")) {
            let c = header.iter().position(|h| h.eq_ignore_ascii_case("asset class"));
            break (t, c);
        }
    };

    let mut tickers = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        let fields = split_csv_line(line);
        let Some(ticker) = fields.get(ticker_col) else {
            continue;
        };
        if let Some(c) = class_col {
            if fields.get(c).is_some_and(|class| !class.eq_ignore_ascii_case("equity")) {
                continue;
            }
        }
        let ticker = ticker.trim().to_uppercase();
        if is_ticker(&ticker) {
            tickers.push(ticker);
        }
    }
    dedupe(tickers)
}

fn is_ticker(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 10
        && s.chars().any(|c| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Split one CSV line, honoring double quotes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

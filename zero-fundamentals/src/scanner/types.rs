//! Scan job, scan row and query types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use crate::pillars::types::PILLAR_COUNT;
use crate::pillars::EightPillarsAnalysis;

/// Largest page size served by results queries.
pub const MAX_PER_PAGE: usize = 200;
pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PAGE: usize = i64::MAX as usize / MAX_PER_PAGE;

// ============================================================================
// Scan Job
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Unknown strings read back as `Failed`.
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Persisted state of one batch scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: i64,
    pub scan_date: NaiveDate,
    pub status: ScanStatus,
    pub total_stocks: usize,
    pub stocks_analyzed: usize,
    /// Symbols attempted, successful or not
    #[serde(default)]
    pub stocks_processed: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl ScanJob {
    pub fn is_running(&self) -> bool {
        self.status == ScanStatus::Running
    }

    /// Completion percentage, 0 when the universe size is not yet known.
    pub fn progress_pct(&self) -> f64 {
        if self.total_stocks == 0 {
            0.0
        } else {
            self.stocks_analyzed as f64 / self.total_stocks as f64 * 100.0
        }
    }
}

// ============================================================================
// Scan Options
// ============================================================================

/// Symbol universe for a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Universe {
    #[default]
    Curated,
    Russell2000,
    Combined,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub universe: Universe,
    /// Forces the Russell 2000 universe
    pub russell2000_only: bool,
}

impl ScanOptions {
    pub fn effective_universe(&self) -> Universe {
        if self.russell2000_only {
            Universe::Russell2000
        } else {
            self.universe
        }
    }
}

/// Final state of a scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub job: ScanJob,
    pub analyzed: usize,
    pub failed_symbols: Vec<String>,
}

// ============================================================================
// Scan Rows
// ============================================================================

/// One symbol's flattened result within a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarScanRow {
    pub scan_id: i64,
    pub symbol: String,
    pub passes: [bool; PILLAR_COUNT],
    pub scores: [u8; PILLAR_COUNT],
    pub pillars_passed: u8,
    pub total_score: u32,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub sector: Option<String>,
    pub company_name: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl PillarScanRow {
    pub fn from_analysis(scan_id: i64, analysis: &EightPillarsAnalysis) -> Self {
        Self {
            scan_id,
            symbol: analysis.symbol.clone(),
            passes: analysis.pass_flags(),
            scores: analysis.scores(),
            pillars_passed: analysis.pillars_passed,
            total_score: analysis.total_score(),
            current_price: analysis.current_price,
            market_cap: analysis.market_cap,
            sector: analysis.industry.clone(),
            company_name: analysis.company_name.clone(),
            analyzed_at: analysis.analyzed_at,
        }
    }
}

// ============================================================================
// Results Query
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    TotalScore,
    PillarsPassed,
    MarketCap,
    Symbol,
    CurrentPrice,
}

impl SortField {
    /// Column name; never derived from request text.
    pub fn column(&self) -> &'static str {
        match self {
            Self::TotalScore => "total_score",
            Self::PillarsPassed => "pillars_passed",
            Self::MarketCap => "market_cap",
            Self::Symbol => "symbol",
            Self::CurrentPrice => "current_price",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "total_score" | "score" => Some(Self::TotalScore),
            "pillars_passed" => Some(Self::PillarsPassed),
            "market_cap" => Some(Self::MarketCap),
            "symbol" => Some(Self::Symbol),
            "current_price" | "price" => Some(Self::CurrentPrice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Filter, pagination and sort for scan results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanResultsQuery {
    /// Defaults to the latest completed scan
    pub scan_id: Option<i64>,
    /// Pillars (1..=8) that must all have passed
    pub pillars: Vec<u8>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub sort: SortField,
    pub order: SortOrder,
}

impl ScanResultsQuery {
    /// 1-based page, capped so the row offset always fits an SQL integer.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> usize {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    /// Parse a comma-separated pillar list such as `"1,4,8"`.
    ///
    /// Entries outside 1..=8 or not numeric are dropped.
    pub fn parse_pillars(list: &str) -> Vec<u8> {
        let mut pillars: Vec<u8> = list
            .split(',')
            .filter_map(|p| p.trim().parse::<u8>().ok())
            .filter(|p| (1..=PILLAR_COUNT as u8).contains(p))
            .collect();
        pillars.sort_unstable();
        pillars.dedup();
        pillars
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, page: usize, per_page: usize) -> Self {
        let total_pages = if per_page == 0 { 0 } else { total.div_ceil(per_page) };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }

    pub fn empty(page: usize, per_page: usize) -> Self {
        Self::new(Vec::new(), 0, page, per_page)
    }
}

//! Financial statement normalization.
//!
//! Converts either raw statement shape into one canonical [`FinancialPeriod`]:
//!
//! ```text
//!   StandardizedPeriod ──┐                       ┌─► direct fields
//!                        ├─► ConceptTable::find ─┤
//!   ReportedFiling ──────┘   (bs / ic / cf)      └─► derivations
//!                                                     shares, FCF, total debt
//! ```
//!
//! Normalization is a pure function of its inputs: the same raw period,
//! profile share fallback and fetch time always yield the same record.

pub mod concepts;

pub use concepts::{ConceptField, ConceptTable, ConceptValue};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::data::{FinancialPeriod, PeriodKind, RawPeriod, ReportedFiling, StandardizedPeriod};
use crate::error::{FundamentalsError, Result};

/// Derived share counts outside this range are rejected.
pub const DERIVED_SHARES_MIN: f64 = 1_000_000.0;
pub const DERIVED_SHARES_MAX: f64 = 50_000_000_000.0;

/// Flattened statement lines of one raw period.
struct Lines<'a> {
    bs: Vec<ConceptValue<'a>>,
    ic: Vec<ConceptValue<'a>>,
    cf: Vec<ConceptValue<'a>>,
    /// Standardized payloads have no sections; search everything
    flat: bool,
}

impl<'a> Lines<'a> {
    fn from_reported(filing: &'a ReportedFiling) -> Self {
        let collect = |lines: &'a [crate::data::ReportedLine]| {
            lines
                .iter()
                .filter_map(|l| {
                    l.numeric().map(|value| ConceptValue {
                        concept: l.concept.as_str(),
                        value,
                    })
                })
                .collect::<Vec<_>>()
        };
        Self {
            bs: collect(&filing.report.bs),
            ic: collect(&filing.report.ic),
            cf: collect(&filing.report.cf),
            flat: false,
        }
    }

    fn from_standardized(period: &'a StandardizedPeriod) -> Self {
        let values = period
            .values
            .iter()
            .filter_map(|(k, v)| {
                v.as_f64()
                    .filter(|x| x.is_finite())
                    .map(|value| ConceptValue { concept: k.as_str(), value })
            })
            .collect();
        Self {
            bs: values,
            ic: Vec::new(),
            cf: Vec::new(),
            flat: true,
        }
    }

    fn find(&self, table: &ConceptTable, field: ConceptField) -> Option<f64> {
        if self.flat {
            return table.find(field, &self.bs);
        }
        let rule = table.rule(field)?;
        rule.statements.iter().find_map(|statement| {
            let lines = match statement {
                concepts::Statement::Bs => &self.bs,
                concepts::Statement::Ic => &self.ic,
                concepts::Statement::Cf => &self.cf,
            };
            table.find(field, lines)
        })
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Raw statement → [`FinancialPeriod`] converter.
#[derive(Clone)]
pub struct Normalizer {
    table: Arc<ConceptTable>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Normalizer using the built-in concept table.
    pub fn new() -> Self {
        Self::with_table(ConceptTable::builtin())
    }

    pub fn with_table(table: Arc<ConceptTable>) -> Self {
        Self { table }
    }

    pub fn table_version(&self) -> &str {
        &self.table.version
    }

    /// Normalize one raw period.
    ///
    /// Fails only when the period's fiscal year cannot be determined.
    pub fn normalize(
        &self,
        symbol: &str,
        raw: RawPeriod<'_>,
        requested: PeriodKind,
        profile_shares_fallback: Option<f64>,
        fetched_at: DateTime<Utc>,
    ) -> Result<FinancialPeriod> {
        let (lines, mut period) = match raw {
            RawPeriod::Reported(filing) => {
                let kind = kind_from_form(&filing.form).unwrap_or(requested);
                let filing_date = filing.filed_date.as_deref().and_then(parse_filing_date);

                let mut period = FinancialPeriod::new(symbol, filing.year, kind, fetched_at);
                period.filing_date = filing_date;
                period.period_end = filing.end_date.as_deref().and_then(parse_filing_date);
                if kind == PeriodKind::Quarterly {
                    period.fiscal_quarter =
                        filing_date.and_then(|d| infer_quarter(d.month(), filing.quarter));
                }
                (Lines::from_reported(filing), period)
            }
            RawPeriod::Standardized(std_period) => {
                let year = std_period
                    .year
                    .or_else(|| {
                        std_period
                            .period
                            .as_deref()
                            .and_then(parse_filing_date)
                            .map(|d| d.year())
                    })
                    .ok_or_else(|| {
                        FundamentalsError::InvalidInput(format!(
                            "Standardized period for {} has no fiscal year",
                            symbol
                        ))
                    })?;

                let mut period = FinancialPeriod::new(symbol, year, requested, fetched_at);
                period.period_end = std_period.period.as_deref().and_then(parse_filing_date);
                if requested == PeriodKind::Quarterly {
                    period.fiscal_quarter = std_period
                        .quarter
                        .filter(|q| (1..=4).contains(q))
                        .map(|q| q as u8);
                }
                (Lines::from_standardized(std_period), period)
            }
        };

        let table = self.table.as_ref();
        let find = |field| lines.find(table, field);

        period.revenue = find(ConceptField::Revenue);
        period.net_income = find(ConceptField::NetIncome);
        period.operating_income = find(ConceptField::OperatingIncome);
        period.gross_profit = find(ConceptField::GrossProfit);
        period.total_assets = find(ConceptField::TotalAssets);
        period.total_liabilities = find(ConceptField::TotalLiabilities);
        period.total_equity = find(ConceptField::TotalEquity);
        period.long_term_debt = find(ConceptField::LongTermDebt);
        period.short_term_debt = find(ConceptField::ShortTermDebt);
        period.cash = find(ConceptField::Cash);
        period.operating_cash_flow = find(ConceptField::OperatingCashFlow);
        period.capital_expenditures = find(ConceptField::CapitalExpenditures);
        period.dividends_paid = find(ConceptField::DividendsPaid);
        period.shares_basic = find(ConceptField::SharesBasic);
        period.shares_diluted = find(ConceptField::SharesDiluted);
        period.eps = find(ConceptField::Eps);

        period.total_debt = total_debt(period.long_term_debt, period.short_term_debt);
        period.free_cash_flow = free_cash_flow(
            period.operating_cash_flow,
            period.capital_expenditures,
            find(ConceptField::FreeCashFlow),
        );
        period.shares_outstanding = resolve_shares(
            find(ConceptField::SharesOutstanding),
            period.shares_basic,
            period.shares_diluted,
            find(ConceptField::NetIncomeToCommon),
            period.net_income,
            find(ConceptField::EpsBasic),
            profile_shares_fallback,
        );

        Ok(period)
    }

    /// Normalize every standardized period, dropping malformed ones.
    pub fn normalize_standardized(
        &self,
        symbol: &str,
        periods: &[StandardizedPeriod],
        requested: PeriodKind,
        profile_shares_fallback: Option<f64>,
        fetched_at: DateTime<Utc>,
    ) -> Vec<FinancialPeriod> {
        periods
            .iter()
            .filter_map(|p| {
                self.normalize(
                    symbol,
                    RawPeriod::Standardized(p),
                    requested,
                    profile_shares_fallback,
                    fetched_at,
                )
                    .map_err(|e| warn!(symbol, error = %e, "Skipping standardized period"))
                    .ok()
            })
            .filter(|p| p.period_kind == requested)
            .collect()
    }

    /// Normalize every reported filing of the requested kind.
    ///
    /// When a provider returns several filings for the same key (amendments),
    /// the latest filing wins.
    pub fn normalize_reported(
        &self,
        symbol: &str,
        filings: &[ReportedFiling],
        requested: PeriodKind,
        profile_shares_fallback: Option<f64>,
        fetched_at: DateTime<Utc>,
    ) -> Vec<FinancialPeriod> {
        let mut periods: Vec<FinancialPeriod> = Vec::new();

        for filing in filings {
            let period = match self.normalize(
                symbol,
                RawPeriod::Reported(filing),
                requested,
                profile_shares_fallback,
                fetched_at,
            ) {
                Ok(p) if p.period_kind == requested => p,
                Ok(_) => continue,
                Err(e) => {
                    warn!(symbol, error = %e, "Skipping reported filing");
                    continue;
                }
            };

            match periods.iter_mut().find(|p| {
                p.fiscal_year == period.fiscal_year && p.quarter_key() == period.quarter_key()
            }) {
                Some(existing) if existing.filing_date < period.filing_date => {
                    debug!(symbol, year = period.fiscal_year, "Newer filing replaces earlier one");
                    *existing = period;
                }
                Some(_) => {}
                None => periods.push(period),
            }
        }

        periods
    }
}

// ============================================================================
// Derivations
// ============================================================================

/// Long-term plus short-term debt; `None` only when both are missing.
pub fn total_debt(long_term: Option<f64>, short_term: Option<f64>) -> Option<f64> {
    match (long_term, short_term) {
        (None, None) => None,
        (lt, st) => Some(lt.unwrap_or(0.0) + st.unwrap_or(0.0)),
    }
}

/// Operating cash flow minus |capex|.
///
/// Falls back to operating cash flow alone when capex is missing, then to a
/// directly reported free cash flow line. Never invented from zero.
pub fn free_cash_flow(
    operating_cash_flow: Option<f64>,
    capex: Option<f64>,
    reported_fcf: Option<f64>,
) -> Option<f64> {
    match (operating_cash_flow, capex) {
        (Some(ocf), Some(capex)) => Some(ocf - capex.abs()),
        (Some(ocf), None) => Some(ocf),
        (None, _) => reported_fcf,
    }
}

fn within_share_bounds(shares: f64) -> bool {
    shares.is_finite() && (DERIVED_SHARES_MIN..=DERIVED_SHARES_MAX).contains(&shares)
}

/// Shares outstanding fallback chain.
///
/// direct → weighted average (basic, then diluted) → NI to common ÷ basic EPS
/// → NI ÷ basic EPS → profile figure. Derived values must lie within
/// [`DERIVED_SHARES_MIN`, `DERIVED_SHARES_MAX`].
pub fn resolve_shares(
    direct: Option<f64>,
    weighted_basic: Option<f64>,
    weighted_diluted: Option<f64>,
    net_income_to_common: Option<f64>,
    net_income: Option<f64>,
    eps_basic: Option<f64>,
    profile_fallback: Option<f64>,
) -> Option<f64> {
    let positive = |v: Option<f64>| v.filter(|x| x.is_finite() && *x > 0.0);

    if let Some(shares) = positive(direct)
        .or_else(|| positive(weighted_basic))
        .or_else(|| positive(weighted_diluted))
    {
        return Some(shares);
    }

    let derive = |ni: Option<f64>| match (ni, eps_basic) {
        (Some(ni), Some(eps)) if eps != 0.0 => Some(ni / eps).filter(|s| within_share_bounds(*s)),
        _ => None,
    };

    derive(net_income_to_common)
        .or_else(|| derive(net_income))
        .or_else(|| positive(profile_fallback))
}

/// Fiscal quarter from the month a 10-Q was filed.
///
/// Filings in Apr–Jun report Q1, Jul–Sep Q2, Oct–Dec Q3. A 10-Q filed in
/// Jan–Mar belongs to an off-calendar fiscal year; the provider's quarter is
/// used when valid, otherwise Q4.
pub fn infer_quarter(filing_month: u32, provider_quarter: Option<i32>) -> Option<u8> {
    match filing_month {
        4..=6 => Some(1),
        7..=9 => Some(2),
        10..=12 => Some(3),
        1..=3 => Some(
            provider_quarter
                .filter(|q| (1..=4).contains(q))
                .map(|q| q as u8)
                .unwrap_or(4),
        ),
        _ => None,
    }
}

fn kind_from_form(form: &str) -> Option<PeriodKind> {
    let form = form.trim().to_ascii_uppercase();
    if form.starts_with("10-K") || form.starts_with("20-F") || form.starts_with("40-F") {
        Some(PeriodKind::Annual)
    } else if form.starts_with("10-Q") {
        Some(PeriodKind::Quarterly)
    } else {
        None
    }
}

fn parse_filing_date(s: &str) -> Option<NaiveDate> {
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

//! Trailing-window aggregates over annual periods.
//!
//! ```text
//!   periods (any order, any kind)
//!        │  annual only, one per fiscal year, ≤ 5 most recent
//!        ▼
//!   window (oldest → newest)
//!        ├─ prior   = window[0]
//!        ├─ current = window[n-1]
//!        ├─ totals / averages (missing values skipped)
//!        └─ per-year series: ROIC, P/E (with year-end prices)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{FinancialPeriod, PeriodKind};
use crate::error::{FundamentalsError, Result};

/// Tax rate applied to operating income for NOPAT.
pub const TAX_RATE: f64 = 0.21;

/// Invested capital at or below this magnitude is excluded from ROIC.
pub const MIN_INVESTED_CAPITAL: f64 = 0.01;

/// Maximum number of annual periods in the window.
pub const MAX_WINDOW: usize = 5;

/// Sums over the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub net_income: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub revenue: Option<f64>,
}

/// Means over the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub equity: Option<f64>,
    pub debt: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub net_income: Option<f64>,
    pub operating_income: Option<f64>,
    pub revenue: Option<f64>,
}

/// A ratio for one fiscal year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnualRatio {
    pub fiscal_year: i32,
    pub value: f64,
}

/// Derived view over the most recent annual periods.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSnapshot {
    pub symbol: String,
    /// Oldest first
    pub periods: Vec<FinancialPeriod>,
    pub periods_analyzed: usize,
    pub years_span: i32,
    pub totals: Totals,
    pub averages: Averages,
    pub roic_series: Vec<AnnualRatio>,
    pub year_end_prices: BTreeMap<i32, f64>,
}

/// Build a snapshot from cached periods.
///
/// Quarterly rows are ignored. Fewer than two annual periods is
/// [`FundamentalsError::InsufficientData`].
pub fn aggregate(periods: &[FinancialPeriod]) -> Result<AggregateSnapshot> {
    let mut by_year: BTreeMap<i32, &FinancialPeriod> = BTreeMap::new();
    for p in periods.iter().filter(|p| p.period_kind == PeriodKind::Annual) {
        match by_year.get(&p.fiscal_year) {
            Some(existing) if existing.fetched_at >= p.fetched_at => {}
            _ => {
                by_year.insert(p.fiscal_year, p);
            }
        }
    }

    let symbol = periods
        .first()
        .map(|p| p.symbol.clone())
        .unwrap_or_default();

    if by_year.len() < 2 {
        return Err(FundamentalsError::insufficient(
            if symbol.is_empty() { "unknown".to_string() } else { symbol },
            format!("{} annual period(s), at least 2 required", by_year.len()),
        ));
    }

    let skip = by_year.len().saturating_sub(MAX_WINDOW);
    let window: Vec<FinancialPeriod> = by_year.into_values().skip(skip).cloned().collect();

    let years_span = window[window.len() - 1].fiscal_year - window[0].fiscal_year;

    let totals = Totals {
        net_income: sum(window.iter().map(|p| p.net_income)),
        free_cash_flow: sum(window.iter().map(|p| p.free_cash_flow)),
        revenue: sum(window.iter().map(|p| p.revenue)),
    };

    let averages = Averages {
        equity: mean(window.iter().map(|p| p.total_equity)),
        debt: mean(window.iter().map(debt_of)),
        free_cash_flow: mean(window.iter().map(|p| p.free_cash_flow)),
        net_income: mean(window.iter().map(|p| p.net_income)),
        operating_income: mean(window.iter().map(|p| p.operating_income)),
        revenue: mean(window.iter().map(|p| p.revenue)),
    };

    let roic_series = window
        .iter()
        .filter_map(|p| {
            roic(p).map(|value| AnnualRatio {
                fiscal_year: p.fiscal_year,
                value,
            })
        })
        .collect();

    Ok(AggregateSnapshot {
        symbol,
        periods_analyzed: window.len(),
        years_span,
        periods: window,
        totals,
        averages,
        roic_series,
        year_end_prices: BTreeMap::new(),
    })
}

impl AggregateSnapshot {
    /// Attach year-end closing prices used by [`Self::annual_pe_series`].
    pub fn with_year_end_prices(mut self, prices: BTreeMap<i32, f64>) -> Self {
        self.year_end_prices = prices;
        self
    }

    pub fn current(&self) -> &FinancialPeriod {
        &self.periods[self.periods.len() - 1]
    }

    /// Oldest period in the window.
    pub fn prior(&self) -> &FinancialPeriod {
        &self.periods[0]
    }

    /// Compound annual growth of `field` over up to `years` years, using the
    /// actual fiscal-year distance between the endpoints.
    pub fn cagr(
        &self,
        field: impl Fn(&FinancialPeriod) -> Option<f64>,
        years: usize,
    ) -> Option<f64> {
        let end = self.current();
        let start_idx = self.periods.len().saturating_sub(years + 1);
        let start = &self.periods[start_idx];
        cagr(field(start)?, field(end)?, (end.fiscal_year - start.fiscal_year) as f64)
    }

    pub fn revenue_cagr(&self) -> Option<f64> {
        self.cagr(|p| p.revenue, MAX_WINDOW)
    }

    /// Mean of `num / den` over up to `years` most recent periods with `den > 0`.
    pub fn average_margin(
        &self,
        num: impl Fn(&FinancialPeriod) -> Option<f64>,
        den: impl Fn(&FinancialPeriod) -> Option<f64>,
        years: usize,
    ) -> Option<f64> {
        mean(self.periods.iter().rev().take(years).map(|p| match (num(p), den(p)) {
            (Some(n), Some(d)) if d > 0.0 => Some(n / d),
            _ => None,
        }))
    }

    /// Mean ROIC (fraction) over years with valid invested capital.
    pub fn average_roic(&self) -> Option<f64> {
        mean(self.roic_series.iter().map(|r| Some(r.value)))
    }

    /// Year-end price divided by that year's EPS, negative values kept.
    pub fn annual_pe_series(&self) -> Vec<AnnualRatio> {
        self.periods
            .iter()
            .filter_map(|p| {
                let price = self.year_end_prices.get(&p.fiscal_year)?;
                let eps = p.eps_or_derived().filter(|e| *e != 0.0)?;
                let value = price / eps;
                value.is_finite().then_some(AnnualRatio {
                    fiscal_year: p.fiscal_year,
                    value,
                })
            })
            .collect()
    }
}

/// `(end / start)^(1 / span) - 1`, or `None` for non-positive inputs.
pub fn cagr(start: f64, end: f64, span_years: f64) -> Option<f64> {
    if start <= 0.0 || end <= 0.0 || span_years <= 0.0 {
        return None;
    }
    let value = (end / start).powf(1.0 / span_years) - 1.0;
    value.is_finite().then_some(value)
}

/// NOPAT over invested capital for one period.
///
/// Equity and operating income are required; missing debt or cash count as 0.
pub fn roic(period: &FinancialPeriod) -> Option<f64> {
    let operating_income = period.operating_income?;
    let equity = period.total_equity?;
    let invested = equity + debt_of(period).unwrap_or(0.0) - period.cash.unwrap_or(0.0);
    if invested.abs() <= MIN_INVESTED_CAPITAL {
        return None;
    }
    Some(operating_income * (1.0 - TAX_RATE) / invested)
}

fn debt_of(period: &FinancialPeriod) -> Option<f64> {
    period.total_debt.or(match (period.long_term_debt, period.short_term_debt) {
        (None, None) => None,
        (l, s) => Some(l.unwrap_or(0.0) + s.unwrap_or(0.0)),
    })
}

fn sum(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.flatten().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

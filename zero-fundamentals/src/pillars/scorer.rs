//! Eight Pillars scoring over an [`AggregateSnapshot`].
//!
//! Each pillar is computed independently. Missing inputs produce
//! [`PillarValue::Unavailable`] with a reason and a failed pillar; scoring
//! itself never errors.

use chrono::Utc;
use serde_json::json;

use super::aggregate::AggregateSnapshot;
use super::types::{EightPillarsAnalysis, Pillar, PillarResult, PillarValue};

/// Growth cap when the sign flips between prior and current.
pub const SIGN_FLIP_CAP: f64 = 1000.0;

/// Growth reported when the prior value is exactly zero.
pub const ZERO_BASE_GROWTH: f64 = 100.0;

/// Stateless scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EightPillarsScorer;

impl EightPillarsScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score all eight pillars.
    pub fn score(
        &self,
        symbol: &str,
        aggregate: &AggregateSnapshot,
        market_cap: Option<f64>,
        current_price: Option<f64>,
        shares_outstanding: Option<f64>,
    ) -> EightPillarsAnalysis {
        let current = aggregate.current();
        let prior = aggregate.prior();

        let shares = current
            .shares_outstanding
            .filter(|s| *s > 0.0)
            .or(shares_outstanding.filter(|s| *s > 0.0));

        let market_cap = market_cap.filter(|m| *m > 0.0).or(match (current_price, shares) {
            (Some(price), Some(shares)) if price > 0.0 => Some(price * shares),
            _ => None,
        });

        let pillars = vec![
            pe_pillar(aggregate, current_price, shares),
            roic_pillar(aggregate),
            shares_pillar(current.shares_outstanding.or(shares), prior.shares_outstanding),
            growth_pillar(
                Pillar::FreeCashFlowGrowth,
                current.free_cash_flow,
                prior.free_cash_flow,
            ),
            growth_pillar(Pillar::NetIncomeGrowth, current.net_income, prior.net_income),
            growth_pillar(Pillar::RevenueGrowth, current.revenue, prior.revenue),
            debt_pillar(aggregate),
            market_cap_pillar(aggregate, market_cap),
        ];

        let pillars_passed = pillars.iter().filter(|p| p.passed).count() as u8;
        let now = Utc::now();

        EightPillarsAnalysis {
            symbol: symbol.to_string(),
            analysis_date: now.date_naive(),
            market_cap,
            current_price,
            shares_outstanding: shares,
            pillars,
            pillars_passed,
            company_name: None,
            industry: None,
            periods_analyzed: aggregate.periods_analyzed,
            years_span: aggregate.years_span,
            analyzed_at: now,
        }
    }
}

// ============================================================================
// Pillars
// ============================================================================

fn pe_pillar(
    aggregate: &AggregateSnapshot,
    current_price: Option<f64>,
    shares: Option<f64>,
) -> PillarResult {
    let series = aggregate.annual_pe_series();
    if !series.is_empty() {
        let avg = series.iter().map(|r| r.value).sum::<f64>() / series.len() as f64;
        let years: Vec<_> = series
            .iter()
            .map(|r| json!({"year": r.fiscal_year, "pe": r.value}))
            .collect();
        return PillarResult::new(
            Pillar::PeRatio,
            PillarValue::ok(avg),
            avg > 0.0 && avg < 22.5,
            json!({"method": "annual_average", "years": years}),
        );
    }

    let current = aggregate.current();
    let eps = current.eps_or_derived().or(match (current.net_income, shares) {
        (Some(ni), Some(s)) if s > 0.0 => Some(ni / s),
        _ => None,
    });

    match (current_price, eps) {
        (Some(price), Some(eps)) if eps != 0.0 => {
            let pe = price / eps;
            PillarResult::new(
                Pillar::PeRatio,
                PillarValue::ok(pe),
                pe > 0.0 && pe < 22.5,
                json!({"method": "current", "price": price, "eps": eps}),
            )
        }
        _ => PillarResult::new(
            Pillar::PeRatio,
            PillarValue::unavailable("No year-end prices or earnings to compute P/E"),
            false,
            json!({"price": current_price, "eps": eps}),
        ),
    }
}

fn roic_pillar(aggregate: &AggregateSnapshot) -> PillarResult {
    let years: Vec<_> = aggregate
        .roic_series
        .iter()
        .map(|r| json!({"year": r.fiscal_year, "roic": r.value * 100.0}))
        .collect();

    match aggregate.average_roic() {
        Some(avg) => {
            let pct = avg * 100.0;
            PillarResult::new(
                Pillar::Roic,
                PillarValue::ok(pct),
                pct > 10.0,
                json!({"years": years}),
            )
        }
        None => PillarResult::new(
            Pillar::Roic,
            PillarValue::unavailable(
                "No year with operating income, equity and non-zero invested capital",
            ),
            false,
            json!({"years": years}),
        ),
    }
}

fn shares_pillar(current: Option<f64>, prior: Option<f64>) -> PillarResult {
    let data = json!({"current": current, "prior": prior});
    match (current, prior) {
        (Some(c), Some(p)) if p > 0.0 => {
            let change = (c - p) / p * 100.0;
            PillarResult::new(
                Pillar::SharesOutstanding,
                PillarValue::ok(change),
                change <= 0.0,
                data,
            )
        }
        _ => PillarResult::new(
            Pillar::SharesOutstanding,
            PillarValue::unavailable("Shares outstanding missing for current or prior period"),
            false,
            data,
        ),
    }
}

/// Growth pillar: passes exactly when `current > prior`.
pub fn growth_pillar(pillar: Pillar, current: Option<f64>, prior: Option<f64>) -> PillarResult {
    let data = json!({"current": current, "prior": prior});
    match (current, prior) {
        (Some(c), Some(p)) => {
            PillarResult::new(pillar, PillarValue::ok(growth_rate(c, p)), c > p, data)
        }
        _ => PillarResult::new(
            pillar,
            PillarValue::unavailable(format!(
                "{} missing for current or prior period",
                metric_name(pillar)
            )),
            false,
            data,
        ),
    }
}

/// Sign-aware percentage growth from `prior` to `current`.
///
/// A zero prior gives ±100; a sign flip is clamped to ±1000.
pub fn growth_rate(current: f64, prior: f64) -> f64 {
    if prior == 0.0 {
        return if current > 0.0 {
            ZERO_BASE_GROWTH
        } else if current < 0.0 {
            -ZERO_BASE_GROWTH
        } else {
            0.0
        };
    }

    let rate = (current - prior) / prior.abs() * 100.0;
    if (current < 0.0) != (prior < 0.0) && current != 0.0 {
        rate.clamp(-SIGN_FLIP_CAP, SIGN_FLIP_CAP)
    } else {
        rate
    }
}

fn debt_pillar(aggregate: &AggregateSnapshot) -> PillarResult {
    let current = aggregate.current();
    let debt = current.long_term_debt.or(current.total_debt);
    let avg_fcf = aggregate.averages.free_cash_flow;
    let data = json!({"long_term_debt": debt, "avg_fcf": avg_fcf});

    match (debt, avg_fcf) {
        (None, _) => PillarResult::new(
            Pillar::LongTermDebtToFcf,
            PillarValue::unavailable("Long-term debt not reported"),
            false,
            data,
        ),
        (Some(d), _) if d <= 0.0 => {
            PillarResult::new(Pillar::LongTermDebtToFcf, PillarValue::ok(0.0), true, data)
        }
        (Some(_), None) => PillarResult::new(
            Pillar::LongTermDebtToFcf,
            PillarValue::unavailable("No free cash flow history"),
            false,
            data,
        ),
        (Some(_), Some(f)) if f == 0.0 => PillarResult::new(
            Pillar::LongTermDebtToFcf,
            PillarValue::unavailable("Average free cash flow is zero"),
            false,
            data,
        ),
        (Some(d), Some(f)) => {
            let ratio = d / f;
            PillarResult::new(
                Pillar::LongTermDebtToFcf,
                PillarValue::ok(ratio),
                (0.0..5.0).contains(&ratio),
                data,
            )
        }
    }
}

fn market_cap_pillar(aggregate: &AggregateSnapshot, market_cap: Option<f64>) -> PillarResult {
    let avg_fcf = aggregate.averages.free_cash_flow;
    let data = json!({"market_cap": market_cap, "avg_fcf": avg_fcf});

    match (market_cap, avg_fcf) {
        (None, _) => PillarResult::new(
            Pillar::MarketCapToFcf,
            PillarValue::unavailable("Market capitalization unavailable"),
            false,
            data,
        ),
        (Some(_), None) => PillarResult::new(
            Pillar::MarketCapToFcf,
            PillarValue::unavailable("No free cash flow history"),
            false,
            data,
        ),
        (Some(_), Some(f)) if f == 0.0 => PillarResult::new(
            Pillar::MarketCapToFcf,
            PillarValue::unavailable("Average free cash flow is zero"),
            false,
            data,
        ),
        (Some(m), Some(f)) => {
            let ratio = m / f;
            PillarResult::new(
                Pillar::MarketCapToFcf,
                PillarValue::ok(ratio),
                (0.0..22.5).contains(&ratio),
                data,
            )
        }
    }
}

fn metric_name(pillar: Pillar) -> &'static str {
    match pillar {
        Pillar::FreeCashFlowGrowth => "Free cash flow",
        Pillar::NetIncomeGrowth => "Net income",
        Pillar::RevenueGrowth => "Revenue",
        _ => "Value",
    }
}

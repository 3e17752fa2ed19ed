//! Discounted cash flow engine.
//!
//! ```text
//!   DcfInputs ──► input guard (swap reversed bear/bull) ──┐
//!                                                         ▼
//!     for scenario in [low, medium, high]:
//!       for method in [FCF, earnings]:
//!         Σ PV(projected metric) + PV(terminal) ──► ÷ shares
//!       fair value = mean of finite positive method values
//!                                                         │
//!   ValuationResult ◄── output check (reorder if inverted) ┘
//! ```
//!
//! Reversed inputs are corrected, not rejected. Each correction is logged
//! and listed in [`ValuationResult::corrections`].

use chrono::Utc;
use tracing::{debug, warn};
use zero_common::config::ValuationSettings;

use super::types::{
    Correction, DcfInputs, MethodValue, Scenario, ScenarioTriple, ValuationMethod, ValuationResult,
};
use crate::error::{FundamentalsError, Result};

/// Bear discount premium over the CAPM rate.
pub const BEAR_DISCOUNT_SPREAD: f64 = 0.03;

/// Bull discount reduction under the CAPM rate.
pub const BULL_DISCOUNT_SPREAD: f64 = 0.02;

/// Floor for the bull discount rate.
pub const MIN_BULL_DISCOUNT: f64 = 0.05;

/// Revenue-derived base growth is clamped to this range.
pub const MAX_DEFAULT_GROWTH: f64 = 0.25;

/// Base growth when no revenue history is available.
pub const FALLBACK_GROWTH: f64 = 0.05;

/// Stateless DCF calculator parameterized by market assumptions.
#[derive(Debug, Clone)]
pub struct ValuationEngine {
    settings: ValuationSettings,
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self::new(ValuationSettings::default())
    }
}

impl ValuationEngine {
    pub fn new(settings: ValuationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ValuationSettings {
        &self.settings
    }

    /// `risk_free + beta × premium`. A missing or non-finite beta counts as 1.0.
    pub fn capm(&self, beta: Option<f64>) -> f64 {
        let beta = beta.filter(|b| b.is_finite()).unwrap_or(1.0);
        self.settings.risk_free_rate + beta * self.settings.market_risk_premium
    }

    /// Scenario discount rates around a base rate.
    pub fn default_discount(&self, base: f64) -> ScenarioTriple {
        ScenarioTriple::new(
            base + BEAR_DISCOUNT_SPREAD,
            base,
            (base - BULL_DISCOUNT_SPREAD).max(MIN_BULL_DISCOUNT),
        )
    }

    /// Scenario growth from a revenue CAGR.
    pub fn default_growth(&self, revenue_cagr: Option<f64>) -> ScenarioTriple {
        let base = revenue_cagr
            .filter(|g| g.is_finite())
            .map(|g| g.clamp(0.0, MAX_DEFAULT_GROWTH))
            .unwrap_or(FALLBACK_GROWTH);
        ScenarioTriple::new(base * 0.5, base, base * 1.5)
    }

    /// Run every scenario and method.
    pub fn calculate_dcf(&self, inputs: DcfInputs) -> Result<ValuationResult> {
        validate(&inputs)?;

        let mut inputs = inputs;
        let corrections = guard_inputs(&mut inputs);

        let mut method_values = Vec::with_capacity(6);
        let mut fair_values = [None; 3];

        for (i, scenario) in Scenario::ALL.into_iter().enumerate() {
            let discount = inputs.discount.get(scenario);
            let growth = inputs.growth.get(scenario);

            let fcf = inputs.base_fcf.map(|base| {
                calculate_dcf_traditional(
                    base,
                    growth,
                    discount,
                    inputs.projection_years,
                    inputs.fcf_multiple.map(|m| m.get(scenario)),
                    inputs.terminal_growth,
                    inputs.shares_outstanding,
                )
            });

            let earnings_base = match (inputs.margins, inputs.base_revenue) {
                (Some(margins), Some(revenue)) => Some(revenue * margins.get(scenario)),
                _ => inputs.base_earnings,
            };
            let earnings = earnings_base.map(|base| {
                calculate_dcf_traditional(
                    base,
                    growth,
                    discount,
                    inputs.projection_years,
                    inputs.pe_multiple.map(|m| m.get(scenario)),
                    inputs.terminal_growth,
                    inputs.shares_outstanding,
                )
            });

            let usable: Vec<f64> = [fcf, earnings]
                .into_iter()
                .flatten()
                .flatten()
                .filter(|v| v.is_finite() && *v > 0.0)
                .collect();
            if !usable.is_empty() {
                fair_values[i] = Some(usable.iter().sum::<f64>() / usable.len() as f64);
            }

            if fcf.is_some() {
                method_values.push(MethodValue {
                    scenario,
                    method: ValuationMethod::FreeCashFlow,
                    fair_value: fcf.flatten(),
                });
            }
            if earnings.is_some() {
                method_values.push(MethodValue {
                    scenario,
                    method: ValuationMethod::Earnings,
                    fair_value: earnings.flatten(),
                });
            }
        }

        let moved = order_outputs(&mut fair_values);
        let output_corrected = moved != Scenario::ALL;
        if output_corrected {
            warn!(symbol = %inputs.symbol, "DCF fair values were inverted, reordered");
            relabel_methods(&mut method_values, moved);
        }

        let [low, medium, high] = fair_values;
        let mos = |fv: Option<f64>| margin_of_safety(fv, inputs.current_price);

        debug!(
            symbol = %inputs.symbol,
            low = ?low,
            medium = ?medium,
            high = ?high,
            "DCF calculated"
        );

        Ok(ValuationResult {
            symbol: inputs.symbol.clone(),
            base_discount_rate: self.capm(Some(inputs.beta)),
            fair_value_low: low,
            fair_value_medium: medium,
            fair_value_high: high,
            margin_of_safety_low: mos(low),
            margin_of_safety_medium: mos(medium),
            margin_of_safety_high: mos(high),
            method_values,
            corrections,
            output_corrected,
            calculated_at: Utc::now(),
            inputs,
        })
    }
}

/// Per-share value of `base` grown for `years` and discounted, plus terminal.
///
/// The terminal value is `multiple × final metric` when a multiple is given,
/// otherwise Gordon growth. Returns `None` when Gordon growth is undefined
/// (discount ≤ terminal growth) or the result is not finite.
pub fn calculate_dcf_traditional(
    base: f64,
    growth: f64,
    discount: f64,
    years: u32,
    exit_multiple: Option<f64>,
    terminal_growth: f64,
    shares: f64,
) -> Option<f64> {
    if shares <= 0.0 || discount <= -1.0 {
        return None;
    }

    let mut metric = base;
    let mut pv_sum = 0.0;
    for year in 1..=years {
        metric *= 1.0 + growth;
        pv_sum += metric / (1.0 + discount).powi(year as i32);
    }

    let terminal = match exit_multiple {
        Some(multiple) => multiple * metric,
        None => {
            if discount <= terminal_growth {
                return None;
            }
            metric * (1.0 + terminal_growth) / (discount - terminal_growth)
        }
    };
    let terminal_pv = terminal / (1.0 + discount).powi(years as i32);

    let per_share = (pv_sum + terminal_pv) / shares;
    per_share.is_finite().then_some(per_share)
}

/// `(fair − price) / price`.
pub fn margin_of_safety(fair_value: Option<f64>, current_price: Option<f64>) -> Option<f64> {
    match (fair_value, current_price) {
        (Some(fv), Some(price)) if price > 0.0 => Some((fv - price) / price),
        _ => None,
    }
}

fn validate(inputs: &DcfInputs) -> Result<()> {
    if !(inputs.shares_outstanding.is_finite() && inputs.shares_outstanding > 0.0) {
        return Err(FundamentalsError::InvalidInput(
            "shares outstanding must be positive".into(),
        ));
    }
    if inputs.projection_years == 0 {
        return Err(FundamentalsError::InvalidInput(
            "projection years must be at least 1".into(),
        ));
    }
    if !inputs.growth.is_finite() || !inputs.discount.is_finite() {
        return Err(FundamentalsError::InvalidInput(
            "growth and discount rates must be finite".into(),
        ));
    }

    let has_earnings = inputs.base_earnings.is_some()
        || (inputs.margins.is_some() && inputs.base_revenue.is_some());
    if inputs.base_fcf.is_none() && !has_earnings {
        return Err(FundamentalsError::insufficient(
            inputs.symbol.clone(),
            "no free cash flow or earnings base for valuation",
        ));
    }
    Ok(())
}

/// Swap any triple whose bear and bull ends are reversed.
fn guard_inputs(inputs: &mut DcfInputs) -> Vec<Correction> {
    let mut corrections = Vec::new();
    let symbol = inputs.symbol.clone();

    let mut ascending = |field: &str, triple: &mut ScenarioTriple| {
        if triple.low > triple.high {
            let before = *triple;
            *triple = before.swapped();
            warn!(
                symbol = %symbol,
                field,
                low = before.low,
                high = before.high,
                "Reversed DCF input swapped"
            );
            corrections.push(Correction {
                field: field.to_string(),
                before,
                after: *triple,
            });
        }
    };

    ascending("growth", &mut inputs.growth);
    if let Some(m) = inputs.margins.as_mut() {
        ascending("margins", m);
    }
    if let Some(m) = inputs.pe_multiple.as_mut() {
        ascending("pe_multiple", m);
    }
    if let Some(m) = inputs.fcf_multiple.as_mut() {
        ascending("fcf_multiple", m);
    }

    // Bear discounts hardest
    if inputs.discount.low < inputs.discount.high {
        let before = inputs.discount;
        inputs.discount = before.swapped();
        warn!(
            symbol = %inputs.symbol,
            low = before.low,
            high = before.high,
            "Reversed DCF discount swapped"
        );
        corrections.push(Correction {
            field: "discount".to_string(),
            before,
            after: inputs.discount,
        });
    }

    corrections
}

/// Sort present values ascending in place.
///
/// Returns, per original slot, the scenario its value now sits in.
fn order_outputs(values: &mut [Option<f64>; 3]) -> [Scenario; 3] {
    let slots: Vec<usize> = (0..3).filter(|&i| values[i].is_some()).collect();
    let mut present: Vec<(f64, usize)> = slots
        .iter()
        .filter_map(|&i| values[i].map(|v| (v, i)))
        .collect();
    present.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut moved = Scenario::ALL;
    for (&slot, &(value, from)) in slots.iter().zip(&present) {
        values[slot] = Some(value);
        moved[from] = Scenario::ALL[slot];
    }
    moved
}

/// Move each method value to the scenario its fair value was sorted into.
fn relabel_methods(method_values: &mut [MethodValue], moved: [Scenario; 3]) {
    for value in method_values.iter_mut() {
        value.scenario = moved[value.scenario as usize];
    }
    method_values.sort_by_key(|v| v.scenario as usize);
}

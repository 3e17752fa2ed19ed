//! DCF valuation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bear / base / bull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Low,
    Medium,
    High,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Low, Scenario::Medium, Scenario::High];
}

/// One value per scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTriple {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl ScenarioTriple {
    pub fn new(low: f64, medium: f64, high: f64) -> Self {
        Self { low, medium, high }
    }

    pub fn get(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::Low => self.low,
            Scenario::Medium => self.medium,
            Scenario::High => self.high,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.low.is_finite() && self.medium.is_finite() && self.high.is_finite()
    }

    /// Exchange the low and high values.
    pub fn swapped(self) -> Self {
        Self {
            low: self.high,
            medium: self.medium,
            high: self.low,
        }
    }
}

/// Base metric a DCF run projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    FreeCashFlow,
    Earnings,
}

/// Fully resolved inputs for one valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcfInputs {
    pub symbol: String,
    pub base_fcf: Option<f64>,
    pub base_earnings: Option<f64>,
    /// Used with `margins` to derive per-scenario earnings
    pub base_revenue: Option<f64>,
    pub shares_outstanding: f64,
    pub current_price: Option<f64>,
    /// Market beta feeding CAPM
    pub beta: f64,
    /// Annual growth, bear lowest
    pub growth: ScenarioTriple,
    /// Discount rate, bear highest
    pub discount: ScenarioTriple,
    /// Net margins for the earnings method, bear lowest
    pub margins: Option<ScenarioTriple>,
    /// Exit P/E applied to final-year earnings, bear lowest
    pub pe_multiple: Option<ScenarioTriple>,
    /// Exit P/FCF applied to final-year FCF, bear lowest
    pub fcf_multiple: Option<ScenarioTriple>,
    pub projection_years: u32,
    pub terminal_growth: f64,
}

/// An input or output the engine reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    pub before: ScenarioTriple,
    pub after: ScenarioTriple,
}

/// Fair value of one method in one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodValue {
    pub scenario: Scenario,
    pub method: ValuationMethod,
    pub fair_value: Option<f64>,
}

/// DCF output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub symbol: String,
    pub inputs: DcfInputs,
    /// CAPM rate before scenario adjustments
    pub base_discount_rate: f64,
    pub fair_value_low: Option<f64>,
    pub fair_value_medium: Option<f64>,
    pub fair_value_high: Option<f64>,
    pub margin_of_safety_low: Option<f64>,
    pub margin_of_safety_medium: Option<f64>,
    pub margin_of_safety_high: Option<f64>,
    pub method_values: Vec<MethodValue>,
    /// Inputs swapped before calculation
    pub corrections: Vec<Correction>,
    /// Outputs reordered after calculation
    pub output_corrected: bool,
    pub calculated_at: DateTime<Utc>,
}

impl ValuationResult {
    pub fn was_corrected(&self) -> bool {
        self.output_corrected || !self.corrections.is_empty()
    }
}

/// Caller-supplied overrides for [`super::ValuationAnalyzer::calculate_valuation`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationRequest {
    pub growth: Option<ScenarioTriple>,
    pub discount: Option<ScenarioTriple>,
    pub margins: Option<ScenarioTriple>,
    pub pe_multiple: Option<ScenarioTriple>,
    pub fcf_multiple: Option<ScenarioTriple>,
    pub projection_years: Option<u32>,
}

/// A user's named valuation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedValuation {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub name: String,
    pub result: ValuationResult,
    pub created_at: DateTime<Utc>,
}

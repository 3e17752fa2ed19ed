//! Eight Pillars result types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Numeric stand-in for an unavailable ratio pillar in flat exports.
pub const PILLAR_SENTINEL: f64 = 999.99;

/// Number of pillars.
pub const PILLAR_COUNT: usize = 8;

// ============================================================================
// Pillar
// ============================================================================

/// The eight checks, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    PeRatio,
    Roic,
    SharesOutstanding,
    FreeCashFlowGrowth,
    NetIncomeGrowth,
    RevenueGrowth,
    LongTermDebtToFcf,
    MarketCapToFcf,
}

impl Pillar {
    pub const ALL: [Pillar; PILLAR_COUNT] = [
        Pillar::PeRatio,
        Pillar::Roic,
        Pillar::SharesOutstanding,
        Pillar::FreeCashFlowGrowth,
        Pillar::NetIncomeGrowth,
        Pillar::RevenueGrowth,
        Pillar::LongTermDebtToFcf,
        Pillar::MarketCapToFcf,
    ];

    /// 1-based pillar number.
    pub fn number(&self) -> u8 {
        match self {
            Self::PeRatio => 1,
            Self::Roic => 2,
            Self::SharesOutstanding => 3,
            Self::FreeCashFlowGrowth => 4,
            Self::NetIncomeGrowth => 5,
            Self::RevenueGrowth => 6,
            Self::LongTermDebtToFcf => 7,
            Self::MarketCapToFcf => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PeRatio => "5-Year P/E Ratio",
            Self::Roic => "5-Year ROIC",
            Self::SharesOutstanding => "Shares Outstanding",
            Self::FreeCashFlowGrowth => "Free Cash Flow Growth",
            Self::NetIncomeGrowth => "Net Income Growth",
            Self::RevenueGrowth => "Revenue Growth",
            Self::LongTermDebtToFcf => "Long-Term Debt / FCF",
            Self::MarketCapToFcf => "Price to Free Cash Flow",
        }
    }

    /// Pass threshold, where the rule has one.
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::PeRatio => Some(22.5),
            Self::Roic => Some(10.0),
            Self::SharesOutstanding => Some(0.0),
            Self::FreeCashFlowGrowth | Self::NetIncomeGrowth | Self::RevenueGrowth => Some(0.0),
            Self::LongTermDebtToFcf => Some(5.0),
            Self::MarketCapToFcf => Some(22.5),
        }
    }

    /// Numeric value reported when the pillar is unavailable.
    ///
    /// Ratio pillars that fail "high" use [`PILLAR_SENTINEL`]; the rest use 0.
    pub fn unavailable_value(&self) -> f64 {
        match self {
            Self::PeRatio | Self::LongTermDebtToFcf | Self::MarketCapToFcf => PILLAR_SENTINEL,
            _ => 0.0,
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Self::PeRatio | Self::LongTermDebtToFcf | Self::MarketCapToFcf => "x",
            _ => "%",
        }
    }
}

// ============================================================================
// Pillar Value
// ============================================================================

/// Outcome of a single pillar computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PillarValue {
    Ok { value: f64 },
    Unavailable { reason: String },
}

impl PillarValue {
    pub fn ok(value: f64) -> Self {
        Self::Ok { value }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Ok { value } => Some(*value),
            Self::Unavailable { .. } => None,
        }
    }
}

/// One scored pillar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarResult {
    pub pillar: Pillar,
    pub number: u8,
    pub name: String,
    pub value: PillarValue,
    pub threshold: Option<f64>,
    pub passed: bool,
    pub display_value: String,
    /// Raw inputs behind the value
    pub data: serde_json::Value,
}

impl PillarResult {
    pub fn new(pillar: Pillar, value: PillarValue, passed: bool, data: serde_json::Value) -> Self {
        // Unavailable pillars never pass
        let passed = passed && matches!(value, PillarValue::Ok { .. });
        let display_value = match &value {
            PillarValue::Ok { value } => format_display(pillar, *value),
            PillarValue::Unavailable { .. } => "N/A".to_string(),
        };

        Self {
            pillar,
            number: pillar.number(),
            name: pillar.name().to_string(),
            value,
            threshold: pillar.threshold(),
            passed,
            display_value,
            data,
        }
    }

    /// Value as a plain number, substituting the pillar's unavailable value.
    pub fn numeric_value(&self) -> f64 {
        self.value
            .value()
            .unwrap_or_else(|| self.pillar.unavailable_value())
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.value {
            PillarValue::Unavailable { reason } => Some(reason),
            PillarValue::Ok { .. } => None,
        }
    }

    /// Derived 1–5 score.
    pub fn score(&self) -> u8 {
        let v = match self.value.value() {
            Some(v) => v,
            None => return 1,
        };

        match self.pillar {
            Pillar::PeRatio => match v {
                v if v <= 0.0 => 1,
                v if v < 10.0 => 5,
                v if v < 15.0 => 4,
                v if v < 22.5 => 3,
                v if v < 30.0 => 2,
                _ => 1,
            },
            Pillar::Roic => match v {
                v if v >= 20.0 => 5,
                v if v >= 15.0 => 4,
                v if v > 10.0 => 3,
                v if v > 5.0 => 2,
                _ => 1,
            },
            Pillar::SharesOutstanding => match v {
                v if v <= -5.0 => 5,
                v if v <= -1.0 => 4,
                v if v <= 0.0 => 3,
                v if v <= 2.0 => 2,
                _ => 1,
            },
            Pillar::FreeCashFlowGrowth | Pillar::NetIncomeGrowth | Pillar::RevenueGrowth => {
                match v {
                    v if v >= 50.0 => 5,
                    v if v >= 20.0 => 4,
                    v if v > 0.0 => 3,
                    v if v >= -10.0 => 2,
                    _ => 1,
                }
            }
            Pillar::LongTermDebtToFcf => match v {
                v if v < 0.0 => 1,
                v if v < 1.0 => 5,
                v if v < 3.0 => 4,
                v if v < 5.0 => 3,
                v if v < 10.0 => 2,
                _ => 1,
            },
            Pillar::MarketCapToFcf => match v {
                v if v < 0.0 => 1,
                v if v < 10.0 => 5,
                v if v < 15.0 => 4,
                v if v < 22.5 => 3,
                v if v < 30.0 => 2,
                _ => 1,
            },
        }
    }
}

fn format_display(pillar: Pillar, value: f64) -> String {
    match (pillar, pillar.unit()) {
        (
            Pillar::FreeCashFlowGrowth
            | Pillar::NetIncomeGrowth
            | Pillar::RevenueGrowth
            | Pillar::SharesOutstanding,
            _,
        ) => format!("{:+.1}%", value),
        (_, "%") => format!("{:.1}%", value),
        (_, unit) => format!("{:.2}{}", value, unit),
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Full Eight Pillars result for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EightPillarsAnalysis {
    pub symbol: String,
    pub analysis_date: NaiveDate,
    pub market_cap: Option<f64>,
    pub current_price: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub pillars: Vec<PillarResult>,
    pub pillars_passed: u8,
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub periods_analyzed: usize,
    pub years_span: i32,
    pub analyzed_at: DateTime<Utc>,
}

impl EightPillarsAnalysis {
    pub fn pillar(&self, pillar: Pillar) -> Option<&PillarResult> {
        self.pillars.iter().find(|p| p.pillar == pillar)
    }

    pub fn pass_flags(&self) -> [bool; PILLAR_COUNT] {
        let mut flags = [false; PILLAR_COUNT];
        for p in &self.pillars {
            flags[(p.number - 1) as usize] = p.passed;
        }
        flags
    }

    pub fn scores(&self) -> [u8; PILLAR_COUNT] {
        let mut scores = [1u8; PILLAR_COUNT];
        for p in &self.pillars {
            scores[(p.number - 1) as usize] = p.score();
        }
        scores
    }

    /// Sum of derived scores (8–40).
    pub fn total_score(&self) -> u32 {
        self.scores().iter().map(|s| *s as u32).sum()
    }
}

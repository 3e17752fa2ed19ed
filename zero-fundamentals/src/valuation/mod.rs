//! DCF valuation.
//!
//! Three scenarios (low/medium/high, i.e. bear/base/bull), each valued by
//! two methods (free cash flow and earnings) and averaged. Discount rates
//! derive from CAPM unless the caller overrides them.
//!
//! # Usage
//!
//! ```ignore
//! let result = analyzer.calculate_valuation("AAPL", ValuationRequest::default()).await?;
//! println!("Fair value (base): {:?}", result.fair_value_medium);
//! ```

pub mod analyzer;
pub mod dcf;
pub mod types;

pub use analyzer::ValuationAnalyzer;
pub use dcf::{calculate_dcf_traditional, margin_of_safety, ValuationEngine};
pub use types::{
    Correction, DcfInputs, MethodValue, SavedValuation, Scenario, ScenarioTriple, ValuationMethod,
    ValuationRequest, ValuationResult,
};

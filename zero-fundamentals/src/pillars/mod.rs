//! Eight Pillars methodology.
//!
//! ```text
//!   FundamentalCache ──► aggregate() ──► EightPillarsScorer ──► EightPillarsAnalysis
//!                            │                   ▲
//!                 year-end prices (candles)   market cap, price, shares
//! ```
//!
//! | # | Metric                              | Pass            |
//! |---|-------------------------------------|-----------------|
//! | 1 | Average annual P/E                  | 0 < v < 22.5    |
//! | 2 | Average ROIC (%)                    | v > 10          |
//! | 3 | Share count change (%)              | v ≤ 0           |
//! | 4 | Free cash flow growth               | current > prior |
//! | 5 | Net income growth                   | current > prior |
//! | 6 | Revenue growth                      | current > prior |
//! | 7 | Long-term debt / average FCF        | 0 ≤ v < 5       |
//! | 8 | Market cap / average FCF            | 0 ≤ v < 22.5    |

pub mod aggregate;
pub mod analyzer;
pub mod scorer;
pub mod types;

pub use aggregate::{aggregate, AggregateSnapshot, AnnualRatio};
pub use analyzer::{PillarsAnalyzer, SymbolScorer};
pub use scorer::{growth_rate, EightPillarsScorer};
pub use types::{
    EightPillarsAnalysis, Pillar, PillarResult, PillarValue, PILLAR_COUNT, PILLAR_SENTINEL,
};

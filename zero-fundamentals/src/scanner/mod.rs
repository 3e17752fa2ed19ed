//! Batch scanning of a symbol universe.
//!
//! ```text
//!   UniverseResolver ──► symbols ──► chunks of 10 ──► SymbolScorer (sequential)
//!                                        │ 2s between batches
//!                                        ▼
//!                              pillar_scan_rows (upsert per scan, symbol)
//!                                        │
//!                          failures ──► one retry pass ──► completed
//! ```

pub mod engine;
pub mod scheduler;
pub mod types;
pub mod universe;

pub use engine::{BatchScanner, ScannerSettings};
pub use scheduler::ScanScheduler;
pub use types::{
    Page, PillarScanRow, ScanJob, ScanOptions, ScanOutcome, ScanResultsQuery, ScanStatus,
    SortField, SortOrder, Universe,
};
pub use universe::{parse_holdings_csv, UniverseResolver};

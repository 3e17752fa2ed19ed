//! Zero Common - Shared configuration and logging for Zero services.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.codecoder/config.json` plus env overrides)
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{
    Config, FundamentalsConfig, ObservabilityConfig, ScanSettings, SecretsConfig,
    ValuationSettings,
};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, FundamentalsConfig};
    pub use crate::logging::init_logging;
}

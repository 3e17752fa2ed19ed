//! Domain errors for the fundamentals service.

use axum::http::StatusCode;
use thiserror::Error;

use crate::data::ProviderError;

/// Errors surfaced by the public operations of this crate.
#[derive(Debug, Error)]
pub enum FundamentalsError {
    /// Fewer than two periods, or no base metric for a valuation
    #[error("Insufficient data for {symbol}: {detail}")]
    InsufficientData { symbol: String, detail: String },

    /// Market data provider call failed
    #[error("Provider error: {0}")]
    Transport(#[from] ProviderError),

    /// Another scan job holds the running slot
    #[error("A scan is already running (job {0})")]
    ScanInProgress(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence failure
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl FundamentalsError {
    pub fn insufficient(symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InsufficientData {
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Transport(ProviderError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Transport(ProviderError::DataNotAvailable(_)) => StatusCode::NOT_FOUND,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::ScanInProgress(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::Transport(_) => "transport_failure",
            Self::ScanInProgress(_) => "scan_in_progress",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Storage(_) => "storage_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, FundamentalsError>;

//! Zero Fundamentals Library
//!
//! Fundamental-data caching, Eight Pillars scoring, DCF valuation and
//! quarterly batch scanning over an external market data provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 zero-fundamentals (Rust Service)                    │
//! │                            :4436                                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐    │
//! │  │ BatchScanner │──►│ Pillars      │──►│ FundamentalCache     │    │
//! │  │ (quarterly)  │   │ Analyzer     │   │  └ Normalizer        │    │
//! │  └──────────────┘   └──────────────┘   └──────────┬───────────┘    │
//! │  ┌──────────────┐                                 │                │
//! │  │ Valuation    │─────────────────────────────────┤                │
//! │  │ (DCF)        │                                 ▼                │
//! │  └──────────────┘                      MarketDataGateway (Finnhub) │
//! │                        SQLite (FundamentalStore)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod normalize;
pub mod pillars;
pub mod routes;
pub mod scanner;
pub mod valuation;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use zero_common::config::Config;

use crate::data::{FinnhubGateway, FundamentalCache, FundamentalStore, MarketDataGateway};
use crate::pillars::PillarsAnalyzer;
use crate::scanner::{BatchScanner, ScanScheduler, ScannerSettings, UniverseResolver};
use crate::valuation::{ValuationAnalyzer, ValuationEngine};

pub use error::{FundamentalsError, Result as FundamentalsResult};

/// Shared service state
pub struct FundamentalsState {
    pub config: Config,
    pub store: Arc<FundamentalStore>,
    pub cache: Arc<FundamentalCache>,
    pub pillars: Arc<PillarsAnalyzer>,
    pub valuation: Arc<ValuationAnalyzer>,
    pub scanner: Arc<BatchScanner>,
}

impl FundamentalsState {
    /// Wire every component around one gateway and one store.
    pub fn new(
        config: Config,
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<FundamentalStore>,
    ) -> Self {
        let settings = &config.fundamentals;
        let ttl = Duration::hours(settings.cache_ttl_hours.max(1));

        let cache = Arc::new(
            FundamentalCache::new(Arc::clone(&gateway), Arc::clone(&store)).with_ttl(ttl),
        );
        let pillars = Arc::new(PillarsAnalyzer::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&cache),
        ));
        let valuation = Arc::new(ValuationAnalyzer::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&cache),
            ValuationEngine::new(settings.valuation.clone()),
        ));
        let universe = Arc::new(UniverseResolver::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            &settings.scan,
        ));
        let scanner = Arc::new(BatchScanner::new(
            pillars.clone(),
            Arc::clone(&store),
            universe,
            ScannerSettings::from(&settings.scan),
        ));

        Self {
            config,
            store,
            cache,
            pillars,
            valuation,
            scanner,
        }
    }
}

/// HTTP routes over a shared state.
pub fn build_router(state: Arc<FundamentalsState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/pillars/:symbol", get(routes::get_pillars))
        // Scanner
        .route("/api/v1/scan", post(routes::start_scan))
        .route("/api/v1/scan/status", get(routes::scan_status))
        .route("/api/v1/scan/results", get(routes::scan_results))
        // Valuation
        .route("/api/v1/valuation/:symbol", post(routes::calculate_valuation))
        .route(
            "/api/v1/valuations",
            post(routes::save_valuation).get(routes::list_valuations),
        )
        .route(
            "/api/v1/valuations/:id",
            get(routes::get_valuation).delete(routes::delete_valuation),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main fundamentals service
pub struct FundamentalsService {
    state: Arc<FundamentalsState>,
}

impl FundamentalsService {
    /// Open the store and connect the Finnhub gateway from config.
    pub fn new(config: Config) -> Result<Self> {
        let gateway = FinnhubGateway::from_config(&config)
            .context("Finnhub API key not configured (set FINNHUB_API_KEY)")?;
        let store = FundamentalStore::open(config.fundamentals_db_path())?;

        Ok(Self::with_parts(config, Arc::new(gateway), Arc::new(store)))
    }

    pub fn with_parts(
        config: Config,
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<FundamentalStore>,
    ) -> Self {
        let state = Arc::new(FundamentalsState::new(config, gateway, store));
        Self { state }
    }

    pub fn state(&self) -> Arc<FundamentalsState> {
        Arc::clone(&self.state)
    }

    /// Sweep stuck jobs, start the scheduler, serve HTTP.
    pub async fn start(self) -> Result<()> {
        let settings = &self.state.config.fundamentals;

        match self.state.scanner.sweep_stuck_jobs().await {
            Ok(swept) if !swept.is_empty() => {
                tracing::warn!(count = swept.len(), "Failed stuck scan jobs on startup")
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Startup stuck-job sweep failed"),
        }

        if settings.scan.schedule_enabled {
            let scheduler =
                ScanScheduler::new(Arc::clone(&self.state.scanner), &settings.scan.schedule)?;
            tokio::spawn(scheduler.run());
        } else {
            tracing::info!("Scan scheduler disabled");
        }

        let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
            .parse()
            .with_context(|| {
                format!("Invalid listen address {}:{}", settings.host, settings.port)
            })?;
        let app = build_router(self.state());

        tracing::info!(address = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

//! Zero Fundamentals - fundamental data and value scoring service for the Zero ecosystem.

use anyhow::Result;
use zero_common::config::Config;
use zero_common::logging::init_logging;
use zero_fundamentals::FundamentalsService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Zero Fundamentals v{}", env!("CARGO_PKG_VERSION"));

    let service = FundamentalsService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}

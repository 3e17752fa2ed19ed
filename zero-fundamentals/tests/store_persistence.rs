//! On-disk store survives a reopen; scan state rehydrates from the table.

mod common;

use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;

use common::{fast_config, MockGateway};
use zero_fundamentals::data::{FinancialPeriod, FundamentalStore, MarketDataGateway, PeriodKind};
use zero_fundamentals::scanner::{ScanOptions, ScanStatus};
use zero_fundamentals::{FundamentalsError, FundamentalsState};

fn state_over(store: FundamentalStore) -> FundamentalsState {
    FundamentalsState::new(
        fast_config(&["AAPL"]),
        Arc::new(MockGateway::new()) as Arc<dyn MarketDataGateway>,
        Arc::new(store),
    )
}

#[tokio::test]
async fn test_running_job_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("fundamentals.db");

    let job_id = {
        let store = FundamentalStore::open(&path).unwrap();
        let job = store.try_start_scan_job(Utc::now()).await.unwrap().unwrap();
        store.set_scan_total(job.id, 40).await.unwrap();
        store.update_scan_progress(job.id, 12, 12).await.unwrap();
        job.id
    };

    // A fresh process sees the running job and cannot start another
    let state = state_over(FundamentalStore::open(&path).unwrap());

    let status = state.scanner.get_scan_status().await.unwrap().unwrap();
    assert_eq!(status.id, job_id);
    assert_eq!(status.status, ScanStatus::Running);
    assert_eq!(status.stocks_analyzed, 12);
    assert!((status.progress_pct() - 30.0).abs() < 1e-9);

    match state.scanner.run_scan_to_completion(ScanOptions::default()).await {
        Err(FundamentalsError::ScanInProgress(id)) => assert_eq!(id, job_id),
        other => panic!("expected ScanInProgress, got {:?}", other.map(|o| o.job.id)),
    }
}

#[tokio::test]
async fn test_periods_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fundamentals.db");

    {
        let store = FundamentalStore::open(&path).unwrap();
        let mut p = FinancialPeriod::new("MSFT", 2024, PeriodKind::Annual, Utc::now());
        p.revenue = Some(245_122_000_000.0);
        p.long_term_debt = Some(42_688_000_000.0);
        store.upsert_periods(&[p]).await.unwrap();
    }

    let store = FundamentalStore::open(&path).unwrap();
    let periods = store.get_periods("MSFT", PeriodKind::Annual, 5).await.unwrap();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].revenue, Some(245_122_000_000.0));
    assert_eq!(periods[0].long_term_debt, Some(42_688_000_000.0));
    assert_eq!(periods[0].net_income, None);

    assert!(store
        .get_periods("MSFT", PeriodKind::Quarterly, 5)
        .await
        .unwrap()
        .is_empty());
}

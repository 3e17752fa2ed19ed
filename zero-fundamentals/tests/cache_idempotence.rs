//! Read-through cache behaviour against a counting gateway.

mod common;

use chrono::{Duration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{growing_history, memory_store, Annual, MockGateway};
use zero_fundamentals::data::{FinancialPeriod, FundamentalCache, MarketDataGateway, PeriodKind};
use zero_fundamentals::pillars::{PillarsAnalyzer, SymbolScorer};

fn cache_over(
    gateway: &Arc<MockGateway>,
) -> (FundamentalCache, Arc<zero_fundamentals::data::FundamentalStore>) {
    let store = memory_store();
    let cache = FundamentalCache::new(
        Arc::clone(gateway) as Arc<dyn MarketDataGateway>,
        Arc::clone(&store),
    );
    (cache, store)
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let gateway = Arc::new(MockGateway::new().with_financials("AAPL", &growing_history()));
    let (cache, _store) = cache_over(&gateway);

    let first = cache.get_financials("AAPL", 5, PeriodKind::Annual, false, None).await;
    let second = cache.get_financials("AAPL", 5, PeriodKind::Annual, false, None).await;

    assert_eq!(gateway.statement_calls(), 1);
    assert_eq!(first.len(), 5);
    assert_eq!(second.len(), 5);
    assert_eq!(first[0].fiscal_year, 2024);
    assert_eq!(second[0].fiscal_year, 2024);
    assert_eq!(first[0].revenue, second[0].revenue);
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let gateway = Arc::new(MockGateway::new().with_financials("MSFT", &growing_history()));
    let (cache, _store) = cache_over(&gateway);

    cache.get_financials("MSFT", 5, PeriodKind::Annual, false, None).await;
    cache.get_financials("MSFT", 5, PeriodKind::Annual, true, None).await;

    assert_eq!(gateway.statement_calls(), 2);
}

#[tokio::test]
async fn test_stale_rows_are_refetched() {
    let gateway = Arc::new(MockGateway::new().with_financials("KO", &growing_history()));
    let (cache, store) = cache_over(&gateway);

    let stale_at = Utc::now() - Duration::hours(48);
    let mut stale = FinancialPeriod::new("KO", 2024, PeriodKind::Annual, stale_at);
    stale.revenue = Some(1.0);
    store.upsert_periods(&[stale]).await.unwrap();

    let periods = cache.get_financials("KO", 5, PeriodKind::Annual, false, None).await;

    assert_eq!(gateway.statement_calls(), 1);
    assert_eq!(periods[0].fiscal_year, 2024);
    assert!(periods[0].revenue.unwrap() > 1.0);
    assert!(periods[0].fetched_at > stale_at);

    // The refetch replaced the stale row in place
    let stored = store.get_periods("KO", PeriodKind::Annual, 5).await.unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|p| p.fetched_at > stale_at));
}

#[tokio::test]
async fn test_fresh_rows_are_not_refetched() {
    let gateway = Arc::new(MockGateway::new());
    let (cache, store) = cache_over(&gateway);

    let mut fresh = FinancialPeriod::new("PEP", 2024, PeriodKind::Annual, Utc::now());
    fresh.revenue = Some(91_000_000_000.0);
    store.upsert_periods(&[fresh]).await.unwrap();

    let periods = cache.get_financials("PEP", 5, PeriodKind::Annual, false, None).await;

    assert_eq!(gateway.statement_calls(), 0);
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].revenue, Some(91_000_000_000.0));
}

#[tokio::test]
async fn test_empty_fetch_is_not_cached() {
    let gateway = Arc::new(MockGateway::new());
    let (cache, _store) = cache_over(&gateway);

    let first = cache.get_financials("ZZZZ", 5, PeriodKind::Annual, false, None).await;
    let second = cache.get_financials("ZZZZ", 5, PeriodKind::Annual, false, None).await;

    assert!(first.is_empty());
    assert!(second.is_empty());
    // Both endpoints tried on every miss
    assert_eq!(gateway.statement_calls(), 2);
    assert_eq!(gateway.reported_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_truncates_to_requested_periods() {
    let gateway = Arc::new(MockGateway::new().with_financials("JNJ", &growing_history()));
    let (cache, _store) = cache_over(&gateway);

    let periods = cache.get_financials("JNJ", 3, PeriodKind::Annual, false, None).await;
    let years: Vec<i32> = periods.iter().map(|p| p.fiscal_year).collect();
    assert_eq!(years, vec![2024, 2023, 2022]);
}

#[tokio::test]
async fn test_pillar_analysis_is_cached_for_the_day() {
    let gateway = Arc::new(MockGateway::new().with_financials(
        "V",
        &[Annual::healthy(2023, 100.0e6), Annual::healthy(2024, 120.0e6)],
    ));
    let store = memory_store();
    let dyn_gateway = Arc::clone(&gateway) as Arc<dyn MarketDataGateway>;
    let cache = Arc::new(FundamentalCache::new(Arc::clone(&dyn_gateway), Arc::clone(&store)));
    let analyzer = PillarsAnalyzer::new(dyn_gateway, store, cache);

    let first = analyzer.score_symbol("v", false).await.unwrap();
    let second = analyzer.score_symbol("V", false).await.unwrap();

    assert_eq!(first.symbol, "V");
    assert_eq!(first.pillars_passed, second.pillars_passed);
    assert_eq!(gateway.profile_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.statement_calls(), 1);

    analyzer.score_symbol("V", true).await.unwrap();
    assert_eq!(gateway.profile_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.statement_calls(), 2);
}

//! Eight Pillars scoring over hand-built histories.

mod common;

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;

use common::{memory_store, Annual, MockGateway};
use zero_fundamentals::data::{FinancialPeriod, FundamentalCache, MarketDataGateway, PeriodKind};
use zero_fundamentals::pillars::scorer::growth_pillar;
use zero_fundamentals::pillars::{
    aggregate, growth_rate, EightPillarsScorer, Pillar, PillarsAnalyzer, SymbolScorer,
    PILLAR_SENTINEL,
};
use zero_fundamentals::FundamentalsError;

fn period(year: i32) -> FinancialPeriod {
    let mut p = FinancialPeriod::new("TEST", year, PeriodKind::Annual, Utc::now());
    p.revenue = Some(100.0);
    p.net_income = Some(10.0);
    p.operating_income = Some(20.0);
    p.total_equity = Some(100.0);
    p.long_term_debt = Some(10.0);
    p.free_cash_flow = Some(10.0);
    p.shares_outstanding = Some(10.0);
    p
}

#[test]
fn test_revenue_growth_passes_when_revenue_rises() {
    let mut older = period(2022);
    older.revenue = Some(100.0);
    let mut newer = period(2023);
    newer.revenue = Some(120.0);

    let snapshot = aggregate(&[newer, older]).unwrap();
    let analysis =
        EightPillarsScorer::new().score("TEST", &snapshot, Some(1_000.0), Some(10.0), None);

    let p6 = analysis.pillar(Pillar::RevenueGrowth).unwrap();
    assert!(p6.passed);
    assert!((p6.numeric_value() - 20.0).abs() < 1e-9);
    assert_eq!(p6.display_value, "+20.0%");
}

#[test]
fn test_cagr_uses_actual_year_span() {
    // Gap year: 2019 → 2023 is four years even with only two periods
    let mut start = period(2019);
    start.revenue = Some(100.0);
    let mut end = period(2023);
    end.revenue = Some(146.41);

    let snapshot = aggregate(&[start, end]).unwrap();
    assert_eq!(snapshot.years_span, 4);
    assert_eq!(snapshot.periods_analyzed, 2);

    let cagr = snapshot.revenue_cagr().unwrap();
    assert!((cagr - 0.10).abs() < 1e-6, "cagr = {}", cagr);
}

#[test]
fn test_negative_operating_income_gives_negative_roic() {
    let mut older = period(2022);
    older.operating_income = Some(-50.0);
    let mut newer = period(2023);
    newer.operating_income = Some(-50.0);

    let snapshot = aggregate(&[older, newer]).unwrap();
    let analysis = EightPillarsScorer::new().score("TEST", &snapshot, Some(1_000.0), None, None);

    let p2 = analysis.pillar(Pillar::Roic).unwrap();
    assert!(!p2.passed);
    assert!(p2.numeric_value() < 0.0);
    assert_eq!(p2.score(), 1);
}

#[test]
fn test_zero_free_cash_flow_is_unavailable_for_market_cap_ratio() {
    let mut older = period(2022);
    older.free_cash_flow = Some(0.0);
    let mut newer = period(2023);
    newer.free_cash_flow = Some(0.0);

    let snapshot = aggregate(&[older, newer]).unwrap();
    let analysis = EightPillarsScorer::new().score("TEST", &snapshot, Some(1_000.0), None, None);

    let p8 = analysis.pillar(Pillar::MarketCapToFcf).unwrap();
    assert!(!p8.passed);
    assert_eq!(p8.numeric_value(), PILLAR_SENTINEL);
    assert!(p8.reason().is_some());
    assert_eq!(p8.display_value, "N/A");

    let p7 = analysis.pillar(Pillar::LongTermDebtToFcf).unwrap();
    assert!(!p7.passed);
    assert_eq!(p7.numeric_value(), PILLAR_SENTINEL);
}

#[test]
fn test_single_period_is_insufficient() {
    let err = aggregate(&[period(2023)]).unwrap_err();
    assert!(matches!(err, FundamentalsError::InsufficientData { .. }));

    // Two rows for the same fiscal year still count as one
    let err = aggregate(&[period(2023), period(2023)]).unwrap_err();
    assert!(matches!(err, FundamentalsError::InsufficientData { .. }));
}

#[test]
fn test_scoring_is_deterministic() {
    let periods: Vec<FinancialPeriod> = (2019..=2023)
        .map(|y| {
            let mut p = period(y);
            p.revenue = Some(100.0 + (y - 2019) as f64 * 7.0);
            p
        })
        .collect();

    let scorer = EightPillarsScorer::new();
    let a = scorer.score("TEST", &aggregate(&periods).unwrap(), Some(500.0), Some(50.0), None);
    let mut shuffled = periods.clone();
    shuffled.reverse();
    let b = scorer.score("TEST", &aggregate(&shuffled).unwrap(), Some(500.0), Some(50.0), None);

    assert_eq!(a.pillars, b.pillars);
    assert_eq!(a.pillars_passed, b.pillars_passed);
    assert_eq!(a.total_score(), b.total_score());
}

#[test]
fn test_pillars_passed_matches_flags() {
    let snapshot = aggregate(&[period(2022), period(2023)]).unwrap();
    let analysis =
        EightPillarsScorer::new().score("TEST", &snapshot, Some(1_000.0), Some(10.0), None);

    let flags = analysis.pass_flags();
    assert_eq!(analysis.pillars.len(), 8);
    assert_eq!(
        analysis.pillars_passed as usize,
        flags.iter().filter(|f| **f).count()
    );
    for (i, p) in analysis.pillars.iter().enumerate() {
        assert_eq!(p.number as usize, i + 1);
        assert!((1..=5).contains(&p.score()));
    }
}

#[tokio::test]
async fn test_analyzer_rejects_short_history() {
    let gateway =
        Arc::new(MockGateway::new().with_financials("NEW", &[Annual::healthy(2024, 1.0e6)]));
    let store = memory_store();
    let dyn_gateway = Arc::clone(&gateway) as Arc<dyn MarketDataGateway>;
    let cache = Arc::new(FundamentalCache::new(Arc::clone(&dyn_gateway), Arc::clone(&store)));
    let analyzer = PillarsAnalyzer::new(dyn_gateway, store, cache);

    match analyzer.score_symbol("NEW", false).await {
        Err(FundamentalsError::InsufficientData { symbol, .. }) => assert_eq!(symbol, "NEW"),
        other => panic!("expected insufficient data, got {:?}", other.map(|a| a.symbol)),
    }
}

#[tokio::test]
async fn test_analyzer_fills_company_details() {
    let gateway = Arc::new(MockGateway::new().with_financials(
        "ADBE",
        &[Annual::healthy(2023, 100.0e6), Annual::healthy(2024, 130.0e6)],
    ));
    let store = memory_store();
    let dyn_gateway = Arc::clone(&gateway) as Arc<dyn MarketDataGateway>;
    let cache = Arc::new(FundamentalCache::new(Arc::clone(&dyn_gateway), Arc::clone(&store)));
    let analyzer = PillarsAnalyzer::new(dyn_gateway, store, cache);

    let analysis = analyzer.score_symbol("adbe", false).await.unwrap();
    assert_eq!(analysis.symbol, "ADBE");
    assert_eq!(analysis.company_name.as_deref(), Some("ADBE Inc"));
    assert_eq!(analysis.industry.as_deref(), Some("Technology"));
    assert_eq!(analysis.current_price, Some(50.0));
    assert_eq!(analysis.periods_analyzed, 2);
    assert!(analysis.pillar(Pillar::RevenueGrowth).unwrap().passed);
}

#[tokio::test]
async fn test_pe_uses_closes_at_fiscal_year_end() {
    // June fiscal years; December closes are far higher and must be ignored
    let mut closes = Vec::new();
    for (year, month) in (2022..=2024).flat_map(|y| (1..=12).map(move |m| (y, m))) {
        let close = match (year, month) {
            (2023, 6) => 30.0,
            (2024, 6) => 20.0,
            (_, 12) => 400.0,
            _ => 50.0,
        };
        closes.push((year, month, close));
    }
    let gateway = Arc::new(
        MockGateway::new()
            .with_financials(
                "MSFT",
                &[
                    Annual::healthy(2023, 1.0e9).ending_in(6),
                    Annual::healthy(2024, 1.2e9).ending_in(6),
                ],
            )
            .with_monthly_closes(&closes),
    );
    let store = memory_store();
    let dyn_gateway = Arc::clone(&gateway) as Arc<dyn MarketDataGateway>;
    let cache = Arc::new(FundamentalCache::new(Arc::clone(&dyn_gateway), Arc::clone(&store)));
    let analyzer = PillarsAnalyzer::new(dyn_gateway, store, cache);

    let analysis = analyzer.score_symbol("MSFT", false).await.unwrap();
    let pe = analysis.pillar(Pillar::PeRatio).unwrap();

    // EPS is 2.0 for FY2023 and 2.4 for FY2024
    let expected = (30.0 / 2.0 + 20.0 / 2.4) / 2.0;
    assert_eq!(pe.data["method"], "annual_average");
    assert!((pe.numeric_value() - expected).abs() < 1e-9, "pe = {}", pe.numeric_value());
    assert!(pe.passed);
}

proptest! {
    #[test]
    fn prop_growth_passes_iff_current_exceeds_prior(
        current in -1.0e9f64..1.0e9,
        prior in -1.0e9f64..1.0e9,
    ) {
        let result = growth_pillar(Pillar::NetIncomeGrowth, Some(current), Some(prior));
        prop_assert_eq!(result.passed, current > prior);
    }

    #[test]
    fn prop_growth_rate_is_monotone_in_current(
        a in -1.0e6f64..1.0e6,
        b in -1.0e6f64..1.0e6,
        prior in 1.0f64..1.0e6,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(growth_rate(lo, prior) <= growth_rate(hi, prior));
    }
}

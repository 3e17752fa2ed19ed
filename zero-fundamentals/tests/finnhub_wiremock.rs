//! Finnhub adapter against a mock HTTP server.

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zero_fundamentals::data::{FinnhubGateway, MarketDataGateway, PeriodKind, ProviderError};

async fn gateway() -> (MockServer, FinnhubGateway) {
    let server = MockServer::start().await;
    let gateway = FinnhubGateway::with_base_url("test-key", server.uri(), 600);
    (server, gateway)
}

#[tokio::test]
async fn test_quote_sends_token_and_parses() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("symbol", "AAPL"))
        .and(header("X-Finnhub-Token", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "c": 189.5, "d": 1.2, "dp": 0.64, "h": 190.0, "l": 187.1, "o": 188.0,
            "pc": 188.3, "t": 1700000000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let quote = gateway.get_quote("AAPL").await.unwrap();
    assert_eq!(quote.price(), Some(189.5));
    assert_eq!(quote.previous_close, Some(188.3));
}

#[tokio::test]
async fn test_profile_scales_millions() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/stock/profile2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Apple Inc",
            "ticker": "AAPL",
            "finnhubIndustry": "Technology",
            "marketCapitalization": 2_900_000.0,
            "shareOutstanding": 15_500.0
        })))
        .mount(&server)
        .await;

    let profile = gateway.get_company_profile("AAPL").await.unwrap();
    assert_eq!(profile.industry.as_deref(), Some("Technology"));
    assert_eq!(profile.shares_outstanding(), Some(15_500_000_000.0));
    assert_eq!(profile.market_cap(), Some(2_900_000_000_000.0));
}

#[tokio::test]
async fn test_empty_profile_is_not_available() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/stock/profile2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let err = gateway.get_company_profile("NOPE").await.unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let cases = [
        (401, "auth"),
        (404, "missing"),
        (429, "limited"),
        (503, "down"),
    ];

    for (status, symbol) in cases {
        let (server, gateway) = gateway().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = gateway.get_quote(symbol).await.unwrap_err();
        match status {
            401 => assert!(matches!(err, ProviderError::Auth(_))),
            404 => assert!(matches!(err, ProviderError::DataNotAvailable(_))),
            429 => {
                assert!(matches!(err, ProviderError::RateLimited { .. }));
                assert!(err.is_recoverable());
            }
            _ => {
                assert!(matches!(err, ProviderError::Unavailable(_)));
                assert!(err.is_recoverable());
            }
        }
    }
}

#[tokio::test]
async fn test_malformed_body_is_internal_error() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = gateway.get_quote("AAPL").await.unwrap_err();
    assert!(matches!(err, ProviderError::Internal(_)));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_candles_no_data_is_empty() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/stock/candle"))
        .and(query_param("resolution", "M"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"s": "no_data"})))
        .mount(&server)
        .await;

    let to = Utc::now();
    let candles = gateway
        .get_stock_candles("AAPL", "M", to - Duration::days(365), to)
        .await
        .unwrap();
    assert!(candles.is_empty());
}

#[tokio::test]
async fn test_candles_are_sorted() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/stock/candle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "s": "ok",
            "t": [1704067200, 1672531200],
            "o": [2.0, 1.0],
            "h": [2.0, 1.0],
            "l": [2.0, 1.0],
            "c": [2.0, 1.0],
            "v": [10.0, 20.0]
        })))
        .mount(&server)
        .await;

    let to = Utc::now();
    let candles = gateway
        .get_stock_candles("AAPL", "M", to - Duration::days(900), to)
        .await
        .unwrap();
    assert_eq!(candles.len(), 2);
    assert!(candles[0].timestamp < candles[1].timestamp);
    assert_eq!(candles[0].close, 1.0);
}

#[tokio::test]
async fn test_standardized_statements_are_merged_per_period() {
    let (server, gateway) = gateway().await;
    for (statement, body) in [
        (
            "bs",
            json!({"financials": [{"period": "2023-12-31", "year": 2023, "totalEquity": 500.0}]}),
        ),
        (
            "ic",
            json!({"financials": [{"period": "2023-12-31", "year": 2023, "revenue": 900.0}]}),
        ),
        (
            "cf",
            json!({"financials": [{"period": "2023-12-31", "year": 2023, "freeCashFlow": 120.0}]}),
        ),
    ] {
        Mock::given(method("GET"))
            .and(path("/stock/financials"))
            .and(query_param("statement", statement))
            .and(query_param("freq", "annual"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    let periods = gateway
        .get_financial_statements("MSFT", PeriodKind::Annual)
        .await
        .unwrap();
    assert_eq!(periods.len(), 1);
    let p = &periods[0];
    assert_eq!(p.year, Some(2023));
    assert_eq!(p.values.get("totalEquity"), Some(&json!(500.0)));
    assert_eq!(p.values.get("revenue"), Some(&json!(900.0)));
    assert_eq!(p.values.get("freeCashFlow"), Some(&json!(120.0)));
}

#[tokio::test]
async fn test_empty_reported_is_not_available() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/stock/financials-reported"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let err = gateway
        .get_financials_reported("XYZ", PeriodKind::Annual)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}

//! Yahoo Finance daily bars
//!
//! Uses the public v8 chart endpoint. OHLC are scaled by
//! `adjclose / close` so splits and dividends don't show up as price gaps.
//! Null cells come back as NaN bars.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::BarSource;
use crate::bar::Bar;
use crate::error::{Result, VpaError};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; vpa-scanner)";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Turn a chart response body into bars
pub fn parse_chart(symbol: &str, body: &[u8]) -> Result<Vec<Bar>> {
    let response: ChartResponse =
        serde_json::from_slice(body).map_err(|e| VpaError::fetch(symbol, format!("bad chart payload: {}", e)))?;

    if let Some(err) = response.chart.error {
        return Err(VpaError::fetch(symbol, format!("{}: {}", err.code, err.description)));
    }
    let result = response
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or_else(|| VpaError::fetch(symbol, "empty chart result"))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten().unwrap_or(f64::NAN);

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &secs) in result.timestamp.iter().enumerate() {
        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| VpaError::fetch(symbol, format!("bad timestamp {}", secs)))?;

        let close = at(&quote.close, i);
        let factor = match adjclose.get(i).copied().flatten() {
            Some(adj) if close.is_finite() && close != 0.0 => adj / close,
            _ => 1.0,
        };

        bars.push(Bar {
            timestamp,
            open: at(&quote.open, i) * factor,
            high: at(&quote.high, i) * factor,
            low: at(&quote.low, i) * factor,
            close: close * factor,
            volume: at(&quote.volume, i),
        });
    }
    Ok(bars)
}

pub struct YahooBarSource {
    client: Client,
    base_url: String,
}

impl YahooBarSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl BarSource for YahooBarSource {
    async fn fetch_bars(&self, symbol: &str, start: NaiveDate) -> Result<Vec<Bar>> {
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|ts| ts.and_utc().timestamp())
            .unwrap_or(0);
        let period2 = Utc::now().timestamp();
        let url = format!(
            "{}/{}?period1={}&period2={}&interval=1d&includeAdjustedClose=true",
            self.base_url,
            symbol.to_uppercase(),
            period1,
            period2
        );

        debug!("Fetching {} daily bars from {}", symbol, start);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VpaError::fetch(symbol, e))?;

        if !response.status().is_success() {
            return Err(VpaError::fetch(symbol, format!("HTTP {}", response.status())));
        }

        let body = response.bytes().await.map_err(|e| VpaError::fetch(symbol, e))?;
        let bars = parse_chart(symbol, &body)?;
        debug!("Fetched {} bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "SPY"},
                "timestamp": [1704205800, 1704292200],
                "indicators": {
                    "quote": [{
                        "open": [100.0, null],
                        "high": [102.0, 103.0],
                        "low": [99.0, 100.0],
                        "close": [101.0, 102.0],
                        "volume": [1000, 2000]
                    }],
                    "adjclose": [{"adjclose": [50.5, 102.0]}]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_adjusts_and_keeps_gaps() {
        let bars = parse_chart("SPY", BODY.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);

        // factor 0.5 on the first bar
        assert_eq!(bars[0].open, 50.0);
        assert_eq!(bars[0].high, 51.0);
        assert_eq!(bars[0].close, 50.5);
        assert_eq!(bars[0].volume, 1000.0);

        assert!(bars[1].open.is_nan());
        assert!(!bars[1].is_well_formed());
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[test]
    fn test_parse_chart_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart("ZZZZ", body.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("delisted"));
        assert!(matches!(err, VpaError::DataFetch { .. }));
    }
}

//! CSV bar files
//!
//! One file per symbol, `<dir>/<SYMBOL>.csv`, header
//! `timestamp,open,high,low,close,volume`. `Date`/`Open`/... headers as
//! written by yfinance exports are accepted too. Empty cells load as NaN
//! and are rejected later by the pipeline instead of being zero-filled.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::BarSource;
use crate::bar::Bar;
use crate::error::{Result, VpaError};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "date", alias = "Date", alias = "Datetime", alias = "Timestamp")]
    timestamp: String,
    #[serde(alias = "Open")]
    open: Option<f64>,
    #[serde(alias = "High")]
    high: Option<f64>,
    #[serde(alias = "Low")]
    low: Option<f64>,
    #[serde(alias = "Close")]
    close: Option<f64>,
    #[serde(alias = "Volume")]
    volume: Option<f64>,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and plain `YYYY-MM-DD` (midnight UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Parse bars from CSV text
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    for (row_idx, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| VpaError::MalformedBar {
            index: row_idx,
            reason: format!("unparseable timestamp '{}'", row.timestamp),
        })?;
        let field = |v: Option<f64>| v.unwrap_or(f64::NAN);
        bars.push(Bar {
            timestamp,
            open: field(row.open),
            high: field(row.high),
            low: field(row.low),
            close: field(row.close),
            volume: field(row.volume),
        });
    }
    Ok(bars)
}

/// Reads `<dir>/<SYMBOL>.csv`
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn fetch_bars(&self, symbol: &str, start: NaiveDate) -> Result<Vec<Bar>> {
        let path = self.path_for(symbol);
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| VpaError::fetch(symbol, format!("{}: {}", path.display(), e)))?;

        let bars: Vec<Bar> = read_bars(&raw[..])
            .map_err(|e| VpaError::fetch(symbol, e))?
            .into_iter()
            .filter(|b| b.timestamp.date_naive() >= start)
            .collect();

        debug!("Loaded {} bars for {} from {:?}", bars.len(), symbol, path);
        Ok(bars)
    }
}

//! Bar sources
//!
//! Where OHLCV bars come from. The pipeline only sees [`BarSource`]; each
//! adapter is responsible for its own I/O and timeouts.

pub mod csv;
pub mod yahoo;

pub use self::csv::CsvBarSource;
pub use self::yahoo::YahooBarSource;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::bar::{Bar, BarSeries};
use crate::error::{Result, VpaError};

#[async_trait]
pub trait BarSource: Send + Sync {
    /// Daily bars for `symbol` from `start` (inclusive) to the latest available
    async fn fetch_bars(&self, symbol: &str, start: NaiveDate) -> Result<Vec<Bar>>;

    /// Fetch and validate ordering in one step
    async fn fetch_series(&self, symbol: &str, start: NaiveDate) -> Result<BarSeries> {
        let bars = self.fetch_bars(symbol, start).await?;
        BarSeries::new(symbol, bars).map_err(|e| VpaError::fetch(symbol, e))
    }
}

/// Preloaded bars keyed by symbol
#[derive(Debug, Clone, Default)]
pub struct MemoryBarSource {
    bars: HashMap<String, Vec<Bar>>,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_uppercase(), bars);
        self
    }
}

#[async_trait]
impl BarSource for MemoryBarSource {
    async fn fetch_bars(&self, symbol: &str, start: NaiveDate) -> Result<Vec<Bar>> {
        let bars = self
            .bars
            .get(&symbol.to_uppercase())
            .ok_or_else(|| VpaError::fetch(symbol, "unknown symbol"))?;
        Ok(bars
            .iter()
            .filter(|b| b.timestamp.date_naive() >= start)
            .copied()
            .collect())
    }
}

//! Bar types
//!
//! Daily OHLCV candles and the ordered series the pipeline consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VpaError};

/// Single OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle body direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Flat => write!(f, "flat"),
        }
    }
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// High minus low
    pub fn spread(&self) -> f64 {
        self.high - self.low
    }

    pub fn direction(&self) -> Direction {
        if self.close > self.open {
            Direction::Up
        } else if self.close < self.open {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    /// All fields finite, high >= low and volume >= 0.
    pub fn is_well_formed(&self) -> bool {
        self.defect().is_none()
    }

    /// Describe what is wrong with the bar, if anything
    pub fn defect(&self) -> Option<String> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Some(format!("{} is not a finite number", name));
        }
        if self.high < self.low {
            return Some(format!("high {} below low {}", self.high, self.low));
        }
        if self.volume < 0.0 {
            return Some(format!("negative volume {}", self.volume));
        }
        None
    }
}

/// Chronologically ordered bars for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct BarSeries {
    pub symbol: String,
    bars: Vec<Bar>,
}

#[derive(Deserialize)]
struct RawSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl TryFrom<RawSeries> for BarSeries {
    type Error = VpaError;

    fn try_from(raw: RawSeries) -> Result<Self> {
        BarSeries::new(raw.symbol, raw.bars)
    }
}

impl BarSeries {
    /// Build a series, rejecting empty input and out-of-order or duplicate timestamps.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        if bars.is_empty() {
            return Err(VpaError::EmptySeries);
        }
        if let Some(idx) = bars
            .windows(2)
            .position(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(VpaError::UnorderedSeries { index: idx + 1 });
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> &Bar {
        &self.bars[0]
    }

    pub fn last(&self) -> &Bar {
        &self.bars[self.bars.len() - 1]
    }

    /// Most recent `n` bars (the whole series when shorter)
    pub fn tail(&self, n: usize) -> BarSeries {
        let start = self.bars.len().saturating_sub(n.max(1));
        BarSeries {
            symbol: self.symbol.clone(),
            bars: self.bars[start..].to_vec(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_direction_from_open_close() {
        let bars = bars_from(&[(10.0, 11.0, 2.0, 1.0), (10.0, 9.0, 2.0, 1.0), (10.0, 10.0, 2.0, 1.0)]);
        assert_eq!(bars[0].direction(), Direction::Up);
        assert_eq!(bars[1].direction(), Direction::Down);
        assert_eq!(bars[2].direction(), Direction::Flat);
        assert_eq!(bars[0].spread(), 2.0);
    }

    #[test]
    fn test_malformed_bar_detection() {
        let mut bar = Bar::new(day(0), 1.0, 2.0, 0.5, 1.5, 100.0);
        assert!(bar.is_well_formed());
        bar.close = f64::NAN;
        assert!(bar.defect().unwrap().contains("close"));
        bar.close = 1.5;
        bar.high = 0.1;
        assert!(!bar.is_well_formed());
    }

    #[test]
    fn test_series_rejects_bad_input() {
        assert!(matches!(BarSeries::new("X", vec![]), Err(VpaError::EmptySeries)));

        let mut bars = bars_from(&[(1.0, 2.0, 1.0, 1.0), (1.0, 2.0, 1.0, 1.0), (1.0, 2.0, 1.0, 1.0)]);
        bars[2].timestamp = bars[1].timestamp;
        assert!(matches!(
            BarSeries::new("X", bars),
            Err(VpaError::UnorderedSeries { index: 2 })
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let empty = serde_json::from_str::<BarSeries>(r#"{"symbol":"X","bars":[]}"#);
        assert!(empty.unwrap_err().to_string().contains("empty"));

        let mut bars = bars_from(&[(1.0, 2.0, 1.0, 1.0), (1.0, 2.0, 1.0, 1.0)]);
        bars.swap(0, 1);
        let json = format!(r#"{{"symbol":"X","bars":{}}}"#, serde_json::to_string(&bars).unwrap());
        assert!(serde_json::from_str::<BarSeries>(&json).is_err());

        let series = series_from_closes(&[1.0, 2.0]);
        let back: BarSeries = serde_json::from_str(&serde_json::to_string(&series).unwrap()).unwrap();
        assert_eq!(back.bars(), series.bars());
    }

    #[test]
    fn test_tail() {
        let series = series_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let tail = series.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.first().close, 3.0);
        assert_eq!(series.tail(10).len(), 4);
    }
}

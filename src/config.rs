//! Configuration for the VPA pipeline
//!
//! One explicit struct per component, gathered into [`VpaConfig`]. Every
//! constructor that takes a config validates it, so a bad value fails
//! before any bar is processed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, VpaError};

/// Which signal directions the simulator is allowed to trade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    LongOnly,
    ShortOnly,
    #[default]
    LongShort,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongOnly => write!(f, "long_only"),
            Self::ShortOnly => write!(f, "short_only"),
            Self::LongShort => write!(f, "long_short"),
        }
    }
}

impl std::str::FromStr for TradeMode {
    type Err = VpaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "long_only" | "long" => Ok(Self::LongOnly),
            "short_only" | "short" => Ok(Self::ShortOnly),
            "long_short" | "both" => Ok(Self::LongShort),
            other => Err(VpaError::invalid(
                "mode",
                other,
                "expected long_only, short_only or long_short",
            )),
        }
    }
}

/// How a percentile sitting exactly on a threshold is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// `>= high` counts as high, `<= low` counts as low
    #[default]
    Inclusive,
    /// `> high` counts as high, `< low` counts as low
    Exclusive,
}

/// LOW/HIGH percentile-rank cut-offs for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { low: 0.3, high: 0.7 }
    }
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        let thresholds = Self { low, high };
        thresholds.validate("thresholds")?;
        Ok(thresholds)
    }

    pub fn validate(&self, field: &'static str) -> Result<()> {
        for value in [self.low, self.high] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VpaError::invalid(field, value, "threshold must lie in [0, 1]"));
            }
        }
        if self.low >= self.high {
            return Err(VpaError::invalid(
                field,
                format!("low={} high={}", self.low, self.high),
                "low must be strictly below high",
            ));
        }
        Ok(())
    }
}

/// Classifier thresholds, shared between spread and volume unless overridden
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub spread: Thresholds,
    pub volume: Thresholds,
    pub boundary: Boundary,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::shared(Thresholds::default())
    }
}

impl ClassifierConfig {
    pub fn shared(thresholds: Thresholds) -> Self {
        Self {
            spread: thresholds,
            volume: thresholds,
            boundary: Boundary::Inclusive,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.spread.validate("spread_thresholds")?;
        self.volume.validate("volume_thresholds")?;
        Ok(())
    }
}

/// Simulator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Bars a position is held before it is closed
    pub hold_bars: usize,
    /// Fraction of equity charged at each entry and each exit
    pub cost_per_trade: f64,
    pub mode: TradeMode,
    /// Bars per year, used to annualize CAGR, volatility and Sharpe
    pub periods_per_year: f64,
    /// Starting capital, only used to report final capital
    pub initial_equity: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            hold_bars: 5,
            cost_per_trade: 0.001,
            mode: TradeMode::LongShort,
            periods_per_year: 252.0,
            initial_equity: 10_000.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hold_bars == 0 {
            return Err(VpaError::invalid("hold_bars", self.hold_bars, "must be positive"));
        }
        if !self.cost_per_trade.is_finite() || self.cost_per_trade < 0.0 {
            return Err(VpaError::invalid(
                "cost_per_trade",
                self.cost_per_trade,
                "must be a non-negative fraction",
            ));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(VpaError::invalid(
                "periods_per_year",
                self.periods_per_year,
                "must be positive",
            ));
        }
        if !self.initial_equity.is_finite() || self.initial_equity <= 0.0 {
            return Err(VpaError::invalid(
                "initial_equity",
                self.initial_equity,
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Full run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpaConfig {
    pub symbol: String,
    pub start_date: NaiveDate,
    /// Rolling window size W for percentile ranks
    pub lookback_window: usize,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Default for VpaConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            lookback_window: 20,
            classifier: ClassifierConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl VpaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(VpaError::invalid("symbol", &self.symbol, "must not be empty"));
        }
        validate_window(self.lookback_window)?;
        self.classifier.validate()?;
        self.backtest.validate()?;
        Ok(())
    }

    /// Load a JSON config file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: VpaConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn validate_window(window: usize) -> Result<()> {
    if window == 0 {
        return Err(VpaError::invalid("lookback_window", window, "must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        VpaConfig::default().validate().unwrap();
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = Thresholds::new(0.7, 0.3).unwrap_err();
        assert!(matches!(err, VpaError::InvalidConfiguration { field: "thresholds", .. }));

        let mut config = VpaConfig::default();
        config.classifier.volume = Thresholds { low: 0.5, high: 0.5 };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("volume_thresholds"));
    }

    #[test]
    fn test_non_positive_values_rejected() {
        let mut config = VpaConfig::default();
        config.lookback_window = 0;
        assert!(config.validate().unwrap_err().to_string().contains("lookback_window"));

        let mut config = VpaConfig::default();
        config.backtest.hold_bars = 0;
        assert!(config.validate().unwrap_err().to_string().contains("hold_bars"));

        let mut config = VpaConfig::default();
        config.backtest.cost_per_trade = -0.01;
        assert!(config.validate().unwrap_err().to_string().contains("cost_per_trade"));
    }

    #[test]
    fn test_enum_defaults() {
        assert_eq!(TradeMode::default(), TradeMode::LongShort);
        assert_eq!(Boundary::default(), Boundary::Inclusive);
        assert_eq!(BacktestConfig::default().mode, TradeMode::LongShort);
    }

    #[test]
    fn test_trade_mode_parsing() {
        assert_eq!("long_only".parse::<TradeMode>().unwrap(), TradeMode::LongOnly);
        assert_eq!("long-short".parse::<TradeMode>().unwrap(), TradeMode::LongShort);
        assert!("sideways".parse::<TradeMode>().is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let json = r#"{"symbol":"QQQ","start_date":"2017-01-01","lookback_window":10,"backtest":{"hold_bars":3}}"#;
        let config: VpaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.backtest.hold_bars, 3);
        assert_eq!(config.backtest.cost_per_trade, 0.001);
        assert_eq!(config.classifier.spread, Thresholds::default());
        config.validate().unwrap();
    }
}

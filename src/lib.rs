// Library crate - VPA anomaly classification, backtest and live scan

pub mod backtest;
pub mod bar;
pub mod config;
pub mod error;
pub mod export;
pub mod scanner;
pub mod sources;
pub mod universe;
pub mod vpa;

// Re-export commonly used types
pub use backtest::{run_backtest, BacktestMetrics, BacktestResult, Backtester, EquityPoint, Trade};
pub use bar::{Bar, BarSeries, Direction};
pub use config::{BacktestConfig, Boundary, ClassifierConfig, Thresholds, TradeMode, VpaConfig};
pub use error::{Result, VpaError};
pub use scanner::{LiveScanner, ScanConfig, ScanOutcome, ScanReport};
pub use sources::{BarSource, CsvBarSource, MemoryBarSource, YahooBarSource};
pub use vpa::{AnomalyClassifier, AnomalyLabel, ClassifiedBar, RollingStats, Signal, VpaPipeline};

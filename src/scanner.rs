//! Live Scanner
//!
//! Runs the VPA pipeline over the most recent bars of each watchlist symbol
//! and reports the latest bar's anomaly. Every symbol is fetched and
//! classified on its own task; a failure is recorded in the report and the
//! rest of the scan carries on.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bar::BarSeries;
use crate::config::{validate_window, ClassifierConfig};
use crate::error::{Result, VpaError};
use crate::sources::BarSource;
use crate::vpa::{AnomalyLabel, Signal, VpaPipeline};

/// Scanner parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub lookback_window: usize,
    /// Extra bars beyond the window that must be present
    pub buffer: usize,
    /// Calendar days of history requested from the source
    pub history_days: i64,
    pub classifier: ClassifierConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lookback_window: 20,
            buffer: 2,
            history_days: 120,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.lookback_window)?;
        self.classifier.validate()?;
        // ~5 trading days per 7 calendar days
        let min_days = ((self.lookback_window + self.buffer) as i64 * 7) / 5 + 1;
        if self.history_days < min_days {
            return Err(VpaError::invalid(
                "history_days",
                self.history_days,
                format!("need at least {} calendar days for {} bars", min_days, self.lookback_window + self.buffer),
            ));
        }
        Ok(())
    }

    pub fn bars_needed(&self) -> usize {
        self.lookback_window + self.buffer
    }
}

/// Latest bar of a symbol after classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanHit {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
    pub label: AnomalyLabel,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanOutcome {
    Classified(ScanHit),
    InsufficientHistory { needed: usize, available: usize },
    /// Bars were loaded but the latest one could not be ranked
    Unclassifiable { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: String,
    pub outcome: ScanOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    /// Sorted by symbol
    pub results: Vec<ScanResult>,
}

impl ScanReport {
    /// Symbols whose latest bar is an anomaly
    pub fn alerts(&self) -> Vec<(&str, &ScanHit)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                ScanOutcome::Classified(hit) if hit.label.is_anomaly() => Some((r.symbol.as_str(), hit)),
                _ => None,
            })
            .collect()
    }

    pub fn clean(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(&r.outcome, ScanOutcome::Classified(hit) if !hit.label.is_anomaly()))
            .map(|r| r.symbol.as_str())
            .collect()
    }

    /// Symbols that could not be classified, with the reason
    pub fn failures(&self) -> Vec<(&str, String)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                ScanOutcome::Classified(_) => None,
                ScanOutcome::InsufficientHistory { needed, available } => Some((
                    r.symbol.as_str(),
                    VpaError::InsufficientHistory {
                        needed: *needed,
                        available: *available,
                    }
                    .to_string(),
                )),
                ScanOutcome::Unclassifiable { reason } => Some((r.symbol.as_str(), reason.clone())),
                ScanOutcome::Failed { error } => Some((r.symbol.as_str(), error.clone())),
            })
            .collect()
    }
}

pub struct LiveScanner {
    source: Arc<dyn BarSource>,
    pipeline: VpaPipeline,
    config: ScanConfig,
}

impl LiveScanner {
    pub fn new(source: Arc<dyn BarSource>, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = VpaPipeline::new(config.lookback_window, config.classifier)?;
        Ok(Self {
            source,
            pipeline,
            config,
        })
    }

    /// Classify the latest bar of an already-loaded series
    pub fn evaluate(&self, series: &BarSeries) -> ScanOutcome {
        evaluate_latest(&self.pipeline, self.config.bars_needed(), series)
    }

    pub async fn scan(&self, symbols: &[String], today: NaiveDate) -> ScanReport {
        let start = today - Duration::days(self.config.history_days);
        info!("Scanning {} symbols from {}", symbols.len(), start);

        let handles: Vec<_> = symbols
            .iter()
            .map(|symbol| {
                let symbol = symbol.clone();
                let source = Arc::clone(&self.source);
                let pipeline = self.pipeline;
                let needed = self.config.bars_needed();
                let handle = tokio::spawn({
                    let symbol = symbol.clone();
                    async move {
                        match source.fetch_series(&symbol, start).await {
                            Ok(series) => evaluate_latest(&pipeline, needed, &series),
                            Err(e) => ScanOutcome::Failed { error: e.to_string() },
                        }
                    }
                });
                (symbol, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (symbol, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ScanOutcome::Failed {
                    error: format!("scan task aborted: {}", e),
                },
            };
            match &outcome {
                ScanOutcome::Failed { error } => warn!("{}: {}", symbol, error),
                ScanOutcome::InsufficientHistory { needed, available } => {
                    warn!("{}: only {} of {} bars, skipped", symbol, available, needed)
                }
                ScanOutcome::Unclassifiable { reason } => warn!("{}: {}", symbol, reason),
                ScanOutcome::Classified(hit) if hit.label.is_anomaly() => {
                    info!("{}: {} at {:.2}", symbol, hit.label, hit.close)
                }
                ScanOutcome::Classified(_) => {}
            }
            results.push(ScanResult { symbol, outcome });
        }

        results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        ScanReport {
            generated_at: Utc::now(),
            results,
        }
    }
}

fn evaluate_latest(pipeline: &VpaPipeline, needed: usize, series: &BarSeries) -> ScanOutcome {
    if series.len() < needed {
        return ScanOutcome::InsufficientHistory {
            needed,
            available: series.len(),
        };
    }
    let tail = series.tail(needed);
    match pipeline.analyze(&tail).last() {
        Some(last) if last.percentiles.is_none() => ScanOutcome::Unclassifiable {
            reason: format!(
                "latest bar {} not ranked: malformed bar within the last {}",
                last.timestamp.date_naive(),
                pipeline.window()
            ),
        },
        Some(last) => ScanOutcome::Classified(ScanHit {
            timestamp: last.timestamp,
            close: last.close,
            volume: last.volume,
            label: last.label,
            signal: last.signal,
        }),
        None => ScanOutcome::InsufficientHistory { needed, available: 0 },
    }
}

/// Print the scan as a table: anomalies, then clean symbols, then failures
pub fn print_scan_report(report: &ScanReport) {
    let now_et = report.generated_at.with_timezone(&New_York);
    println!();
    println!("{}", "=".repeat(70));
    println!("  VPA ANOMALY SCANNER  |  {} ET", now_et.format("%Y-%m-%d %H:%M"));
    println!("{}", "=".repeat(70));

    let alerts = report.alerts();
    if alerts.is_empty() {
        println!("\n  No anomalies detected today.");
    } else {
        println!("\n  *** ANOMALIES DETECTED ({}) ***", alerts.len());
        println!("  {:<8} {:>10}  {:>14}  {:<6} Signal", "Symbol", "Price", "Volume", "Side");
        println!("  {}", "-".repeat(64));
        for (symbol, hit) in alerts {
            println!(
                "  {:<8} {:>10.2}  {:>14.0}  {:<6} {}",
                symbol,
                hit.close,
                hit.volume,
                hit.signal,
                hit.label.description()
            );
        }
    }

    println!("\n  Clean (no anomaly): {}", report.clean().join(", "));

    let failures = report.failures();
    if !failures.is_empty() {
        println!("\n  Not scanned:");
        for (symbol, reason) in failures {
            println!("  {:<8} ERROR: {}", symbol, reason);
        }
    }
    println!("{}", "=".repeat(70));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_util::{bars_from, day};
    use crate::config::Thresholds;
    use crate::sources::MemoryBarSource;
    use async_trait::async_trait;

    /// Five rising spreads with falling volume, ending in a fake up bar
    fn fake_up_bars() -> Vec<crate::bar::Bar> {
        bars_from(&[
            (100.0, 100.5, 1.0, 50.0),
            (100.0, 100.5, 2.0, 40.0),
            (100.0, 100.5, 3.0, 30.0),
            (100.0, 100.5, 4.0, 20.0),
            (100.0, 100.5, 5.0, 10.0),
        ])
    }

    fn config() -> ScanConfig {
        ScanConfig {
            lookback_window: 3,
            buffer: 1,
            history_days: 30,
            classifier: ClassifierConfig::shared(Thresholds { low: 0.34, high: 0.7 }),
        }
    }

    struct FailingSource;

    #[async_trait]
    impl BarSource for FailingSource {
        async fn fetch_bars(&self, symbol: &str, _start: NaiveDate) -> Result<Vec<crate::bar::Bar>> {
            if symbol == "BAD" {
                Err(VpaError::fetch(symbol, "connection reset"))
            } else {
                Ok(fake_up_bars())
            }
        }
    }

    fn today() -> NaiveDate {
        day(10).date_naive()
    }

    #[tokio::test]
    async fn test_scan_classifies_latest_bar() {
        let source = MemoryBarSource::new().with_symbol("SPY", fake_up_bars());
        let scanner = LiveScanner::new(Arc::new(source), config()).unwrap();

        let report = scanner.scan(&["SPY".to_string()], today()).await;
        let alerts = report.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "SPY");
        assert_eq!(alerts[0].1.label, AnomalyLabel::FakeUp);
        assert_eq!(alerts[0].1.signal, Signal::Short);
        assert_eq!(alerts[0].1.timestamp, day(4));
    }

    #[tokio::test]
    async fn test_failed_symbol_does_not_abort_scan() {
        let scanner = LiveScanner::new(Arc::new(FailingSource), config()).unwrap();
        let symbols: Vec<String> = ["QQQ", "BAD", "IWM"].iter().map(|s| s.to_string()).collect();

        let report = scanner.scan(&symbols, today()).await;
        let names: Vec<_> = report.results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(names, vec!["BAD", "IWM", "QQQ"]);
        assert_eq!(report.alerts().len(), 2);

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "BAD");
        assert!(failures[0].1.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_short_history_reported() {
        let source = MemoryBarSource::new().with_symbol("NEW", fake_up_bars()[..3].to_vec());
        let scanner = LiveScanner::new(Arc::new(source), config()).unwrap();

        let report = scanner.scan(&["NEW".to_string()], today()).await;
        assert_eq!(
            report.results[0].outcome,
            ScanOutcome::InsufficientHistory { needed: 4, available: 3 }
        );
        assert!(report.clean().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_latest_bar_is_not_clean() {
        let mut bars = fake_up_bars();
        bars[4].volume = f64::NAN;
        let source = MemoryBarSource::new().with_symbol("SPY", bars);
        let scanner = LiveScanner::new(Arc::new(source), config()).unwrap();

        let report = scanner.scan(&["SPY".to_string()], today()).await;
        assert!(matches!(report.results[0].outcome, ScanOutcome::Unclassifiable { .. }));
        assert!(report.clean().is_empty());
        assert!(report.alerts().is_empty());

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("not ranked"));
    }

    #[test]
    fn test_evaluate_uses_tail_only() {
        let scanner = LiveScanner::new(Arc::new(MemoryBarSource::new()), ScanConfig { buffer: 0, ..config() }).unwrap();

        // an early huge-volume bar must not influence the latest rank
        let mut rows = vec![(100.0, 100.5, 1.0, 1_000_000.0)];
        rows.extend([(100.0, 100.5, 1.0, 30.0), (100.0, 100.5, 2.0, 20.0), (100.0, 100.5, 5.0, 10.0)]);
        let series = BarSeries::new("X", bars_from(&rows)).unwrap();

        match scanner.evaluate(&series) {
            ScanOutcome::Classified(hit) => assert_eq!(hit.label, AnomalyLabel::FakeUp),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_history_days_must_cover_window() {
        let cfg = ScanConfig {
            lookback_window: 20,
            buffer: 2,
            history_days: 10,
            ..ScanConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(ScanConfig::default().validate().is_ok());
    }
}

//! Backtest Simulator
//!
//! Walks the classified bars once, holding at most one position at a time:
//!
//! - FLAT: a tradable signal on bar i opens a position at close[i] and
//!   charges the entry cost on that bar.
//! - OPEN: each later bar is marked to market and counts towards the hold.
//!   Once `hold_bars` bars have passed the position closes on that bar and
//!   the exit cost is charged. Signals seen while open are ignored.
//!
//! Equity starts at 1.0 and compounds per bar:
//! `equity[t] = equity[t-1] * (1 + bar_return[t] - cost[t])`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::bar::BarSeries;
use crate::config::{BacktestConfig, TradeMode, VpaConfig};
use crate::error::Result;
use crate::vpa::{anomaly_counts, AnomalyLabel, ClassifiedBar, Signal, VpaPipeline};

/// One point of the normalized equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// A closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub direction: Signal,
    /// Anomaly that triggered the entry
    pub label: AnomalyLabel,
    pub entry_price: f64,
    pub exit_price: f64,
    pub bars_held: usize,
    /// Direction-adjusted price return, before costs
    pub gross_return: f64,
    /// Closed at the last bar before the hold period ran out
    pub forced_close: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenPosition {
    entry_index: usize,
    direction: Signal,
    label: AnomalyLabel,
    entry_price: f64,
    bars_held: usize,
}

/// Buy-and-hold over the same bars, for comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuyAndHold {
    pub total_return: f64,
    pub cagr: f64,
}

/// Summary record of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline as a fraction <= 0
    pub max_drawdown: f64,
    pub final_equity: f64,
    pub final_capital: f64,
    pub trade_count: usize,
    pub trades_by_label: BTreeMap<AnomalyLabel, usize>,
    /// Bars classified per label, traded or not
    pub anomalies_detected: BTreeMap<AnomalyLabel, usize>,
    pub buy_and_hold: BuyAndHold,
}

impl BacktestMetrics {
    /// Flat key -> value view for export
    pub fn to_record(&self) -> Vec<(String, f64)> {
        let mut record = vec![
            ("TotalReturn".to_string(), self.total_return),
            ("CAGR".to_string(), self.cagr),
            ("AnnualVolatility".to_string(), self.annual_volatility),
            ("Sharpe".to_string(), self.sharpe_ratio),
            ("MaxDrawdown".to_string(), self.max_drawdown),
            ("FinalEquity".to_string(), self.final_equity),
            ("FinalCapital".to_string(), self.final_capital),
            ("TradeCount".to_string(), self.trade_count as f64),
            ("BuyHoldReturn".to_string(), self.buy_and_hold.total_return),
            ("BuyHoldCAGR".to_string(), self.buy_and_hold.cagr),
        ];
        for (label, count) in &self.trades_by_label {
            record.push((format!("Trades{}", label), *count as f64));
        }
        for (label, count) in &self.anomalies_detected {
            record.push((format!("Detected{}", label), *count as f64));
        }
        record
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub mode: TradeMode,
    pub config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
}

pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn allows(&self, signal: Signal) -> bool {
        match (self.config.mode, signal) {
            (_, Signal::Flat) => false,
            (TradeMode::LongShort, _) => true,
            (TradeMode::LongOnly, Signal::Long) => true,
            (TradeMode::ShortOnly, Signal::Short) => true,
            _ => false,
        }
    }

    pub fn run(&self, symbol: &str, bars: &[ClassifiedBar]) -> BacktestResult {
        let cost = self.config.cost_per_trade;
        let n = bars.len();

        let mut equity_curve = Vec::with_capacity(n);
        let mut trades = Vec::new();
        let mut position: Option<OpenPosition> = None;
        let mut equity = 1.0;
        let mut last_close: Option<f64> = None;

        for (t, bar) in bars.iter().enumerate() {
            let close = if bar.close.is_finite() && bar.close > 0.0 {
                Some(bar.close)
            } else {
                None
            };

            if t > 0 {
                let mut bar_return = 0.0;
                let mut bar_cost = 0.0;

                if let Some(mut pos) = position.take() {
                    match (close, last_close) {
                        (Some(c), Some(prev)) => bar_return = pos.direction.sign() * (c / prev - 1.0),
                        _ => warn!("{}: no usable close at bar {} ({}), holding value flat", symbol, t, bar.timestamp),
                    }
                    pos.bars_held += 1;

                    let is_last = t == n - 1;
                    if pos.bars_held >= self.config.hold_bars || is_last {
                        let forced = pos.bars_held < self.config.hold_bars;
                        if forced {
                            warn!("{}: forcing close of open {} at final bar {}", symbol, pos.direction, t);
                        }
                        bar_cost += cost;
                        let exit_price = close.or(last_close).unwrap_or(pos.entry_price);
                        let trade = close_trade(&pos, t, bars, exit_price, forced);
                        debug!(
                            "{}: {} {} {} -> {} ({:.2}%)",
                            symbol,
                            trade.direction,
                            trade.label,
                            trade.entry_time.date_naive(),
                            trade.exit_time.date_naive(),
                            trade.gross_return * 100.0
                        );
                        trades.push(trade);
                    } else {
                        position = Some(pos);
                    }
                }

                // Flat (possibly just exited): bar 0 and the final bar never open
                if position.is_none() && t < n - 1 && self.allows(bar.signal) {
                    if let Some(c) = close {
                        position = Some(OpenPosition {
                            entry_index: t,
                            direction: bar.signal,
                            label: bar.label,
                            entry_price: c,
                            bars_held: 0,
                        });
                        bar_cost += cost;
                    }
                }

                // a wiped-out account stays at zero
                equity = (equity * (1.0 + bar_return - bar_cost)).max(0.0);
            }

            if close.is_some() {
                last_close = close;
            }
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
            });
        }

        let metrics = self.compute_metrics(bars, &equity_curve, &trades);
        info!(
            "{} [{}]: {} trades, final equity {:.4}",
            symbol, self.config.mode, metrics.trade_count, metrics.final_equity
        );

        BacktestResult {
            symbol: symbol.to_string(),
            mode: self.config.mode,
            config: self.config,
            metrics,
            equity_curve,
            trades,
        }
    }

    fn compute_metrics(
        &self,
        bars: &[ClassifiedBar],
        curve: &[EquityPoint],
        trades: &[Trade],
    ) -> BacktestMetrics {
        let ppy = self.config.periods_per_year;
        let final_equity = curve.last().map(|p| p.equity).unwrap_or(1.0);
        let total_return = final_equity - 1.0;

        let returns: Vec<f64> = curve
            .windows(2)
            .map(|w| {
                if w[0].equity != 0.0 {
                    w[1].equity / w[0].equity - 1.0
                } else {
                    0.0
                }
            })
            .collect();

        let std_dev = sample_std(&returns);
        let mean = if returns.is_empty() {
            0.0
        } else {
            returns.iter().sum::<f64>() / returns.len() as f64
        };
        let sharpe_ratio = if std_dev > 0.0 {
            mean / std_dev * ppy.sqrt()
        } else {
            0.0
        };

        let mut peak = f64::MIN;
        let mut max_drawdown = 0.0_f64;
        for point in curve {
            peak = peak.max(point.equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.min(point.equity / peak - 1.0);
            }
        }

        let mut trades_by_label: BTreeMap<AnomalyLabel, usize> = AnomalyLabel::ALL
            .iter()
            .filter(|l| l.is_anomaly())
            .map(|l| (*l, 0))
            .collect();
        for trade in trades {
            *trades_by_label.entry(trade.label).or_insert(0) += 1;
        }

        let mut anomalies_detected: BTreeMap<AnomalyLabel, usize> =
            trades_by_label.keys().map(|l| (*l, 0)).collect();
        anomalies_detected.extend(anomaly_counts(bars));

        BacktestMetrics {
            total_return,
            cagr: annualized(final_equity, curve.len(), ppy),
            annual_volatility: std_dev * ppy.sqrt(),
            sharpe_ratio,
            max_drawdown,
            final_equity,
            final_capital: self.config.initial_equity * final_equity,
            trade_count: trades.len(),
            trades_by_label,
            anomalies_detected,
            buy_and_hold: buy_and_hold(bars, ppy),
        }
    }
}

fn close_trade(pos: &OpenPosition, exit_index: usize, bars: &[ClassifiedBar], exit_price: f64, forced: bool) -> Trade {
    Trade {
        entry_index: pos.entry_index,
        exit_index,
        entry_time: bars[pos.entry_index].timestamp,
        exit_time: bars[exit_index].timestamp,
        direction: pos.direction,
        label: pos.label,
        entry_price: pos.entry_price,
        exit_price,
        bars_held: pos.bars_held,
        gross_return: pos.direction.sign() * (exit_price / pos.entry_price - 1.0),
        forced_close: forced,
    }
}

/// Compound growth per year given a growth multiple over `periods` bars
fn annualized(multiple: f64, periods: usize, periods_per_year: f64) -> f64 {
    if periods == 0 {
        return 0.0;
    }
    if multiple <= 0.0 {
        return -1.0;
    }
    multiple.powf(periods_per_year / periods as f64) - 1.0
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn buy_and_hold(bars: &[ClassifiedBar], ppy: f64) -> BuyAndHold {
    let valid = |b: &&ClassifiedBar| b.close.is_finite() && b.close > 0.0;
    match (bars.iter().find(valid), bars.iter().rev().find(valid)) {
        (Some(first), Some(last)) => {
            let multiple = last.close / first.close;
            BuyAndHold {
                total_return: multiple - 1.0,
                cagr: annualized(multiple, bars.len(), ppy),
            }
        }
        _ => BuyAndHold {
            total_return: 0.0,
            cagr: 0.0,
        },
    }
}

/// Analyze and backtest one series with a full config
pub fn run_backtest(series: &BarSeries, config: &VpaConfig) -> Result<(Vec<ClassifiedBar>, BacktestResult)> {
    config.validate()?;
    let pipeline = VpaPipeline::new(config.lookback_window, config.classifier)?;
    let backtester = Backtester::new(config.backtest)?;

    let classified = pipeline.analyze(series);
    let result = backtester.run(&series.symbol, &classified);
    Ok((classified, result))
}

/// Print results in a formatted block
pub fn print_results(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("═══════════════════════════════════════════════════════════");
    println!("   VPA BACKTEST: {} ({})", result.symbol, result.mode);
    println!("═══════════════════════════════════════════════════════════");
    println!(
        "Config: hold={} bars, cost={:.4}, periods/yr={}",
        result.config.hold_bars, result.config.cost_per_trade, result.config.periods_per_year
    );
    println!();
    println!("  Total Return:      {:.2}%", m.total_return * 100.0);
    println!("  CAGR:              {:.2}%", m.cagr * 100.0);
    println!("  Ann. Volatility:   {:.2}%", m.annual_volatility * 100.0);
    println!("  Sharpe Ratio:      {:.2}", m.sharpe_ratio);
    println!("  Max Drawdown:      {:.2}%", m.max_drawdown * 100.0);
    println!("  Final Capital:     ${:.2}", m.final_capital);
    println!("  Total Trades:      {}", m.trade_count);
    println!("  ---");
    println!("  Trades / Anomalies Detected:");
    for (label, detected) in &m.anomalies_detected {
        let traded = m.trades_by_label.get(label).copied().unwrap_or(0);
        println!("    {:<12} {:>5} trades  {:>5} detected", label.as_str(), traded, detected);
    }
    println!("  ---");
    println!(
        "  Buy & Hold:        Total={:.2}%  CAGR={:.2}%",
        m.buy_and_hold.total_return * 100.0,
        m.buy_and_hold.cagr * 100.0
    );
    println!("═══════════════════════════════════════════════════════════");
}

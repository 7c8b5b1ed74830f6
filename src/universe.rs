//! Symbol universe and multi-symbol backtests
//!
//! Fetches every symbol with bounded concurrency, then backtests the
//! loaded series in parallel with Rayon.

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use chrono::NaiveDate;

use crate::backtest::run_backtest;
use crate::bar::BarSeries;
use crate::config::{TradeMode, VpaConfig};
use crate::sources::BarSource;

/// Default scanner watchlist
pub const DEFAULT_WATCHLIST: [&str; 15] = [
    "SPY", "QQQ", "IWM", "EFA", "EEM", "IEF", "TLT", "GLD", "AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META", "GOOGL",
];

/// ETF universe grouped by asset class
pub const ETF_UNIVERSE: &[(&str, &[&str])] = &[
    ("Broad Market", &["SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "IVV", "MDY", "IJR"]),
    ("Sector", &["XLK", "XLF", "XLE", "XLV", "XLI", "XLC", "XLP", "XLU", "XLB", "XLRE"]),
    ("International", &["EFA", "EEM", "VEA", "VWO", "EWJ", "FXI", "IEMG", "ACWI"]),
    ("Bonds", &["TLT", "IEF", "SHY", "AGG", "BND", "HYG", "LQD", "TIP", "MUB"]),
    ("Commodities", &["GLD", "SLV", "GDX", "USO", "UNG", "DBC", "PDBC", "IAU", "CPER"]),
    ("Real Estate", &["VNQ", "IYR", "SCHH", "REM"]),
    ("Volatility", &["VIXY", "UVXY"]),
    ("Thematic", &["ARK", "ARKK", "ARKG", "ARKW", "ICLN", "LIT", "HACK", "BOTZ"]),
];

/// Bars beyond the window a symbol needs before it is backtested
pub const MIN_EXTRA_BARS: usize = 10;

pub fn default_watchlist() -> Vec<String> {
    DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect()
}

pub fn all_etfs() -> Vec<String> {
    ETF_UNIVERSE
        .iter()
        .flat_map(|(_, symbols)| symbols.iter().map(|s| s.to_string()))
        .collect()
}

/// One (symbol, mode) line of the universe summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseRow {
    pub symbol: String,
    pub mode: TradeMode,
    pub trades: usize,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub bh_return: f64,
    pub bh_cagr: f64,
}

/// Fetch all symbols, at most `concurrency` requests in flight.
/// Failed symbols are logged and left out.
pub async fn fetch_all(
    source: Arc<dyn BarSource>,
    symbols: &[String],
    start: NaiveDate,
    concurrency: usize,
) -> Vec<BarSeries> {
    let mut loaded: Vec<BarSeries> = stream::iter(symbols.iter().cloned())
        .map(|symbol| {
            let source = Arc::clone(&source);
            async move {
                let result = source.fetch_series(&symbol, start).await;
                (symbol, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(symbol, result)| async move {
            match result {
                Ok(series) => Some(series),
                Err(e) => {
                    warn!("{}: ERROR - {}", symbol, e);
                    None
                }
            }
        })
        .collect()
        .await;

    loaded.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    info!("Loaded {} of {} symbols", loaded.len(), symbols.len());
    loaded
}

/// Backtest every series under every mode in parallel
pub fn backtest_all(series: &[BarSeries], config: &VpaConfig, modes: &[TradeMode]) -> Vec<UniverseRow> {
    let min_bars = config.lookback_window + MIN_EXTRA_BARS;

    let mut rows: Vec<UniverseRow> = series
        .par_iter()
        .filter(|s| {
            if s.len() < min_bars {
                warn!("{}: {} bars, need {}, skipped", s.symbol, s.len(), min_bars);
                false
            } else {
                true
            }
        })
        .flat_map_iter(|s| {
            modes.iter().filter_map(move |&mode| {
                let mut run_config = config.clone();
                run_config.symbol = s.symbol.clone();
                run_config.backtest.mode = mode;
                match run_backtest(s, &run_config) {
                    Ok((_, result)) => {
                        let m = &result.metrics;
                        Some(UniverseRow {
                            symbol: s.symbol.clone(),
                            mode,
                            trades: m.trade_count,
                            total_return: m.total_return,
                            cagr: m.cagr,
                            sharpe: m.sharpe_ratio,
                            max_drawdown: m.max_drawdown,
                            bh_return: m.buy_and_hold.total_return,
                            bh_cagr: m.buy_and_hold.cagr,
                        })
                    }
                    Err(e) => {
                        warn!("{} [{}]: ERROR - {}", s.symbol, mode, e);
                        None
                    }
                }
            })
        })
        .collect();

    rows.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.mode.to_string().cmp(&b.mode.to_string())));
    rows
}

/// Print one mode's rows sorted by CAGR, best first
pub fn print_universe_table(rows: &[UniverseRow], mode: TradeMode) {
    let mut selected: Vec<_> = rows.iter().filter(|r| r.mode == mode).collect();
    selected.sort_by(|a, b| b.cagr.total_cmp(&a.cagr));

    println!();
    println!("{}", "=".repeat(90));
    println!("  BACKTEST SUMMARY (Daily | {}) - Sorted by CAGR", mode);
    println!("{}", "=".repeat(90));
    println!(
        "  {:<8} {:>6} {:>10} {:>8} {:>7} {:>8} {:>10} {:>8}",
        "Symbol", "Trades", "TotalRet%", "CAGR%", "Sharpe", "MaxDD%", "BH_Ret%", "BH_CAGR%"
    );
    for r in selected {
        println!(
            "  {:<8} {:>6} {:>10.2} {:>8.2} {:>7.2} {:>8.2} {:>10.2} {:>8.2}",
            r.symbol,
            r.trades,
            r.total_return * 100.0,
            r.cagr * 100.0,
            r.sharpe,
            r.max_drawdown * 100.0,
            r.bh_return * 100.0,
            r.bh_cagr * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_util::bars_from;
    use crate::sources::MemoryBarSource;

    fn wavy_bars(n: usize) -> Vec<crate::bar::Bar> {
        let rows: Vec<_> = (0..n)
            .map(|i| {
                let x = i as f64;
                let open = 100.0 + (x * 0.3).sin() * 3.0;
                let close = open + (x * 1.7).cos();
                (open, close, 1.0 + (x * 0.9).sin().abs() * 2.0, 1000.0 + (x * 2.3).cos() * 400.0)
            })
            .collect();
        bars_from(&rows)
    }

    #[test]
    fn test_universe_lists() {
        let etfs = all_etfs();
        assert!(etfs.contains(&"XLRE".to_string()));
        assert!(etfs.contains(&"ARK".to_string()));
        assert_eq!(etfs.len(), ETF_UNIVERSE.iter().map(|(_, s)| s.len()).sum::<usize>());
        assert_eq!(default_watchlist().len(), 15);
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failures() {
        let source = MemoryBarSource::new()
            .with_symbol("SPY", wavy_bars(40))
            .with_symbol("QQQ", wavy_bars(40));
        let symbols: Vec<String> = ["SPY", "QQQ", "NOPE"].iter().map(|s| s.to_string()).collect();
        let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();

        let loaded = fetch_all(Arc::new(source), &symbols, start, 2).await;
        let names: Vec<_> = loaded.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(names, vec!["QQQ", "SPY"]);
    }

    #[test]
    fn test_backtest_all_modes_and_min_history() {
        let series = vec![
            BarSeries::new("LONG", wavy_bars(80)).unwrap(),
            BarSeries::new("SHORT", wavy_bars(25)).unwrap(),
        ];
        let rows = backtest_all(&series, &VpaConfig::default(), &[TradeMode::LongOnly, TradeMode::LongShort]);

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.symbol == "LONG"));
        assert!(rows.iter().any(|r| r.mode == TradeMode::LongOnly));
        assert!(rows.iter().any(|r| r.mode == TradeMode::LongShort));
    }
}

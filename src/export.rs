//! Flat-file exports
//!
//! CSV writers are generic over `io::Write`; the equity curve and signal
//! log have matching readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backtest::{BacktestResult, EquityPoint, Trade};
use crate::error::Result;
use crate::universe::UniverseRow;
use crate::vpa::{AnomalyLabel, ClassifiedBar, Signal};

/// One row of the signal log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub label: AnomalyLabel,
    pub signal: Signal,
}

impl From<&ClassifiedBar> for SignalRecord {
    fn from(bar: &ClassifiedBar) -> Self {
        Self {
            timestamp: bar.timestamp,
            label: bar.label,
            signal: bar.signal,
        }
    }
}

fn write_rows<W: Write, T: Serialize>(writer: W, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn read_rows<R: Read, T: for<'de> Deserialize<'de>>(reader: R) -> Result<Vec<T>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for row in csv_reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_equity_curve<W: Write>(writer: W, curve: &[EquityPoint]) -> Result<()> {
    write_rows(writer, curve)
}

pub fn read_equity_curve<R: Read>(reader: R) -> Result<Vec<EquityPoint>> {
    read_rows(reader)
}

pub fn write_signal_log<W: Write>(writer: W, bars: &[ClassifiedBar]) -> Result<()> {
    write_rows(writer, bars.iter().map(SignalRecord::from))
}

pub fn read_signal_log<R: Read>(reader: R) -> Result<Vec<SignalRecord>> {
    read_rows(reader)
}

pub fn write_trades<W: Write>(writer: W, trades: &[Trade]) -> Result<()> {
    write_rows(writer, trades)
}

pub fn write_universe<W: Write>(writer: W, rows: &[UniverseRow]) -> Result<()> {
    write_rows(writer, rows)
}

/// Metrics as a two-column `key,value` table
pub fn write_summary<W: Write>(writer: W, result: &BacktestResult) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["key", "value"])?;
    for (key, value) in result.metrics.to_record() {
        csv_writer.write_record([key, value.to_string()])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write all backtest artifacts for one run into `dir`
pub fn export_backtest(dir: &Path, bars: &[ClassifiedBar], result: &BacktestResult) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let stem = format!("{}_{}", result.symbol.to_lowercase(), result.mode);

    let equity_path = dir.join(format!("{}_equity.csv", stem));
    write_equity_curve(std::fs::File::create(&equity_path)?, &result.equity_curve)?;

    let signals_path = dir.join(format!("{}_signals.csv", stem));
    write_signal_log(std::fs::File::create(&signals_path)?, bars)?;

    let trades_path = dir.join(format!("{}_trades.csv", stem));
    write_trades(std::fs::File::create(&trades_path)?, &result.trades)?;

    let summary_path = dir.join(format!("{}_summary.csv", stem));
    write_summary(std::fs::File::create(&summary_path)?, result)?;

    let json_path = dir.join(format!("{}_results.json", stem));
    std::fs::write(&json_path, serde_json::to_string_pretty(result)?)?;

    let paths = vec![equity_path, signals_path, trades_path, summary_path, json_path];
    info!("Wrote {} files to {:?}", paths.len(), dir);
    Ok(paths)
}

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use vpa_scanner::backtest::{print_results, run_backtest};
use vpa_scanner::config::{Boundary, ClassifierConfig, Thresholds, TradeMode, VpaConfig};
use vpa_scanner::export;
use vpa_scanner::scanner::{print_scan_report, LiveScanner, ScanConfig};
use vpa_scanner::sources::{BarSource, CsvBarSource, YahooBarSource};
use vpa_scanner::universe::{self, print_universe_table};

#[derive(Parser, Debug)]
#[command(name = "vpa")]
#[command(about = "Volume Price Analysis anomaly backtester & scanner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Where bars come from
    #[arg(long, global = true, value_enum, env = "VPA_SOURCE", default_value = "yahoo")]
    source: SourceKind,

    /// Directory of <SYMBOL>.csv files (csv source)
    #[arg(long, global = true, env = "VPA_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// HTTP timeout per request in seconds (yahoo source)
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    Yahoo,
    Csv,
}

/// Model parameters shared by every command
#[derive(Args, Debug)]
struct ModelArgs {
    /// JSON file with a full configuration (symbol and start date still come from the command line)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rolling window size in bars
    #[arg(long, env = "VPA_LOOKBACK_WINDOW", default_value = "20")]
    lookback: usize,

    /// LOW percentile-rank threshold
    #[arg(long, env = "VPA_LOW", default_value = "0.3")]
    low: f64,

    /// HIGH percentile-rank threshold
    #[arg(long, env = "VPA_HIGH", default_value = "0.7")]
    high: f64,

    /// Override LOW for spread only
    #[arg(long)]
    spread_low: Option<f64>,

    /// Override HIGH for spread only
    #[arg(long)]
    spread_high: Option<f64>,

    /// Override LOW for volume only
    #[arg(long)]
    volume_low: Option<f64>,

    /// Override HIGH for volume only
    #[arg(long)]
    volume_high: Option<f64>,

    /// Treat percentiles exactly on a threshold as mid-band
    #[arg(long)]
    exclusive_bounds: bool,

    /// Bars to hold each position
    #[arg(long, env = "VPA_HOLD_BARS", default_value = "5")]
    hold_bars: usize,

    /// Cost per entry/exit as a fraction of equity
    #[arg(long, env = "VPA_COST_PER_TRADE", default_value = "0.001")]
    cost: f64,

    /// Bars per year for annualization
    #[arg(long, default_value = "252")]
    periods_per_year: f64,

    /// Starting capital for reporting
    #[arg(long, env = "VPA_INITIAL_EQUITY", default_value = "10000")]
    initial_equity: f64,
}

impl ModelArgs {
    fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            spread: Thresholds {
                low: self.spread_low.unwrap_or(self.low),
                high: self.spread_high.unwrap_or(self.high),
            },
            volume: Thresholds {
                low: self.volume_low.unwrap_or(self.low),
                high: self.volume_high.unwrap_or(self.high),
            },
            boundary: if self.exclusive_bounds {
                Boundary::Exclusive
            } else {
                Boundary::Inclusive
            },
        }
    }

    /// Model config from `--config` when given, otherwise from the flags
    fn resolve(&self) -> Result<VpaConfig> {
        if let Some(path) = &self.config {
            return VpaConfig::from_json_file(path).with_context(|| format!("Failed to load config from {:?}", path));
        }
        let mut config = VpaConfig {
            lookback_window: self.lookback,
            classifier: self.classifier(),
            ..VpaConfig::default()
        };
        config.backtest.hold_bars = self.hold_bars;
        config.backtest.cost_per_trade = self.cost;
        config.backtest.periods_per_year = self.periods_per_year;
        config.backtest.initial_equity = self.initial_equity;
        Ok(config)
    }

    fn scan_config(&self, buffer: usize, history_days: i64) -> Result<ScanConfig> {
        let config = self.resolve()?;
        let scan_config = ScanConfig {
            lookback_window: config.lookback_window,
            buffer,
            history_days,
            classifier: config.classifier,
        };
        scan_config.validate()?;
        Ok(scan_config)
    }

    fn to_config(&self, symbol: &str, start_date: NaiveDate) -> Result<VpaConfig> {
        let mut config = self.resolve()?;
        config.symbol = symbol.to_uppercase();
        config.start_date = start_date;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backtest the VPA rule on one symbol
    Backtest {
        #[arg(short, long, env = "VPA_SYMBOL", default_value = "SPY")]
        symbol: String,

        /// First date to load (YYYY-MM-DD)
        #[arg(long, env = "VPA_START_DATE", default_value = "2010-01-01")]
        start_date: NaiveDate,

        /// Trade modes to run (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "long_only,long_short")]
        modes: Vec<TradeMode>,

        /// Output directory for exports
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Skip writing export files
        #[arg(long)]
        no_export: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Classify the latest bar of each watchlist symbol
    Scan {
        /// Symbols to scan (comma-separated); defaults to the built-in watchlist
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Scan the full ETF universe instead
        #[arg(long)]
        universe: bool,

        /// Extra bars required beyond the window
        #[arg(long, default_value = "2")]
        buffer: usize,

        /// Calendar days of history to request
        #[arg(long, default_value = "120")]
        history_days: i64,

        /// Write the scan report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Backtest every ETF in the built-in universe
    Universe {
        #[arg(long, default_value = "2017-01-01")]
        start_date: NaiveDate,

        /// Maximum concurrent fetches
        #[arg(long, default_value = "8")]
        concurrency: usize,

        /// Summary CSV path
        #[arg(short, long, default_value = "vpa_etf_backtest.csv")]
        output: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vpa_scanner={},vpa={}", default_level, default_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn make_source(cli: &Cli) -> Result<Arc<dyn BarSource>> {
    let source: Arc<dyn BarSource> = match cli.source {
        SourceKind::Yahoo => Arc::new(
            YahooBarSource::new(Duration::from_secs(cli.timeout_secs)).context("Failed to build HTTP client")?,
        ),
        SourceKind::Csv => Arc::new(CsvBarSource::new(&cli.data_dir)),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Backtest {
            symbol,
            start_date,
            modes,
            output_dir,
            no_export,
            model,
        } => {
            let config = model.to_config(symbol, *start_date)?;
            let source = make_source(&cli)?;
            run_backtest_cmd(source, config, modes, output_dir, *no_export).await?;
        }
        Commands::Scan {
            symbols,
            universe,
            buffer,
            history_days,
            json,
            model,
        } => {
            let scan_config = model.scan_config(*buffer, *history_days)?;
            let symbols = if *universe {
                universe::all_etfs()
            } else if symbols.is_empty() {
                universe::default_watchlist()
            } else {
                symbols.iter().map(|s| s.trim().to_uppercase()).collect()
            };
            let source = make_source(&cli)?;
            run_scan(source, scan_config, &symbols, json.as_deref()).await?;
        }
        Commands::Universe {
            start_date,
            concurrency,
            output,
            model,
        } => {
            let config = model.to_config("SPY", *start_date)?;
            let source = make_source(&cli)?;
            run_universe(source, config, *concurrency, output).await?;
        }
    }

    Ok(())
}

async fn run_backtest_cmd(
    source: Arc<dyn BarSource>,
    config: VpaConfig,
    modes: &[TradeMode],
    output_dir: &Path,
    no_export: bool,
) -> Result<()> {
    info!("=== BACKTEST MODE ===");
    info!("Symbol: {}, start: {}", config.symbol, config.start_date);

    let series = source
        .fetch_series(&config.symbol, config.start_date)
        .await
        .with_context(|| format!("Failed to load bars for {}", config.symbol))?;
    info!(
        "Data: {} to {}, {} bars",
        series.first().timestamp.date_naive(),
        series.last().timestamp.date_naive(),
        series.len()
    );

    for &mode in modes {
        let mut run_config = config.clone();
        run_config.backtest.mode = mode;
        let (classified, result) = run_backtest(&series, &run_config)?;
        print_results(&result);

        if !no_export {
            export::export_backtest(output_dir, &classified, &result)?;
        }
    }

    info!("Backtest complete!");
    Ok(())
}

async fn run_scan(
    source: Arc<dyn BarSource>,
    config: ScanConfig,
    symbols: &[String],
    json: Option<&Path>,
) -> Result<()> {
    info!("=== SCAN MODE ===");
    let scanner = LiveScanner::new(source, config)?;
    let report = scanner.scan(symbols, Utc::now().date_naive()).await;
    print_scan_report(&report);

    if let Some(path) = json {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Wrote scan report to {:?}", path);
    }
    Ok(())
}

async fn run_universe(
    source: Arc<dyn BarSource>,
    config: VpaConfig,
    concurrency: usize,
    output: &Path,
) -> Result<()> {
    info!("=== UNIVERSE BACKTEST ===");
    let symbols = universe::all_etfs();
    info!("Running daily backtest on {} ETFs from {}...", symbols.len(), config.start_date);

    let series = universe::fetch_all(source, &symbols, config.start_date, concurrency).await;
    if series.is_empty() {
        anyhow::bail!("No symbols could be loaded");
    }

    let start = std::time::Instant::now();
    let rows = tokio::task::spawn_blocking(move || {
        universe::backtest_all(&series, &config, &[TradeMode::LongOnly, TradeMode::LongShort])
    })
    .await
    .context("Backtest workers failed")?;
    info!("Backtested {} runs in {:.2}s", rows.len(), start.elapsed().as_secs_f64());

    print_universe_table(&rows, TradeMode::LongOnly);
    print_universe_table(&rows, TradeMode::LongShort);

    export::write_universe(std::fs::File::create(output)?, &rows)?;
    info!("Saved results to {:?}", output);
    Ok(())
}

pub mod adapters;
pub mod backtest;
pub mod config;
pub mod daemon;
pub mod decision;
pub mod error;
pub mod features;
pub mod ohlc;
pub mod pipeline;
pub mod position;
pub mod service;
pub mod substrategies;
pub mod types;
pub mod weights;

use std::path::PathBuf;

use clap::Parser;

use crate::types::AccountState;

/// CoinGecko OHLC CSV exporter, kept as the historical-candle data source
/// feeding `backtest`.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about = "CoinGecko OHLC CSV exporter (top-N by mcap) with resume + simple scheduler")]
pub struct OhlcArgs {
    /// Output directory for CSVs
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Your CoinGecko Pro API key (or set CG_PRO_API_KEY env)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Number of top coins by market cap to export (excludes BTC baseline which is always added unless --skip-btc)
    #[arg(long)]
    pub top_n: Option<usize>,

    /// VS currency (e.g., usd, eur, krw)
    #[arg(long)]
    pub vs: Option<String>,

    /// Start date (inclusive), format YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,

    /// End date (inclusive), format YYYY-MM-DD
    #[arg(long)]
    pub end: Option<String>,

    /// Concurrency for OHLC fetches (be mindful of plan limits)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Delay (ms) between requests to avoid bursts
    #[arg(long)]
    pub request_delay_ms: Option<u64>,

    /// If true, also write a combined manifest.json with coin metadata
    #[arg(long)]
    pub write_manifest: Option<bool>,

    /// Resume mode: append only missing days per-asset (auto-detect last CSV date)
    #[arg(long)]
    pub resume: Option<bool>,

    /// Daily schedule: run every day at this local time (HH:MM). Example: --daily-at 05:10
    /// If not set, program runs once and exits (suitable for cron/systemd).
    #[arg(long)]
    pub daily_at: Option<String>,

    /// Optional lock file path to prevent concurrent runs
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Skip pulling BTC baseline (useful if you run it separately)
    #[arg(long)]
    pub skip_btc: Option<bool>,
}

/// Shared account/sizing knobs accepted by every live-decision subcommand.
#[derive(Parser, Debug, Clone)]
pub struct AccountArgs {
    /// Account equity in quote currency
    #[arg(long, default_value = "10000")]
    pub balance: f64,

    /// Number of already-open positions across the book
    #[arg(long, default_value = "0")]
    pub open_positions: u32,

    /// Leverage multiple applied by the exchange
    #[arg(long, default_value = "10")]
    pub leverage: u32,

    /// Fraction of equity risked per trade (0.0..1.0)
    #[arg(long, default_value = "0.015")]
    pub risk_percent: f64,

    /// Optional path to a TOML config overriding pipeline defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl AccountArgs {
    pub fn account_state(&self) -> AccountState {
        AccountState {
            balance: self.balance,
            open_positions: self.open_positions,
            leverage: self.leverage,
            risk_percent: self.risk_percent,
        }
    }
}

/// Runs one pipeline pass for a symbol and prints the decision as JSON.
#[derive(Parser, Debug, Clone)]
pub struct SingleArgs {
    /// Trading symbol, e.g. BTCUSDT
    #[arg(long)]
    pub symbol: String,

    #[command(flatten)]
    pub account: AccountArgs,
}

/// Repeats the pipeline for one symbol on an interval (§6).
#[derive(Parser, Debug, Clone)]
pub struct MonitorArgs {
    /// Trading symbol, e.g. BTCUSDT
    #[arg(long)]
    pub symbol: String,

    /// Minutes between pipeline runs (§6 default: 5)
    #[arg(long, default_value = "5")]
    pub check_interval: u64,

    /// Append-only decision log path
    #[arg(long, default_value = "./out/decisions.jsonl")]
    pub log: PathBuf,

    #[command(flatten)]
    pub account: AccountArgs,
}

/// Serves the HTTP decision API (§6).
#[derive(Parser, Debug, Clone)]
pub struct ApiArgs {
    /// Port to listen on (§6 default 5000)
    #[arg(long, default_value = "5000")]
    pub port: u16,

    /// Symbol GET /api/decision and GET /api/summary report on absent an
    /// intervening POST /api/analyze for a different symbol
    #[arg(long, default_value = "BTCUSDT")]
    pub default_symbol: String,

    #[command(flatten)]
    pub account: AccountArgs,
}

/// Runs the backtester over a historical candle CSV (§7).
#[derive(Parser, Debug, Clone)]
pub struct BacktestArgs {
    /// Path to a CSV of historical candles (date,open,high,low,close[,volume])
    #[arg(long)]
    pub candles: PathBuf,

    /// Starting account balance in quote currency
    #[arg(long, default_value = "10000")]
    pub balance: f64,

    /// Leverage multiple applied by the exchange
    #[arg(long, default_value = "10")]
    pub leverage: u32,

    /// Fraction of equity risked per trade (0.0..1.0)
    #[arg(long, default_value = "0.015")]
    pub risk: f64,

    /// Stop-loss fraction; if absent, the planner's volatility-banded default applies
    #[arg(long)]
    pub stop_loss: Option<f64>,

    /// Candles a position may stay open before a forced timeout close
    #[arg(long, default_value = "48")]
    pub max_hold_bars: usize,

    /// Candle lookback window used to rebuild features/votes at each step
    #[arg(long, default_value = "20")]
    pub lookback: usize,

    /// Replay only the most recent N days of the candle file (1..30); omit to use the whole file
    #[arg(long)]
    pub days: Option<u32>,

    /// Replay stored historical adapter snapshots through the full decision
    /// engine instead of the candles-only sub-strategy vote (not yet
    /// supported: no historical adapter dataset ships with this crate)
    #[arg(long, default_value = "false")]
    pub full_system: bool,

    /// Optional JSON output path for the full report
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Optional output directory for the persisted artefacts of §6:
    /// `trades.csv` (one row per Trade) and `stats.txt` (summary).
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

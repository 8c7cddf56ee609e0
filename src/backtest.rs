//! Historical candle replay and trade statistics (§4.7).

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{PipelineError, Result};
use crate::position::TakeProfitTier;
use crate::substrategies::{run_all, Direction};
use crate::types::{candles_are_monotonic, Candle, Side};

/// Configuration for a single backtest run (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestConfig {
    pub initial_balance: f64,
    pub risk_percent: f64,
    pub leverage: u32,
    pub stop_loss_pct: f64,
    pub lookback: usize,
    /// Candles a position may stay open before it is force-closed at the
    /// current close price (§4.7 "timeout ... closing").
    pub max_hold_candles: usize,
    /// Minimum net signal vote across sub-strategies required to open a
    /// position; below this the backtester stays flat.
    pub min_votes: i32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            risk_percent: 0.015,
            leverage: 10,
            stop_loss_pct: 0.02,
            lookback: 20,
            max_hold_candles: 48,
            min_votes: 2,
        }
    }
}

/// Matches §3's `exit_reason ∈ {SL, TP1, TP2, TP3, TIMEOUT, END}`, keeping
/// the three take-profit tiers distinct so the §4.7 "lower-numbered TP
/// fires first" tie-break is visible in the reported trades, not collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    Tp2,
    #[serde(rename = "TP3")]
    Tp3,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "END")]
    EndOfSeries,
}

/// One closed (or partially closed) fill, matching §3's `Trade` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub open_ts: i64,
    pub close_ts: i64,
    pub side: Side,
    pub entry: f64,
    pub exit: f64,
    pub exit_reason: ExitReason,
    pub size: f64,
    pub pnl_quote: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub final_balance: f64,
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
}

fn take_profit_ladder(side: Side, entry: f64, stop_distance: f64) -> [TakeProfitTier; 3] {
    let sign = match side {
        Side::Long => 1.0,
        Side::Short => -1.0,
    };
    [
        TakeProfitTier {
            price: entry + sign * stop_distance * 1.5,
            close_fraction: 0.5,
        },
        TakeProfitTier {
            price: entry + sign * stop_distance * 2.5,
            close_fraction: 0.3,
        },
        TakeProfitTier {
            price: entry + sign * stop_distance * 4.0,
            close_fraction: 0.2,
        },
    ]
}

fn net_vote(candles: &[Candle]) -> i32 {
    run_all(candles)
        .into_iter()
        .map(|s| match s.direction {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        })
        .sum()
}

struct OpenPosition {
    side: Side,
    open_ts: i64,
    entry_price: f64,
    stop_loss: f64,
    take_profits: [TakeProfitTier; 3],
    remaining_fraction: f64,
    size: f64,
    entry_index: usize,
}

fn record_fill(
    trades: &mut Vec<Trade>,
    pos: &OpenPosition,
    close_ts: i64,
    exit_price: f64,
    closed_size: f64,
    exit_reason: ExitReason,
) -> f64 {
    let pnl_quote = match pos.side {
        Side::Long => (exit_price - pos.entry_price) * closed_size,
        Side::Short => (pos.entry_price - exit_price) * closed_size,
    };
    let notional = pos.entry_price * closed_size;
    let pnl_pct = if notional != 0.0 { pnl_quote / notional * 100.0 } else { 0.0 };
    trades.push(Trade {
        open_ts: pos.open_ts,
        close_ts,
        side: pos.side,
        entry: pos.entry_price,
        exit: exit_price,
        exit_reason,
        size: closed_size,
        pnl_quote,
        pnl_pct,
    });
    pnl_quote
}

/// Replays `candles` against the sub-strategy vote and produces a full
/// [`BacktestReport`] (§4.7). Rejects non-monotonic input as
/// [`PipelineError::InvalidInput`] rather than silently reordering it.
pub fn run(candles: &[Candle], config: &BacktestConfig) -> Result<BacktestReport> {
    if !candles_are_monotonic(candles) {
        return Err(PipelineError::InvalidInput(
            "candle history is not strictly increasing in timestamp".into(),
        ));
    }
    if candles.len() <= config.lookback {
        return Err(PipelineError::InvalidInput(format!(
            "need more than {} candles, got {}",
            config.lookback,
            candles.len()
        )));
    }

    let mut balance = config.initial_balance;
    let mut trades: Vec<Trade> = Vec::new();
    let mut open: Option<OpenPosition> = None;
    let mut equity_curve: Vec<f64> = vec![balance];

    for i in config.lookback..candles.len() {
        let candle = candles[i];
        let window = &candles[i + 1 - config.lookback..=i];

        if let Some(pos) = open.as_mut() {
            let stop_hit = match pos.side {
                Side::Long => candle.low <= pos.stop_loss,
                Side::Short => candle.high >= pos.stop_loss,
            };

            // Stop-loss is checked, and wins ties, before take-profit within
            // the same candle (§4.7 tie-break rule): a candle whose range
            // spans both the stop and a TP level is assumed to have hit the
            // stop first.
            if stop_hit {
                let closed_size = pos.size * pos.remaining_fraction;
                let pnl = record_fill(&mut trades, pos, candle.open_ts, pos.stop_loss, closed_size, ExitReason::StopLoss);
                balance += pnl;
                open = None;
                equity_curve.push(balance);
                continue;
            }

            // Take-profit tiers: lower tiers resolve before higher ones
            // within the same candle, each filling its declared fraction of
            // the original size while the stop stays at its original level
            // for whatever remains (§4.7 "partial fills retain the original
            // stop").
            let tiers = [
                (pos.take_profits[0], ExitReason::Tp1),
                (pos.take_profits[1], ExitReason::Tp2),
                (pos.take_profits[2], ExitReason::Tp3),
            ];
            let mut filled_any = false;
            for (tier, reason) in tiers {
                let hit = match pos.side {
                    Side::Long => candle.high >= tier.price,
                    Side::Short => candle.low <= tier.price,
                };
                if hit && pos.remaining_fraction > 0.0 {
                    let fill_fraction = tier.close_fraction.min(pos.remaining_fraction);
                    if fill_fraction <= 0.0 {
                        continue;
                    }
                    let closed_size = pos.size * fill_fraction;
                    let pnl = record_fill(&mut trades, pos, candle.open_ts, tier.price, closed_size, reason);
                    balance += pnl;
                    pos.remaining_fraction -= fill_fraction;
                    filled_any = true;
                }
            }
            if filled_any {
                equity_curve.push(balance);
            }

            let held_for = i - pos.entry_index;
            if pos.remaining_fraction <= 1e-9 {
                open = None;
            } else if held_for >= config.max_hold_candles || i == candles.len() - 1 {
                let closed_size = pos.size * pos.remaining_fraction;
                let exit_reason = if held_for >= config.max_hold_candles {
                    ExitReason::Timeout
                } else {
                    ExitReason::EndOfSeries
                };
                let pnl = record_fill(&mut trades, pos, candle.open_ts, candle.close, closed_size, exit_reason);
                balance += pnl;
                open = None;
                equity_curve.push(balance);
            }
            continue;
        }

        let vote = net_vote(window);
        if vote.abs() < config.min_votes || candle.close <= 0.0 {
            continue;
        }
        // Entry happens at the next bar's open (§4.7: "open one at candle
        // k+1 open"); if this is the last candle there is no next bar to
        // enter on, so the signal is dropped rather than faked.
        let Some(next) = candles.get(i + 1) else {
            continue;
        };
        let side = if vote > 0 { Side::Long } else { Side::Short };
        let entry_price = next.open;
        let stop_distance = entry_price * config.stop_loss_pct;
        let stop_loss = match side {
            Side::Long => entry_price - stop_distance,
            Side::Short => entry_price + stop_distance,
        };
        let risk_amount = balance * config.risk_percent;
        let size = risk_amount / stop_distance;

        open = Some(OpenPosition {
            side,
            open_ts: next.open_ts,
            entry_price,
            stop_loss,
            take_profits: take_profit_ladder(side, entry_price, stop_distance),
            remaining_fraction: 1.0,
            size,
            entry_index: i + 1,
        });
    }

    let final_balance = balance;
    let total_return_pct = (final_balance - config.initial_balance) / config.initial_balance * 100.0;

    let wins = trades.iter().filter(|t| t.pnl_quote > 0.0).count();
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins as f64 / trades.len() as f64
    };

    let gross_profit: f64 = trades.iter().filter(|t| t.pnl_quote > 0.0).map(|t| t.pnl_quote).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl_quote < 0.0).map(|t| t.pnl_quote.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    // Sharpe proxy (§4.7, GLOSSARY): mean(per-trade return) / stddev(...) x
    // sqrt(N), using the teacher's `statrs::statistics::Statistics` for the
    // mean/sample-stddev arithmetic rather than hand-rolled iterator sums.
    let sharpe_ratio = if returns.len() > 1 {
        let mean = returns[..].mean();
        let sd = returns[..].std_dev();
        if sd > 0.0 {
            mean / sd * (returns.len() as f64).sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    let mut peak = equity_curve[0];
    let mut max_drawdown_pct: f64 = 0.0;
    for &e in &equity_curve {
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            let dd = (peak - e) / peak * 100.0;
            if dd > max_drawdown_pct {
                max_drawdown_pct = dd;
            }
        }
    }

    Ok(BacktestReport {
        trades,
        final_balance,
        total_return_pct,
        win_rate,
        profit_factor,
        sharpe_ratio,
        max_drawdown_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05;
                Candle::new(i as i64 * 3600, base, base + 1.0, base - 1.0, base, 100.0)
            })
            .collect()
    }

    #[test]
    fn rejects_non_monotonic_input() {
        let mut candles = synthetic_candles(50);
        candles.swap(0, 1);
        let config = BacktestConfig::default();
        let err = run(&candles, &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn rejects_too_short_history() {
        let candles = synthetic_candles(5);
        let config = BacktestConfig::default();
        assert!(run(&candles, &config).is_err());
    }

    #[test]
    fn smoke_run_over_168_hourly_candles_produces_a_report() {
        let candles = synthetic_candles(168);
        let config = BacktestConfig::default();
        let report = run(&candles, &config).unwrap();
        assert!(report.final_balance.is_finite());
        assert!(report.win_rate >= 0.0 && report.win_rate <= 1.0);
        assert!(report.max_drawdown_pct >= 0.0);
    }

    #[test]
    fn every_trade_has_a_non_negative_size() {
        let candles = synthetic_candles(200);
        let config = BacktestConfig::default();
        let report = run(&candles, &config).unwrap();
        assert!(report.trades.iter().all(|t| t.size >= 0.0));
    }

    #[test]
    fn trades_carry_open_and_close_timestamps_and_pnl_pct() {
        let candles = synthetic_candles(200);
        let config = BacktestConfig::default();
        let report = run(&candles, &config).unwrap();
        for t in &report.trades {
            assert!(t.close_ts >= t.open_ts);
            assert!(t.pnl_pct.is_finite());
        }
    }

    #[test]
    fn entry_price_matches_the_next_bars_open() {
        // A strong, steady uptrend should eventually trigger a LONG vote;
        // its entry price must be some candle's *open*, not a *close*,
        // confirming entries happen on the bar after the signal (§4.7).
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let o = 100.0 + i as f64 * 0.5;
                Candle::new(i * 3600, o, o + 1.5, o - 0.2, o + 1.2, 100.0)
            })
            .collect();
        let config = BacktestConfig::default();
        let report = run(&candles, &config).unwrap();
        assert!(!report.trades.is_empty());
        for t in &report.trades {
            assert!(candles.iter().any(|c| (c.open - t.entry).abs() < 1e-9));
        }
    }
}

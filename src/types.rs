use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar over a fixed interval (§9 design note: a candle is a
/// plain record, not a dataframe row — no dependence on any particular
/// data-frame implementation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open_ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Asserts candles are chronologically ordered with strictly increasing
/// timestamps (§4.7, §8 "Backtester bar ordering" property).
pub fn candles_are_monotonic(candles: &[Candle]) -> bool {
    candles.windows(2).all(|w| w[0].open_ts < w[1].open_ts)
}

/// Side of a decision/plan/trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

/// The trading action an engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Long,
    Short,
    Hold,
}

impl Action {
    pub fn as_side(self) -> Option<Side> {
        match self {
            Action::Long => Some(Side::Long),
            Action::Short => Some(Side::Short),
            Action::Hold => None,
        }
    }
}

/// Caller-supplied account state consulted by the safety gate (§4.4.1
/// check 5) and the position planner (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub open_positions: u32,
    pub leverage: u32,
    pub risk_percent: f64,
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_candles_pass() {
        let candles = vec![
            Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            Candle::new(60, 1.0, 1.0, 1.0, 1.0, 1.0),
            Candle::new(120, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        assert!(candles_are_monotonic(&candles));
    }

    #[test]
    fn non_monotonic_candles_fail() {
        let candles = vec![
            Candle::new(60, 1.0, 1.0, 1.0, 1.0, 1.0),
            Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        assert!(!candles_are_monotonic(&candles));
    }
}

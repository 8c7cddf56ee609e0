//! Rule-based sub-strategies and the advisory AI aggregation layer (§4.6).
//!
//! Each sub-strategy is a small pure function over a candle window that
//! proposes a [`Signal`]; none of them see news/sentiment/AI features, only
//! price action, matching the separation of concerns in §4.6. The rolling
//! moving-average/ATR helpers below are the same windowed-sum technique
//! used for the historical relative-strength analysis this crate grew out
//! of, retargeted from a CSV time series onto an in-memory candle slice.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::features::Prediction;
use crate::types::{Candle, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: &'static str,
    pub direction: Direction,
    pub confidence: f64,
    pub reason: String,
}

fn rolling_ma(closes: &[f64], w: usize) -> Vec<Option<f64>> {
    if w == 0 {
        return vec![None; closes.len()];
    }
    let mut out = vec![None; closes.len()];
    let mut sum = 0.0;
    for i in 0..closes.len() {
        sum += closes[i];
        if i >= w {
            sum -= closes[i - w];
        }
        if i + 1 >= w {
            out[i] = Some(sum / w as f64);
        }
    }
    out
}

fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .abs()
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

fn rolling_atr(candles: &[Candle], w: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    let mut trs: Vec<f64> = Vec::with_capacity(candles.len());
    for i in 0..candles.len() {
        if i == 0 {
            trs.push((candles[i].high - candles[i].low).abs());
        } else {
            trs.push(true_range(candles[i].high, candles[i].low, candles[i - 1].close));
        }
        if i + 1 >= w {
            let start = i + 1 - w;
            out[i] = Some(trs[start..=i].iter().sum::<f64>() / w as f64);
        }
    }
    out
}

fn rolling_std(closes: &[f64], w: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    for i in 0..closes.len() {
        if i + 1 >= w {
            let s = &closes[i + 1 - w..=i];
            out[i] = Some(s.population_std_dev());
        }
    }
    out
}

fn clamp_confidence(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

fn flat(strategy: &'static str, reason: &str) -> Signal {
    Signal {
        strategy,
        direction: Direction::Flat,
        confidence: 0.0,
        reason: reason.to_string(),
    }
}

/// Short/long moving-average crossover (§4.6.1).
pub fn trend_following(candles: &[Candle]) -> Signal {
    if candles.len() < 12 {
        return flat("trend_following", "insufficient candle history");
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let short_w = (closes.len() / 4).max(3);
    let long_w = closes.len();
    let short_ma = rolling_ma(&closes, short_w);
    let long_ma = rolling_ma(&closes, long_w);
    let last = closes.len() - 1;

    match (short_ma[last], long_ma[last]) {
        (Some(s), Some(l)) if l != 0.0 => {
            let spread_pct = (s - l) / l * 100.0;
            let direction = if spread_pct > 0.1 {
                Direction::Long
            } else if spread_pct < -0.1 {
                Direction::Short
            } else {
                Direction::Flat
            };
            Signal {
                strategy: "trend_following",
                direction,
                confidence: clamp_confidence(spread_pct.abs() * 20.0),
                reason: format!("MA spread {:.3}% (short {:.2} vs long {:.2})", spread_pct, s, l),
            }
        }
        _ => flat("trend_following", "moving averages unavailable"),
    }
}

/// Distance-from-mean reversion (§4.6.2): proposes the opposite direction
/// once price strays more than two standard deviations from its rolling
/// mean.
pub fn mean_reversion(candles: &[Candle]) -> Signal {
    if candles.len() < 12 {
        return flat("mean_reversion", "insufficient candle history");
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let window = closes.len();
    let ma = rolling_ma(&closes, window);
    let std = rolling_std(&closes, window);
    let last = closes.len() - 1;

    match (ma[last], std[last]) {
        (Some(m), Some(sd)) if sd > 0.0 => {
            let z = (closes[last] - m) / sd;
            let direction = if z > 2.0 {
                Direction::Short
            } else if z < -2.0 {
                Direction::Long
            } else {
                Direction::Flat
            };
            Signal {
                strategy: "mean_reversion",
                direction,
                confidence: clamp_confidence((z.abs() - 2.0).max(0.0) * 30.0),
                reason: format!("z-score {:.2} vs rolling mean {:.2}", z, m),
            }
        }
        _ => flat("mean_reversion", "insufficient variance to score"),
    }
}

/// Range breakout (§4.6.3): price closing beyond the prior N-1 candle
/// high/low band.
pub fn breakout(candles: &[Candle]) -> Signal {
    if candles.len() < 6 {
        return flat("breakout", "insufficient candle history");
    }
    let last = candles.last().unwrap();
    let prior = &candles[..candles.len() - 1];
    let prior_high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let prior_low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    if last.close > prior_high {
        let breakout_pct = if prior_high != 0.0 {
            (last.close - prior_high) / prior_high * 100.0
        } else {
            0.0
        };
        Signal {
            strategy: "breakout",
            direction: Direction::Long,
            confidence: clamp_confidence(breakout_pct * 40.0 + 40.0),
            reason: format!("close {:.2} broke above range high {:.2}", last.close, prior_high),
        }
    } else if last.close < prior_low {
        let breakout_pct = if prior_low != 0.0 {
            (prior_low - last.close) / prior_low * 100.0
        } else {
            0.0
        };
        Signal {
            strategy: "breakout",
            direction: Direction::Short,
            confidence: clamp_confidence(breakout_pct * 40.0 + 40.0),
            reason: format!("close {:.2} broke below range low {:.2}", last.close, prior_low),
        }
    } else {
        flat("breakout", "price contained within prior range")
    }
}

/// Grid strategy (§4.6.4): favors range-bound action, proposing the side
/// that mean-reverts toward the grid's center once price is a set distance
/// from it, scaled by ATR so the grid spacing adapts to volatility.
pub fn grid(candles: &[Candle]) -> Signal {
    if candles.len() < 8 {
        return flat("grid", "insufficient candle history");
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let center = closes.iter().sum::<f64>() / closes.len() as f64;
    let atr = rolling_atr(candles, candles.len().min(14));
    let last_atr = atr.last().copied().flatten().unwrap_or(0.0);
    let last_close = *closes.last().unwrap();

    if last_atr <= 0.0 {
        return flat("grid", "ATR unavailable");
    }

    let offset_in_atr = (last_close - center) / last_atr;
    let direction = if offset_in_atr > 1.0 {
        Direction::Short
    } else if offset_in_atr < -1.0 {
        Direction::Long
    } else {
        Direction::Flat
    };

    Signal {
        strategy: "grid",
        direction,
        confidence: clamp_confidence((offset_in_atr.abs() - 1.0).max(0.0) * 25.0),
        reason: format!("price is {:.2} ATRs from the grid center {:.2}", offset_in_atr, center),
    }
}

/// Scalping (§4.6.5): very short lookback momentum over the last 3 candles,
/// intended for rapid in/out signals rather than a position held for the
/// full window.
pub fn scalping(candles: &[Candle]) -> Signal {
    if candles.len() < 3 {
        return flat("scalping", "insufficient candle history");
    }
    let n = candles.len();
    let recent = &candles[n - 3..];
    let change_pct = if recent[0].close != 0.0 {
        (recent[2].close - recent[0].close) / recent[0].close * 100.0
    } else {
        0.0
    };
    let direction = if change_pct > 0.05 {
        Direction::Long
    } else if change_pct < -0.05 {
        Direction::Short
    } else {
        Direction::Flat
    };
    Signal {
        strategy: "scalping",
        direction,
        confidence: clamp_confidence(change_pct.abs() * 200.0),
        reason: format!("3-candle change {:.3}%", change_pct),
    }
}

pub fn run_all(candles: &[Candle]) -> Vec<Signal> {
    vec![
        trend_following(candles),
        mean_reversion(candles),
        breakout(candles),
        grid(candles),
        scalping(candles),
    ]
}

/// A single AI predictor's suggestion surfaced up to the caller (§4.6.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSuggestion {
    pub side: Option<Side>,
    pub confidence: f64,
}

/// Majority-vote aggregation of raw predictor outputs into one suggestion
/// (§4.6.6). This is advisory data only: [`AiSuggestion`] never feeds back
/// into [`crate::decision::decide`] unless the caller's configuration has
/// `allow_ai_override` set, in which case the pipeline layer (not this
/// function) is responsible for applying it.
pub fn aggregate_ai_layer(predictions: &[Prediction]) -> AiSuggestion {
    if predictions.is_empty() {
        return AiSuggestion {
            side: None,
            confidence: 0.0,
        };
    }

    let up = predictions.iter().filter(|p| matches!(p, Prediction::Up(_))).count();
    let down = predictions.iter().filter(|p| matches!(p, Prediction::Down(_))).count();
    let avg_confidence = predictions
        .iter()
        .map(|p| match p {
            Prediction::Up(c) | Prediction::Down(c) | Prediction::Flat(c) => *c,
        })
        .sum::<f64>()
        / predictions.len() as f64;

    let side = if up > down {
        Some(Side::Long)
    } else if down > up {
        Some(Side::Short)
    } else {
        None
    };

    AiSuggestion {
        side,
        confidence: clamp_confidence(avg_confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let p = 100.0 + i as f64 * 2.0;
                Candle::new(i as i64 * 60, p, p + 0.5, p - 0.5, p, 10.0)
            })
            .collect()
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n).map(|i| Candle::new(i as i64 * 60, 100.0, 100.2, 99.8, 100.0, 10.0)).collect()
    }

    #[test]
    fn trend_following_goes_long_on_rising_series() {
        let signal = trend_following(&rising_candles(20));
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn trend_following_flat_on_short_history() {
        let signal = trend_following(&rising_candles(3));
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn mean_reversion_flat_on_constant_series() {
        let signal = mean_reversion(&flat_candles(20));
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn breakout_detects_new_high() {
        let mut candles = flat_candles(10);
        candles.push(Candle::new(700, 100.0, 110.0, 100.0, 109.0, 10.0));
        let signal = breakout(&candles);
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn scalping_confidence_is_clamped() {
        let mut candles = flat_candles(3);
        candles[2].close = 1000.0; // absurd spike
        let signal = scalping(&candles);
        assert!(signal.confidence <= 100.0);
    }

    #[test]
    fn aggregate_ai_layer_majority_wins() {
        let preds = vec![Prediction::Up(80.0), Prediction::Up(70.0), Prediction::Down(60.0)];
        let suggestion = aggregate_ai_layer(&preds);
        assert_eq!(suggestion.side, Some(Side::Long));
    }

    #[test]
    fn aggregate_ai_layer_tie_is_no_suggestion() {
        let preds = vec![Prediction::Up(80.0), Prediction::Down(60.0)];
        let suggestion = aggregate_ai_layer(&preds);
        assert_eq!(suggestion.side, None);
    }

    #[test]
    fn aggregate_ai_layer_empty_is_no_suggestion() {
        let suggestion = aggregate_ai_layer(&[]);
        assert_eq!(suggestion.side, None);
        assert_eq!(suggestion.confidence, 0.0);
    }
}

//! AI predictor ensemble adapter (§4.1, §4.6.6): a small panel of
//! independent momentum/oscillator heuristics, each voting `Up`/`Down`/`Flat`
//! with a confidence. This crate treats "AI predictor" as a pluggable
//! abstraction; these are the reference pluggable implementations, not an
//! external model call, and their votes are advisory only (§4.6.6,
//! [`crate::substrategies::aggregate_ai_layer`]).

use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::features::{CandleWindow, Prediction};

pub struct AiPredictorsAdapter;

impl AiPredictorsAdapter {
    pub fn new() -> Self {
        Self
    }

    pub async fn fetch(&self, window: &CandleWindow, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<Vec<Prediction>> {
        super::with_retry(config, "ai_predictors", config.adapter_deadlines.ai_predictors, || async {
            Ok(predict(window))
        })
        .await
    }
}

impl Default for AiPredictorsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn predict(window: &CandleWindow) -> Vec<Prediction> {
    let closes: Vec<f64> = window.candles.iter().map(|c| c.close).collect();
    if closes.len() < 4 {
        return Vec::new();
    }

    vec![
        momentum_predictor(&closes, 3),
        momentum_predictor(&closes, closes.len() / 2),
        rsi_predictor(&closes, 14.min(closes.len() - 1)),
    ]
}

fn momentum_predictor(closes: &[f64], lookback: usize) -> Prediction {
    let lookback = lookback.max(1).min(closes.len() - 1);
    let last = *closes.last().unwrap();
    let past = closes[closes.len() - 1 - lookback];
    let change_pct = if past != 0.0 { (last - past) / past * 100.0 } else { 0.0 };
    let confidence = (change_pct.abs() * 10.0).clamp(0.0, 95.0);

    if change_pct > 0.1 {
        Prediction::Up(confidence)
    } else if change_pct < -0.1 {
        Prediction::Down(confidence)
    } else {
        Prediction::Flat(confidence.max(50.0))
    }
}

fn rsi_predictor(closes: &[f64], period: usize) -> Prediction {
    let period = period.max(2).min(closes.len() - 1);
    let window = &closes[closes.len() - 1 - period..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    };

    if rsi > 70.0 {
        Prediction::Down((rsi - 70.0) * 3.0)
    } else if rsi < 30.0 {
        Prediction::Up((30.0 - rsi) * 3.0)
    } else {
        Prediction::Flat(50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn candles(closes: &[f64]) -> CandleWindow {
        CandleWindow {
            candles: closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Candle::new(i as i64 * 60, c, c + 0.5, c - 0.5, c, 1.0))
                .collect(),
        }
    }

    #[test]
    fn rising_series_predicts_up() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let window = candles(&closes);
        let predictions = predict(&window);
        assert!(predictions.iter().any(|p| matches!(p, Prediction::Up(_))));
    }

    #[test]
    fn short_history_yields_no_predictions() {
        let window = candles(&[100.0, 101.0]);
        assert!(predict(&window).is_empty());
    }
}

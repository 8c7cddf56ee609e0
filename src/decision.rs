//! The safety gate and weighted signal scoring engine (§4.4).

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::features::FeatureVector;
use crate::types::{AccountState, Action};
use crate::weights::{dynamic_multipliers, Category};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyGateResult {
    pub passed: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub news: f64,
    pub price: f64,
    pub sentiment: f64,
    pub ai: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub scores: CategoryScores,
    pub total_score: f64,
    pub consistency: f64,
    pub safety_gate: SafetyGateResult,
}

/// Runs the five safety-gate checks of §4.4.1. All five must pass; failing
/// any one rejects the request down to HOLD regardless of score.
pub fn safety_gate(features: &FeatureVector, account: &AccountState, config: &PipelineConfig) -> SafetyGateResult {
    let gate = &config.safety_gate;
    let mut reasons = Vec::new();

    if features.eth_tradeable() == 0.0 && features.btc_tradeable() == 0.0 {
        reasons.push(format!(
            "cost: network fees too high: eth_gas={:.1} (gate {:.1}), btc_fee={:.1} (gate {:.1})",
            features.eth_gas(),
            gate.eth_gas_gate,
            features.btc_fee(),
            gate.btc_fee_gate
        ));
    }

    if features.news_count() < gate.min_news_count {
        reasons.push(format!(
            "data_completeness: insufficient news coverage: count={:.0} (min {:.0})",
            features.news_count(),
            gate.min_news_count
        ));
    }
    if features.ai_up_count() + features.ai_down_count() <= 0.0 {
        reasons.push("data_completeness: no AI predictors reported a direction".to_string());
    }

    let fg = features.fear_greed_index();
    if fg < gate.fear_greed_low || fg > gate.fear_greed_high {
        reasons.push(format!(
            "market_state: fear/greed index out of range: {:.1} (allowed [{:.1}, {:.1}])",
            fg, gate.fear_greed_low, gate.fear_greed_high
        ));
    }

    if features.volatility() > gate.max_volatility {
        reasons.push(format!(
            "volatility: too high: {:.4} (max {:.4})",
            features.volatility(),
            gate.max_volatility
        ));
    }

    if account.open_positions >= gate.max_open_positions || account.balance < gate.min_balance {
        reasons.push(format!(
            "account: constraints violated: open_positions={} (max {}), balance={:.2} (min {:.2})",
            account.open_positions, gate.max_open_positions, account.balance, gate.min_balance
        ));
    }

    SafetyGateResult {
        passed: reasons.is_empty(),
        reasons,
    }
}

/// News category score (§4.4.2): base 50, ±15 on the sentiment label,
/// ±10 on which side of the pos/neg ratio dominates, ±5 on unusually high
/// or low item counts.
fn score_news(features: &FeatureVector) -> f64 {
    let mut score = 50.0;
    score += features.news_sentiment_label() * 15.0;
    if features.news_pos_ratio() > features.news_neg_ratio() + 0.1 {
        score += 10.0;
    } else if features.news_neg_ratio() > features.news_pos_ratio() + 0.1 {
        score -= 10.0;
    }
    if features.news_count() > 15.0 {
        score += 5.0;
    } else if features.news_count() < 5.0 {
        score -= 5.0;
    }
    score.clamp(0.0, 100.0)
}

/// Price category score (§4.4.2): base 50, ±15 on trend, ±10/±5 on
/// moderate/extreme moves (signed with the move's direction), and
/// ±10/±5/−10 on the low/medium/high volatility bands.
fn score_price(features: &FeatureVector) -> f64 {
    let mut score = 50.0;
    score += features.trend() * 15.0;

    let pct = features.price_change_pct();
    let abs_pct = pct.abs();
    let sign = pct.signum();
    if (0.5..2.5).contains(&abs_pct) {
        score += sign * 10.0;
    } else if abs_pct >= 2.5 {
        score += sign * 5.0;
    }

    let vol = features.volatility();
    if vol < 0.015 {
        score += 10.0;
    } else if vol < 0.025 {
        score += 5.0;
    } else if vol > 0.04 {
        score -= 10.0;
    }

    score.clamp(0.0, 100.0)
}

/// Sentiment category score (§4.4.2): base 50, fear/greed banding plus
/// ±10 on the market sentiment label.
fn score_sentiment(features: &FeatureVector) -> f64 {
    let mut score = 50.0;
    let fg = features.fear_greed_index();
    if fg > 50.0 && fg < 65.0 {
        score += 15.0;
    } else if fg > 35.0 && fg < 50.0 {
        score += 10.0;
    } else if fg >= 75.0 {
        score -= 15.0;
    } else if fg <= 25.0 {
        score -= 10.0;
    }
    score += features.market_sentiment_label() * 10.0;
    score.clamp(0.0, 100.0)
}

/// AI category score (§4.4.2): base 50, ±10 on consensus, plus an
/// agreement-ratio bonus/penalty.
fn score_ai(features: &FeatureVector) -> f64 {
    let mut score = 50.0;
    score += features.ai_consensus() * 10.0;
    let agreement = features.ai_agreement_ratio();
    if agreement > 0.7 {
        score += 10.0;
    } else if agreement < 0.4 {
        score -= 5.0;
    }
    score.clamp(0.0, 100.0)
}

/// Computes the weighted total (§4.4.2):
/// `total = Σ_c(score_c × w_c × m_c) / Σ_c(w_c × m_c)`, clamped to 0..100.
fn weighted_total(scores: &CategoryScores, config: &PipelineConfig, multipliers: &crate::weights::Multipliers) -> f64 {
    let weights = &config.weights;
    let weighted = [
        (scores.news, weights.get(Category::News) * multipliers.get(Category::News)),
        (scores.price, weights.get(Category::Price) * multipliers.get(Category::Price)),
        (
            scores.sentiment,
            weights.get(Category::Sentiment) * multipliers.get(Category::Sentiment),
        ),
        (scores.ai, weights.get(Category::Ai) * multipliers.get(Category::Ai)),
    ];

    let weight_sum: f64 = weighted.iter().map(|(_, w)| w).sum();
    let total = if weight_sum > 0.0 {
        weighted.iter().map(|(s, w)| s * w).sum::<f64>() / weight_sum
    } else {
        50.0
    };
    total.clamp(0.0, 100.0)
}

/// Consistency (§4.4.2, GLOSSARY): the fraction of the four non-neutral
/// directional signals (news label, trend, market-sentiment label, AI
/// consensus) that share the majority sign. 0 when all four are neutral.
fn consistency(features: &FeatureVector) -> f64 {
    let signals = [
        features.news_sentiment_label(),
        features.trend(),
        features.market_sentiment_label(),
        features.ai_consensus(),
    ];
    let positive = signals.iter().filter(|s| **s > 0.0).count();
    let negative = signals.iter().filter(|s| **s < 0.0).count();
    let non_neutral = positive + negative;
    if non_neutral == 0 {
        return 0.0;
    }
    positive.max(negative) as f64 / non_neutral as f64
}

/// Conservative decision thresholding (§4.4.3): requires both the total
/// score beyond the buy/sell threshold AND consistency at or above the
/// minimum; otherwise holds.
fn threshold_action(total: f64, consistency: f64, config: &PipelineConfig, fear_greed: f64) -> (Action, Vec<String>) {
    let t = &config.thresholds;
    let mut reasons = Vec::new();

    if total > t.buy_score && consistency > t.min_consistency {
        if fear_greed >= t.fear_greed_long_ceiling {
            reasons.push(format!(
                "long signal suppressed by euphoric fear/greed {:.1} >= ceiling {:.1}",
                fear_greed, t.fear_greed_long_ceiling
            ));
            return (Action::Hold, reasons);
        }
        reasons.push(format!("total score {:.1} > buy threshold {:.1}", total, t.buy_score));
        reasons.push(format!("consistency {:.2} > minimum {:.2}", consistency, t.min_consistency));
        return (Action::Long, reasons);
    }

    if total < t.sell_score && consistency > t.min_consistency {
        if fear_greed <= t.fear_greed_short_floor {
            reasons.push(format!(
                "short signal suppressed by panic fear/greed {:.1} <= floor {:.1}",
                fear_greed, t.fear_greed_short_floor
            ));
            return (Action::Hold, reasons);
        }
        reasons.push(format!("total score {:.1} < sell threshold {:.1}", total, t.sell_score));
        reasons.push(format!("consistency {:.2} > minimum {:.2}", consistency, t.min_consistency));
        return (Action::Short, reasons);
    }

    reasons.push(format!(
        "score/consistency did not clear thresholds: total={:.1} consistency={:.2}",
        total, consistency
    ));
    (Action::Hold, reasons)
}

/// The category whose score is furthest from the neutral midpoint of 50 —
/// the category that most drove the weighted total away from neutral.
fn dominant_category(scores: &CategoryScores) -> Category {
    let candidates = [
        (Category::News, (scores.news - 50.0).abs()),
        (Category::Price, (scores.price - 50.0).abs()),
        (Category::Sentiment, (scores.sentiment - 50.0).abs()),
        (Category::Ai, (scores.ai - 50.0).abs()),
    ];
    candidates
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
        .unwrap_or(Category::Price)
}

/// Runs the safety gate, then (if it passes) the weighted scoring and
/// conservative thresholding stages, producing a full [`Decision`] (§4.4).
/// On gate failure the decision is HOLD but the underlying scores are still
/// computed and retained so callers can see what the engine *would* have
/// done (§4.4.1 note: AI suggestions are retained on gate failure, not
/// discarded).
pub fn decide(features: &FeatureVector, account: &AccountState, config: &PipelineConfig) -> Decision {
    let gate = safety_gate(features, account, config);

    let scores = CategoryScores {
        news: score_news(features),
        price: score_price(features),
        sentiment: score_sentiment(features),
        ai: score_ai(features),
    };

    let multipliers = dynamic_multipliers(features, config);
    let total = weighted_total(&scores, config, &multipliers);
    let consistency = consistency(features);

    if !gate.passed {
        return Decision {
            action: Action::Hold,
            confidence: 0.0,
            reasons: gate.reasons.clone(),
            scores,
            total_score: total,
            consistency,
            safety_gate: gate,
        };
    }

    let (action, mut reasons) = threshold_action(total, consistency, config, features.fear_greed_index());
    reasons.splice(0..0, gate.reasons.clone());

    // §4.4.3: confidence = total (LONG) / 100-total (SHORT), scaled by the
    // dynamic multiplier of the dominant category; HOLD is 50 on gate pass.
    let confidence = match action {
        Action::Hold => 50.0,
        Action::Long => (total * multipliers.get(dominant_category(&scores))).clamp(0.0, 100.0),
        Action::Short => ((100.0 - total) * multipliers.get(dominant_category(&scores))).clamp(0.0, 100.0),
    };

    Decision {
        action,
        confidence,
        reasons,
        scores,
        total_score: total,
        consistency,
        safety_gate: gate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_feature_vector, AdapterResults, CandleWindow, NewsDigest, Prediction, SentimentReading};
    use crate::types::Candle;
    use chrono::Utc;

    fn ok_account() -> AccountState {
        AccountState {
            balance: 10_000.0,
            open_positions: 0,
            leverage: 10,
            risk_percent: 0.015,
        }
    }

    #[test]
    fn neutral_snapshot_holds() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        let decision = decide(&fv, &ok_account(), &config);
        // Neutral gas defaults fail the tradeable check, so gate fails.
        assert_eq!(decision.action, Action::Hold);
        assert!(!decision.safety_gate.passed);
    }

    #[test]
    fn gate_fails_on_high_gas() {
        let config = PipelineConfig::default();
        let mut results = AdapterResults::default();
        results.gas = Some(crate::features::GasReading {
            eth_gwei: 200.0,
            btc_sat_vb: 100.0,
        });
        results.news = Some(NewsDigest {
            score: 60.0,
            pos_ratio: 0.7,
            neg_ratio: 0.1,
            count: 20.0,
            items: Vec::new(),
        });
        results.ai_predictors = Some(vec![Prediction::Up(60.0)]);
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        let decision = decide(&fv, &ok_account(), &config);
        assert!(!decision.safety_gate.passed);
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.safety_gate.reasons.iter().any(|r| r.starts_with("cost")));
    }

    #[test]
    fn clean_bullish_snapshot_goes_long() {
        let config = PipelineConfig::default();
        let mut results = AdapterResults::default();
        results.gas = Some(crate::features::GasReading {
            eth_gwei: 15.0,
            btc_sat_vb: 8.0,
        });
        results.news = Some(NewsDigest {
            score: 70.0,
            pos_ratio: 0.8,
            neg_ratio: 0.05,
            count: 20.0,
            items: Vec::new(),
        });
        results.sentiment = Some(SentimentReading {
            fear_greed: 58.0,
            label: 1,
            composite: 40.0,
        });
        // Mirrors §8 scenario 1 (clean LONG): a gentle, low-volatility
        // +1.8% drift rather than a sharp move, so trend reads +1 without
        // pushing the regime into "bull" (which requires > +2%).
        let candles: Vec<Candle> = (0..24)
            .map(|i| {
                let p = 100.0 + i as f64 * (1.8 / 23.0);
                Candle::new(i * 3600, p, p + 0.05, p - 0.05, p, 100.0)
            })
            .collect();
        results.candles = Some(CandleWindow { candles });
        results.ai_predictors = Some(vec![
            Prediction::Up(80.0),
            Prediction::Up(75.0),
            Prediction::Up(70.0),
        ]);

        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        let decision = decide(&fv, &ok_account(), &config);
        assert!(decision.safety_gate.passed);
        assert_eq!(decision.action, Action::Long);
        assert!(decision.confidence >= 75.0);
    }

    #[test]
    fn insufficient_consistency_holds_even_with_high_total() {
        let config = PipelineConfig::default();
        let scores = CategoryScores {
            news: 90.0,
            price: 10.0,
            sentiment: 90.0,
            ai: 10.0,
        };
        let multipliers = crate::weights::neutral_multipliers();
        let total = weighted_total(&scores, &config, &multipliers);
        // trend (price-derived signal) disagrees with news/sentiment here.
        let cons = 0.5;
        let (action, _) = threshold_action(total, cons, &config, 50.0);
        assert!(cons < config.thresholds.min_consistency);
        assert_eq!(action, Action::Hold);
    }

    #[test]
    fn consistency_scenario_from_spec_example_four() {
        // trend=+1, news_sentiment_label=-1, market_sentiment_label=+1,
        // ai_consensus=0 -> 2 of 3 non-neutral signals agree -> 0.667.
        let mut results = AdapterResults::default();
        results.news = Some(NewsDigest {
            score: -10.0,
            pos_ratio: 0.1,
            neg_ratio: 0.3,
            count: 10.0,
            items: Vec::new(),
        });
        results.sentiment = Some(SentimentReading {
            fear_greed: 50.0,
            label: 1,
            composite: 0.0,
        });
        let candles: Vec<Candle> = (0..12)
            .map(|i| Candle::new(i * 3600, 100.0 + i as f64, 101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64, 10.0))
            .collect();
        results.candles = Some(CandleWindow { candles });
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        assert_eq!(fv.trend(), 1.0);
        assert_eq!(fv.news_sentiment_label(), -1.0);
        assert_eq!(fv.market_sentiment_label(), 1.0);
        assert_eq!(fv.ai_consensus(), 0.0);
        let c = consistency(&fv);
        assert!((c - 2.0 / 3.0).abs() < 1e-9);
        assert!(c < config.thresholds.min_consistency);
    }

    #[test]
    fn consistency_is_zero_when_all_signals_neutral() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(consistency(&fv), 0.0);
    }

    #[test]
    fn euphoric_fear_greed_suppresses_long() {
        let config = PipelineConfig::default();
        let (action, reasons) = threshold_action(80.0, 1.0, &config, 90.0);
        assert_eq!(action, Action::Hold);
        assert!(reasons.iter().any(|r| r.contains("suppressed")));
    }

    #[test]
    fn panic_fear_greed_suppresses_short() {
        let config = PipelineConfig::default();
        let (action, reasons) = threshold_action(10.0, 1.0, &config, 10.0);
        assert_eq!(action, Action::Hold);
        assert!(reasons.iter().any(|r| r.contains("suppressed")));
    }

    #[test]
    fn price_score_monotonic_in_trend() {
        // §8: increasing trend from -1 -> 0 -> +1 never decreases price_score,
        // holding the other additive terms fixed (trend is an independent
        // additive term in score_price, so this holds for any fixed
        // price_change/volatility contribution).
        let fixed = 37.0; // whatever the non-trend terms happened to add up to
        let low = fixed + (-1.0_f64) * 15.0;
        let mid = fixed + 0.0_f64 * 15.0;
        let high = fixed + 1.0_f64 * 15.0;
        assert!(mid >= low);
        assert!(high >= mid);
    }

    #[test]
    fn price_score_monotonic_in_volatility_band() {
        // Holding trend/price_change fixed, moving volatility from the high
        // band into the low band never decreases price_score.
        let config = PipelineConfig::default();
        let mut results = AdapterResults::default();
        let high_vol_candles: Vec<Candle> = (0..24)
            .map(|i| {
                let p = 100.0 + if i % 2 == 0 { 10.0 } else { -10.0 };
                Candle::new(i * 3600, p, p + 1.0, p - 1.0, p, 10.0)
            })
            .collect();
        results.candles = Some(CandleWindow { candles: high_vol_candles });
        let (fv_high, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        let high_score = score_price(&fv_high);

        let mut results_low = AdapterResults::default();
        let low_vol_candles: Vec<Candle> = (0..24)
            .map(|i| Candle::new(i * 3600, 100.0, 100.1, 99.9, 100.0, 10.0))
            .collect();
        results_low.candles = Some(CandleWindow { candles: low_vol_candles });
        let (fv_low, _) = build_feature_vector(&results_low, "BTCUSDT", Utc::now(), &config);
        let low_score = score_price(&fv_low);

        assert!(fv_high.volatility() > 0.04);
        assert!(fv_low.volatility() < 0.015);
        assert!(low_score >= high_score);
    }

    #[test]
    fn decision_round_trips_through_json() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        let decision = decide(&fv, &ok_account(), &config);

        let json = serde_json::to_string(&decision).unwrap();
        let parsed: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }
}

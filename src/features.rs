//! The multi-source feature aggregator (spec §4.2): turns whichever
//! adapter results are available into a fixed-layout [`FeatureVector`] plus
//! a [`FeatureMetadata`] side-car. Pure, total — this module never fails;
//! a missing source simply contributes its documented neutral default.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::{FeatureVectorLength, PipelineConfig};
use crate::types::Candle;

// ---------------------------------------------------------------------
// Adapter-facing data contracts (§3, §4.1)
// ---------------------------------------------------------------------

/// Direction reported by an individual AI predictor (§4.1, §9 redesign
/// note: a sum type, never a back-end-identity branch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prediction {
    Up(f64),
    Down(f64),
    Flat(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleWindow {
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub imbalance: f64,
    pub support_strength: f64,
    pub resistance_strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasReading {
    pub eth_gwei: f64,
    pub btc_sat_vb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub score: f64,
    pub pos_ratio: f64,
    pub neg_ratio: f64,
    pub count: f64,
    pub items: Vec<NewsItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub fear_greed: f64,
    pub label: i8,
    pub composite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroReading {
    pub dxy_pct: f64,
    pub sp500_pct: f64,
    pub vix: f64,
    pub risk_appetite: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuturesReading {
    pub oi_change_pct: f64,
    pub funding_trend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMarketEntry {
    pub question: String,
    pub yes_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMarketReading {
    pub markets: Vec<PredictionMarketEntry>,
    pub composite_score: f64,
}

/// The complete set of whichever adapter results came back for one
/// request; `None` in any slot means that source is unavailable and
/// contributes neutrals (§4.1 failure semantics).
#[derive(Debug, Clone, Default)]
pub struct AdapterResults {
    pub candles: Option<CandleWindow>,
    pub orderbook: Option<OrderBookSnapshot>,
    pub gas: Option<GasReading>,
    pub news: Option<NewsDigest>,
    pub sentiment: Option<SentimentReading>,
    pub macro_data: Option<MacroReading>,
    pub futures: Option<FuturesReading>,
    pub prediction_market: Option<PredictionMarketReading>,
    pub ai_predictors: Option<Vec<Prediction>>,
}

// ---------------------------------------------------------------------
// FeatureVector
// ---------------------------------------------------------------------

const IDX_ETH_GAS: usize = 0;
const IDX_BTC_FEE: usize = 1;
const IDX_ETH_TRADEABLE: usize = 2;
const IDX_BTC_TRADEABLE: usize = 3;
const IDX_CURRENT_PRICE: usize = 4;
const IDX_PRICE_CHANGE_PCT: usize = 5;
const IDX_AVG_VOLUME: usize = 6;
const IDX_VOLATILITY: usize = 7;
const IDX_TREND: usize = 8;
const IDX_HIGH_PRICE: usize = 9;
const IDX_LOW_PRICE: usize = 10;
const IDX_PRICE_RANGE_PCT: usize = 11;
const IDX_NEWS_SCORE: usize = 12;
const IDX_NEWS_POS_RATIO: usize = 13;
const IDX_NEWS_NEG_RATIO: usize = 14;
const IDX_NEWS_COUNT: usize = 15;
const IDX_NEWS_SENTIMENT_LABEL: usize = 16;
const IDX_MARKET_SENTIMENT_SCORE: usize = 17;
const IDX_MARKET_CONFIDENCE: usize = 18;
const IDX_FEAR_GREED_INDEX: usize = 19;
const IDX_MARKET_SENTIMENT_LABEL: usize = 20;
const IDX_AI_AVG_CONFIDENCE: usize = 21;
const IDX_AI_UP_COUNT: usize = 22;
const IDX_AI_DOWN_COUNT: usize = 23;
const IDX_AI_AGREEMENT_RATIO: usize = 24;
const IDX_AI_CONSENSUS: usize = 25;
const IDX_ORDERBOOK_IMBALANCE: usize = 26;
const IDX_SUPPORT_STRENGTH: usize = 27;
const IDX_RESISTANCE_STRENGTH: usize = 28;
const IDX_DXY_CHANGE: usize = 29;
const IDX_SP500_CHANGE: usize = 30;
const IDX_VIX_LEVEL: usize = 31;
const IDX_RISK_APPETITE: usize = 32;
const IDX_OI_CHANGE: usize = 33;
const IDX_FUNDING_TREND: usize = 34;

const CORE_LEN: usize = 26;
const EXTENDED_LEN: usize = 35;

/// The fixed-layout, stable-index numeric feature vector of §3. Indices
/// are a private implementation detail of this module — every other part
/// of the crate goes through the named accessors or [`FeatureVector::get_by_name`],
/// per the "never index by integer in application code" design note (§9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
    length: FeatureVectorLength,
}

macro_rules! accessor {
    ($name:ident, $idx:ident) => {
        pub fn $name(&self) -> f64 {
            self.values[$idx]
        }
    };
}

impl FeatureVector {
    fn new(length: FeatureVectorLength) -> Self {
        Self {
            values: vec![0.0; length.len()],
            length,
        }
    }

    pub fn length(&self) -> FeatureVectorLength {
        self.length
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    accessor!(eth_gas, IDX_ETH_GAS);
    accessor!(btc_fee, IDX_BTC_FEE);
    accessor!(eth_tradeable, IDX_ETH_TRADEABLE);
    accessor!(btc_tradeable, IDX_BTC_TRADEABLE);
    accessor!(current_price, IDX_CURRENT_PRICE);
    accessor!(price_change_pct, IDX_PRICE_CHANGE_PCT);
    accessor!(avg_volume, IDX_AVG_VOLUME);
    accessor!(volatility, IDX_VOLATILITY);
    accessor!(trend, IDX_TREND);
    accessor!(high_price, IDX_HIGH_PRICE);
    accessor!(low_price, IDX_LOW_PRICE);
    accessor!(price_range_pct, IDX_PRICE_RANGE_PCT);
    accessor!(news_score, IDX_NEWS_SCORE);
    accessor!(news_pos_ratio, IDX_NEWS_POS_RATIO);
    accessor!(news_neg_ratio, IDX_NEWS_NEG_RATIO);
    accessor!(news_count, IDX_NEWS_COUNT);
    accessor!(news_sentiment_label, IDX_NEWS_SENTIMENT_LABEL);
    accessor!(market_sentiment_score, IDX_MARKET_SENTIMENT_SCORE);
    accessor!(market_confidence, IDX_MARKET_CONFIDENCE);
    accessor!(fear_greed_index, IDX_FEAR_GREED_INDEX);
    accessor!(market_sentiment_label, IDX_MARKET_SENTIMENT_LABEL);
    accessor!(ai_avg_confidence, IDX_AI_AVG_CONFIDENCE);
    accessor!(ai_up_count, IDX_AI_UP_COUNT);
    accessor!(ai_down_count, IDX_AI_DOWN_COUNT);
    accessor!(ai_agreement_ratio, IDX_AI_AGREEMENT_RATIO);
    accessor!(ai_consensus, IDX_AI_CONSENSUS);

    /// `None` when the deployment advertises the 26-index layout.
    pub fn orderbook_imbalance(&self) -> Option<f64> {
        self.values.get(IDX_ORDERBOOK_IMBALANCE).copied()
    }
    pub fn support_strength(&self) -> Option<f64> {
        self.values.get(IDX_SUPPORT_STRENGTH).copied()
    }
    pub fn resistance_strength(&self) -> Option<f64> {
        self.values.get(IDX_RESISTANCE_STRENGTH).copied()
    }
    pub fn dxy_change(&self) -> Option<f64> {
        self.values.get(IDX_DXY_CHANGE).copied()
    }
    pub fn sp500_change(&self) -> Option<f64> {
        self.values.get(IDX_SP500_CHANGE).copied()
    }
    pub fn vix_level(&self) -> Option<f64> {
        self.values.get(IDX_VIX_LEVEL).copied()
    }
    pub fn risk_appetite(&self) -> Option<f64> {
        self.values.get(IDX_RISK_APPETITE).copied()
    }
    pub fn oi_change(&self) -> Option<f64> {
        self.values.get(IDX_OI_CHANGE).copied()
    }
    pub fn funding_trend(&self) -> Option<f64> {
        self.values.get(IDX_FUNDING_TREND).copied()
    }

    /// Introspection by name (§9 design note), used by debugging/snapshot
    /// tooling that doesn't want to hardcode a struct field list.
    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        let idx = match name {
            "eth_gas" => IDX_ETH_GAS,
            "btc_fee" => IDX_BTC_FEE,
            "eth_tradeable" => IDX_ETH_TRADEABLE,
            "btc_tradeable" => IDX_BTC_TRADEABLE,
            "current_price" => IDX_CURRENT_PRICE,
            "price_change_pct" => IDX_PRICE_CHANGE_PCT,
            "avg_volume" => IDX_AVG_VOLUME,
            "volatility" => IDX_VOLATILITY,
            "trend" => IDX_TREND,
            "high_price" => IDX_HIGH_PRICE,
            "low_price" => IDX_LOW_PRICE,
            "price_range_pct" => IDX_PRICE_RANGE_PCT,
            "news_score" => IDX_NEWS_SCORE,
            "news_pos_ratio" => IDX_NEWS_POS_RATIO,
            "news_neg_ratio" => IDX_NEWS_NEG_RATIO,
            "news_count" => IDX_NEWS_COUNT,
            "news_sentiment_label" => IDX_NEWS_SENTIMENT_LABEL,
            "market_sentiment_score" => IDX_MARKET_SENTIMENT_SCORE,
            "market_confidence" => IDX_MARKET_CONFIDENCE,
            "fear_greed_index" => IDX_FEAR_GREED_INDEX,
            "market_sentiment_label" => IDX_MARKET_SENTIMENT_LABEL,
            "ai_avg_confidence" => IDX_AI_AVG_CONFIDENCE,
            "ai_up_count" => IDX_AI_UP_COUNT,
            "ai_down_count" => IDX_AI_DOWN_COUNT,
            "ai_agreement_ratio" => IDX_AI_AGREEMENT_RATIO,
            "ai_consensus" => IDX_AI_CONSENSUS,
            "orderbook_imbalance" => IDX_ORDERBOOK_IMBALANCE,
            "support_strength" => IDX_SUPPORT_STRENGTH,
            "resistance_strength" => IDX_RESISTANCE_STRENGTH,
            "dxy_change" => IDX_DXY_CHANGE,
            "sp500_change" => IDX_SP500_CHANGE,
            "vix_level" => IDX_VIX_LEVEL,
            "risk_appetite" => IDX_RISK_APPETITE,
            "oi_change" => IDX_OI_CHANGE,
            "funding_trend" => IDX_FUNDING_TREND,
            _ => return None,
        };
        self.values.get(idx).copied()
    }
}

/// Sidecar fields not part of the vector but carried with it (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityFlags {
    pub candles: bool,
    pub orderbook: bool,
    pub gas: bool,
    pub news: bool,
    pub sentiment: bool,
    pub macro_data: bool,
    pub futures: bool,
    pub prediction_market: bool,
    pub ai_predictors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMetadata {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub availability: AvailabilityFlags,
    pub clamped: bool,
    pub raw_payloads: Option<HashMap<String, serde_json::Value>>,
}

// ---------------------------------------------------------------------
// Derived computations (§4.2)
// ---------------------------------------------------------------------

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.clamp(lo, hi)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.mean()
    }
}

fn population_stddev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.population_std_dev()
}

/// Simple moving average over the last `window` closes ending at `idx`
/// (inclusive); `None` if not enough history.
fn trailing_ma(closes: &[f64], idx: usize, window: usize) -> Option<f64> {
    if window == 0 || idx + 1 < window {
        return None;
    }
    let start = idx + 1 - window;
    Some(mean(&closes[start..=idx]))
}

struct CandleDerived {
    current_price: f64,
    price_change_pct: f64,
    avg_volume: f64,
    volatility: f64,
    trend: f64,
    high_price: f64,
    low_price: f64,
    price_range_pct: f64,
}

fn derive_from_candles(window: &CandleWindow) -> CandleDerived {
    let candles = &window.candles;
    if candles.is_empty() {
        return CandleDerived {
            current_price: 0.0,
            price_change_pct: 0.0,
            avg_volume: 0.0,
            volatility: 0.0,
            trend: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            price_range_pct: 0.0,
        };
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let current_price = *closes.last().unwrap();
    let first = closes[0];

    let price_change_pct = if first != 0.0 {
        (current_price - first) / first * 100.0
    } else {
        0.0
    };

    let avg_volume = mean(&volumes);
    let mean_close = mean(&closes);
    let volatility = if mean_close != 0.0 {
        population_stddev(&closes) / mean_close
    } else {
        0.0
    };

    // Trend from short/long MA slope (§4.2): short window is a third of the
    // candle window (min 2), long window is the full window.
    let long_window = closes.len();
    let short_window = (long_window / 3).max(2).min(long_window);
    let last_idx = closes.len() - 1;
    let short_ma = trailing_ma(&closes, last_idx, short_window);
    let long_ma = trailing_ma(&closes, last_idx, long_window);
    let epsilon = current_price * 0.001;
    let trend = match (short_ma, long_ma) {
        (Some(s), Some(l)) if s - l >= epsilon => 1.0,
        (Some(s), Some(l)) if l - s >= epsilon => -1.0,
        _ => 0.0,
    };

    let high_price = candles
        .iter()
        .map(|c| c.high)
        .fold(f64::MIN, f64::max)
        .max(current_price);
    let low_price = candles
        .iter()
        .map(|c| c.low)
        .fold(f64::MAX, f64::min)
        .min(current_price);
    let price_range_pct = if low_price != 0.0 {
        (high_price - low_price) / low_price * 100.0
    } else {
        0.0
    };

    CandleDerived {
        current_price,
        price_change_pct,
        avg_volume,
        volatility,
        trend,
        high_price,
        low_price,
        price_range_pct,
    }
}

fn derive_risk_appetite(sp500_pct: f64, vix: f64) -> f64 {
    clamp(50.0 + sp500_pct * 5.0 - (vix - 20.0) * 2.0, 0.0, 100.0)
}

fn derive_ai_fields(predictions: &[Prediction]) -> (f64, f64, f64, f64, f64) {
    let total = predictions.len();
    if total == 0 {
        return (0.0, 0.0, 0.0, 0.0, 0.0);
    }
    let up = predictions
        .iter()
        .filter(|p| matches!(p, Prediction::Up(_)))
        .count();
    let down = predictions
        .iter()
        .filter(|p| matches!(p, Prediction::Down(_)))
        .count();
    let avg_confidence = mean(
        &predictions
            .iter()
            .map(|p| match p {
                Prediction::Up(c) | Prediction::Down(c) | Prediction::Flat(c) => *c,
            })
            .collect::<Vec<_>>(),
    );
    let agreement_ratio = if total > 0 {
        (up.max(down) as f64) / (total as f64)
    } else {
        0.0
    };
    // Minimum-gap rule: |up - down| < 1 means no clear consensus (§4.2).
    let gap = up as i64 - down as i64;
    let consensus = if gap.unsigned_abs() < 1 {
        0.0
    } else if gap > 0 {
        1.0
    } else {
        -1.0
    };
    (avg_confidence, up as f64, down as f64, agreement_ratio, consensus)
}

/// Builds a [`FeatureVector`]/[`FeatureMetadata`] pair from whichever
/// adapter results are present (§4.2). Never fails — missing inputs map to
/// documented neutrals.
pub fn build_feature_vector(
    results: &AdapterResults,
    symbol: &str,
    now: DateTime<Utc>,
    config: &PipelineConfig,
) -> (FeatureVector, FeatureMetadata) {
    let mut fv = FeatureVector::new(config.feature_vector_length);
    let mut clamped = false;
    let mut set = |idx: usize, value: f64, lo: f64, hi: f64| {
        let clamped_value = clamp(value, lo, hi);
        if clamped_value != value {
            clamped = true;
        }
        fv.values[idx] = clamped_value;
    };

    // Gas (neutral: eth=50, btc=20, tradeable flags=0).
    let gas = results.gas.unwrap_or(GasReading {
        eth_gwei: 50.0,
        btc_sat_vb: 20.0,
    });
    set(IDX_ETH_GAS, gas.eth_gwei, 0.0, 500.0);
    set(IDX_BTC_FEE, gas.btc_sat_vb, 0.0, 300.0);
    let eth_tradeable = if gas.eth_gwei <= config.safety_gate.eth_gas_gate {
        1.0
    } else {
        0.0
    };
    let btc_tradeable = if gas.btc_sat_vb <= config.safety_gate.btc_fee_gate {
        1.0
    } else {
        0.0
    };
    fv.values[IDX_ETH_TRADEABLE] = eth_tradeable;
    fv.values[IDX_BTC_TRADEABLE] = btc_tradeable;

    // Candles (neutral: prices=0, trend=0, volatility=0, volume=0).
    let candle_derived = results
        .candles
        .as_ref()
        .map(derive_from_candles)
        .unwrap_or(CandleDerived {
            current_price: 0.0,
            price_change_pct: 0.0,
            avg_volume: 0.0,
            volatility: 0.0,
            trend: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            price_range_pct: 0.0,
        });
    set(IDX_CURRENT_PRICE, candle_derived.current_price, 0.0, f64::MAX);
    set(IDX_PRICE_CHANGE_PCT, candle_derived.price_change_pct, -100.0, 100.0);
    set(IDX_AVG_VOLUME, candle_derived.avg_volume, 0.0, f64::MAX);
    set(IDX_VOLATILITY, candle_derived.volatility, 0.0, 1.0);
    fv.values[IDX_TREND] = candle_derived.trend;
    set(IDX_HIGH_PRICE, candle_derived.high_price, 0.0, f64::MAX);
    set(IDX_LOW_PRICE, candle_derived.low_price, 0.0, f64::MAX);
    set(IDX_PRICE_RANGE_PCT, candle_derived.price_range_pct, 0.0, f64::MAX);

    // News (neutral: score=0, pos=neg=0, count=0, label=0).
    let news = results.news.clone().unwrap_or(NewsDigest {
        score: 0.0,
        pos_ratio: 0.0,
        neg_ratio: 0.0,
        count: 0.0,
        items: Vec::new(),
    });
    set(IDX_NEWS_SCORE, news.score, -100.0, 100.0);
    set(IDX_NEWS_POS_RATIO, news.pos_ratio, 0.0, 1.0);
    set(IDX_NEWS_NEG_RATIO, news.neg_ratio, 0.0, 1.0);
    set(IDX_NEWS_COUNT, news.count, 0.0, f64::MAX);
    let news_label = if news.pos_ratio > news.neg_ratio + 0.05 {
        1.0
    } else if news.neg_ratio > news.pos_ratio + 0.05 {
        -1.0
    } else {
        0.0
    };
    fv.values[IDX_NEWS_SENTIMENT_LABEL] = news_label;

    // Sentiment (neutral: fear_greed=50, label=0, composite=0).
    let sentiment = results.sentiment.unwrap_or(SentimentReading {
        fear_greed: 50.0,
        label: 0,
        composite: 0.0,
    });
    set(IDX_MARKET_SENTIMENT_SCORE, sentiment.composite, -100.0, 100.0);
    set(IDX_MARKET_CONFIDENCE, 50.0 + sentiment.composite / 2.0, 0.0, 100.0);
    set(IDX_FEAR_GREED_INDEX, sentiment.fear_greed, 0.0, 100.0);
    fv.values[IDX_MARKET_SENTIMENT_LABEL] = sentiment.label as f64;

    // AI predictors (neutral: all zeros; consensus=0, agreement=0).
    let predictions = results.ai_predictors.clone().unwrap_or_default();
    let (ai_avg_confidence, ai_up, ai_down, ai_agreement, ai_consensus) =
        derive_ai_fields(&predictions);
    set(IDX_AI_AVG_CONFIDENCE, ai_avg_confidence, 0.0, 100.0);
    fv.values[IDX_AI_UP_COUNT] = ai_up;
    fv.values[IDX_AI_DOWN_COUNT] = ai_down;
    set(IDX_AI_AGREEMENT_RATIO, ai_agreement, 0.0, 1.0);
    fv.values[IDX_AI_CONSENSUS] = ai_consensus;

    // Extended layout only.
    if config.feature_vector_length == FeatureVectorLength::Extended35 {
        let orderbook = results.orderbook.unwrap_or(OrderBookSnapshot {
            imbalance: 0.0,
            support_strength: 50.0,
            resistance_strength: 50.0,
        });
        set(IDX_ORDERBOOK_IMBALANCE, orderbook.imbalance, -1.0, 1.0);
        set(IDX_SUPPORT_STRENGTH, orderbook.support_strength, 0.0, 100.0);
        set(IDX_RESISTANCE_STRENGTH, orderbook.resistance_strength, 0.0, 100.0);

        let macro_data = results.macro_data.unwrap_or(MacroReading {
            dxy_pct: 0.0,
            sp500_pct: 0.0,
            vix: 20.0,
            risk_appetite: None,
        });
        set(IDX_DXY_CHANGE, macro_data.dxy_pct, -100.0, 100.0);
        set(IDX_SP500_CHANGE, macro_data.sp500_pct, -100.0, 100.0);
        set(IDX_VIX_LEVEL, macro_data.vix, 0.0, 200.0);
        let risk_appetite = macro_data
            .risk_appetite
            .unwrap_or_else(|| derive_risk_appetite(macro_data.sp500_pct, macro_data.vix));
        set(IDX_RISK_APPETITE, risk_appetite, 0.0, 100.0);

        let futures = results.futures.unwrap_or(FuturesReading {
            oi_change_pct: 0.0,
            funding_trend: 0.0,
        });
        set(IDX_OI_CHANGE, futures.oi_change_pct, -100.0, 100.0);
        set(IDX_FUNDING_TREND, futures.funding_trend, -1.0, 1.0);
    }

    let metadata = FeatureMetadata {
        timestamp: now,
        symbol: symbol.to_string(),
        availability: AvailabilityFlags {
            candles: results.candles.is_some(),
            orderbook: results.orderbook.is_some(),
            gas: results.gas.is_some(),
            news: results.news.is_some(),
            sentiment: results.sentiment.is_some(),
            macro_data: results.macro_data.is_some(),
            futures: results.futures.is_some(),
            prediction_market: results.prediction_market.is_some(),
            ai_predictors: results.ai_predictors.is_some(),
        },
        clamped,
        raw_payloads: None,
    };

    (fv, metadata)
}

/// Checks the §3 data-model invariants that `build_feature_vector` can never
/// violate by construction but which a future adapter change could break
/// silently (e.g. an adapter reporting raw up/down counts instead of a
/// prediction list). Violation is [`PipelineError::InternalInconsistency`]
/// (§7): a hard failure rather than a potentially misleading HOLD.
pub fn validate(features: &FeatureVector) -> crate::error::Result<()> {
    let up = features.ai_up_count();
    let down = features.ai_down_count();
    let total = up + down;
    if total > 0.0 && (up < 0.0 || down < 0.0) {
        return Err(crate::error::PipelineError::InternalInconsistency(format!(
            "negative AI predictor counts: up={up} down={down}"
        )));
    }
    if features.news_pos_ratio() + features.news_neg_ratio() > 1.0 + 1e-6 {
        return Err(crate::error::PipelineError::InternalInconsistency(format!(
            "news_pos_ratio + news_neg_ratio exceeds 1.0: {} + {}",
            features.news_pos_ratio(),
            features.news_neg_ratio()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_idempotence_with_no_adapter_outputs() {
        let config = PipelineConfig::default();
        let (fv, meta) = build_feature_vector(
            &AdapterResults::default(),
            "BTCUSDT",
            Utc::now(),
            &config,
        );

        assert_eq!(fv.eth_gas(), 50.0);
        assert_eq!(fv.btc_fee(), 20.0);
        assert_eq!(fv.current_price(), 0.0);
        assert_eq!(fv.trend(), 0.0);
        assert_eq!(fv.volatility(), 0.0);
        assert_eq!(fv.news_score(), 0.0);
        assert_eq!(fv.news_count(), 0.0);
        assert_eq!(fv.fear_greed_index(), 50.0);
        assert_eq!(fv.ai_agreement_ratio(), 0.0);
        assert_eq!(fv.ai_consensus(), 0.0);

        assert!(!meta.availability.candles);
        assert!(!meta.availability.orderbook);
        assert!(!meta.availability.gas);
        assert!(!meta.availability.news);
        assert!(!meta.availability.sentiment);
        assert!(!meta.availability.macro_data);
        assert!(!meta.availability.futures);
        assert!(!meta.availability.prediction_market);
        assert!(!meta.availability.ai_predictors);
    }

    #[test]
    fn neutral_gas_defaults_are_not_tradeable_by_default_gate() {
        // eth_gas neutral = 50 > default gate of 30 -> not tradeable.
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(fv.eth_tradeable(), 0.0);
        // btc_fee neutral = 20 > default gate of 15 -> not tradeable.
        assert_eq!(fv.btc_tradeable(), 0.0);
    }

    #[test]
    fn ai_consensus_requires_minimum_gap() {
        let preds = vec![Prediction::Up(60.0), Prediction::Down(55.0)];
        let (conf, up, down, agreement, consensus) = derive_ai_fields(&preds);
        assert_eq!(up, 1.0);
        assert_eq!(down, 1.0);
        assert_eq!(consensus, 0.0); // gap of 0 -> no consensus
        assert!(conf > 0.0);
        assert_eq!(agreement, 0.5);
    }

    #[test]
    fn ai_consensus_with_total_zero_is_zero() {
        let (_, up, down, agreement, consensus) = derive_ai_fields(&[]);
        assert_eq!(up, 0.0);
        assert_eq!(down, 0.0);
        assert_eq!(agreement, 0.0);
        assert_eq!(consensus, 0.0);
    }

    #[test]
    fn get_by_name_matches_accessor() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(fv.get_by_name("fear_greed_index"), Some(fv.fear_greed_index()));
        assert_eq!(fv.get_by_name("not_a_real_field"), None);
    }

    #[test]
    fn extended_layout_exposes_extra_indices() {
        let mut config = PipelineConfig::default();
        config.feature_vector_length = FeatureVectorLength::Extended35;
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(fv.as_slice().len(), 35);
        assert_eq!(fv.orderbook_imbalance(), Some(0.0));
        assert_eq!(fv.support_strength(), Some(50.0));
        assert_eq!(fv.vix_level(), Some(20.0));
    }

    #[test]
    fn core_layout_has_no_extended_indices() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(fv.as_slice().len(), 26);
        assert_eq!(fv.orderbook_imbalance(), None);
    }

    #[test]
    fn high_low_bracket_current_price() {
        let candles = vec![
            Candle::new(0, 100.0, 105.0, 95.0, 100.0, 10.0),
            Candle::new(60, 100.0, 110.0, 98.0, 108.0, 12.0),
        ];
        let derived = derive_from_candles(&CandleWindow { candles });
        assert!(derived.high_price >= derived.current_price);
        assert!(derived.current_price >= derived.low_price);
    }
}

//! Market-regime classification and the dynamic weight manager (§4.3).
//! Turns a [`FeatureVector`] into a [`Regime`] and a set of per-category
//! [`Multipliers`] that are applied on top of the static
//! [`CategoryWeights`](crate::config::CategoryWeights) base weights before
//! scoring.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::features::FeatureVector;

/// The scoring categories a regime's multiplier table can name (§4.3).
/// Only [`Category::News`], [`Category::Price`], [`Category::Sentiment`] and
/// [`Category::Ai`] carry a static base weight (they sum to 1.0) and feed the
/// weighted total directly; the rest (orderbook/macro/futures/risk) are
/// carried through [`Multipliers`] for display and for the extended-layout
/// scoring a deployment may add, but have no base weight of their own.
/// "technical" in the spec's sideways table is the same dimension as
/// [`Category::Price`] (price-action / technical analysis), not a distinct
/// fifth slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    News,
    Price,
    Sentiment,
    Ai,
    Orderbook,
    Macro,
    Futures,
    Risk,
}

/// Market regime classification (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
}

/// Per-category multipliers applied on top of the static base weights.
/// Mirrors the spec's documented output shape
/// `{news,price,sentiment,ai,orderbook,macro,futures,technical,risk}`
/// (`technical` folded into `price`, see [`Category`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multipliers {
    pub news: f64,
    pub price: f64,
    pub sentiment: f64,
    pub ai: f64,
    pub orderbook: f64,
    pub macro_: f64,
    pub futures: f64,
    pub risk: f64,
}

impl Multipliers {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::News => self.news,
            Category::Price => self.price,
            Category::Sentiment => self.sentiment,
            Category::Ai => self.ai,
            Category::Orderbook => self.orderbook,
            Category::Macro => self.macro_,
            Category::Futures => self.futures,
            Category::Risk => self.risk,
        }
    }
}

const NEUTRAL: Multipliers = Multipliers {
    news: 1.0,
    price: 1.0,
    sentiment: 1.0,
    ai: 1.0,
    orderbook: 1.0,
    macro_: 1.0,
    futures: 1.0,
    risk: 1.0,
};

/// Classifies the current regime from trend and recent price change (§4.3):
/// bull requires an up-trend *and* a confirming move beyond +2%; bear the
/// mirror image; everything else (including a strong trend without a
/// confirming move) is sideways.
pub fn classify_regime(features: &FeatureVector) -> Regime {
    let trend = features.trend();
    let price_change = features.price_change_pct();

    if trend > 0.0 && price_change > 2.0 {
        Regime::Bull
    } else if trend < 0.0 && price_change < -2.0 {
        Regime::Bear
    } else {
        Regime::Sideways
    }
}

/// The default per-regime multiplier tables (§4.3). Keys the spec leaves
/// unlisted for a regime default to 1.0.
fn base_table(regime: Regime) -> Multipliers {
    match regime {
        Regime::Bull => Multipliers {
            sentiment: 1.3,
            news: 1.2,
            orderbook: 1.2,
            macro_: 0.8,
            ai: 1.3,
            futures: 1.0,
            risk: 1.0,
            price: 1.0,
        },
        Regime::Bear => Multipliers {
            macro_: 1.4,
            risk: 1.3,
            futures: 1.2,
            sentiment: 0.7,
            news: 1.0,
            ai: 1.0,
            orderbook: 1.0,
            price: 1.0,
        },
        Regime::Sideways => Multipliers {
            price: 1.3,
            orderbook: 1.2,
            news: 1.0,
            sentiment: 1.0,
            ai: 1.0,
            macro_: 1.0,
            futures: 1.0,
            risk: 1.0,
        },
    }
}

/// Computes the dynamic multiplier set for the current feature snapshot
/// (§4.3): starts from the regime's base table, then applies two adaptive
/// fine-tuning rules:
///
/// - orderbook imbalance beyond ±0.8 is treated as possible spoofing and
///   dampens the orderbook category's multiplier.
/// - a VIX above 30 (risk-off) boosts the risk and macro categories.
pub fn dynamic_multipliers(features: &FeatureVector, config: &PipelineConfig) -> Multipliers {
    let _ = config;
    let regime = classify_regime(features);
    let mut m = base_table(regime);

    if let Some(imbalance) = features.orderbook_imbalance()
        && imbalance.abs() > 0.8
    {
        m.orderbook *= 0.7;
    }

    if let Some(vix) = features.vix_level()
        && vix > 30.0
    {
        m.risk *= 1.3;
        m.macro_ *= 1.2;
    }

    m
}

pub fn neutral_multipliers() -> Multipliers {
    NEUTRAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_feature_vector, AdapterResults};
    use chrono::Utc;

    #[test]
    fn neutral_snapshot_classifies_sideways() {
        let config = PipelineConfig::default();
        let (fv, _) = build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        assert_eq!(classify_regime(&fv), Regime::Sideways);
    }

    #[test]
    fn rising_candles_classify_bull() {
        use crate::features::CandleWindow;
        use crate::types::Candle;

        let config = PipelineConfig::default();
        let candles: Vec<Candle> = (0..12)
            .map(|i| Candle::new(i * 60, 100.0 + i as f64, 101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64, 10.0))
            .collect();
        let mut results = AdapterResults::default();
        results.candles = Some(CandleWindow { candles });
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        // trend = +1 and price change over the window is +11% > +2%.
        assert_eq!(classify_regime(&fv), Regime::Bull);
    }

    #[test]
    fn strong_trend_without_confirming_move_is_sideways() {
        use crate::features::CandleWindow;
        use crate::types::Candle;

        let config = PipelineConfig::default();
        // Trend can read +1 on a short window without a >2% total move.
        let candles: Vec<Candle> = (0..6)
            .map(|i| Candle::new(i * 60, 100.0 + i as f64 * 0.1, 100.1 + i as f64 * 0.1, 99.9 + i as f64 * 0.1, 100.0 + i as f64 * 0.1, 10.0))
            .collect();
        let mut results = AdapterResults::default();
        results.candles = Some(CandleWindow { candles });
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        assert!(fv.price_change_pct() < 2.0);
        assert_eq!(classify_regime(&fv), Regime::Sideways);
    }

    #[test]
    fn bull_table_never_lowers_scored_categories() {
        let m = base_table(Regime::Bull);
        // §8 weight-manager composition property.
        assert!(m.news >= 1.0);
        assert!(m.price >= 1.0);
        assert!(m.sentiment >= 1.0);
        assert!(m.ai >= 1.0);
    }

    #[test]
    fn bear_table_favors_macro_and_risk() {
        let m = base_table(Regime::Bear);
        assert!(m.macro_ > 1.0);
        assert!(m.risk > 1.0);
    }

    #[test]
    fn sideways_table_favors_price_and_orderbook() {
        let m = base_table(Regime::Sideways);
        assert!(m.price > 1.0);
        assert!(m.orderbook > 1.0);
    }

    #[test]
    fn high_vix_boosts_risk_and_macro() {
        let config = PipelineConfig {
            feature_vector_length: crate::config::FeatureVectorLength::Extended35,
            ..PipelineConfig::default()
        };
        let mut results = AdapterResults::default();
        results.macro_data = Some(crate::features::MacroReading {
            dxy_pct: 0.0,
            sp500_pct: 0.0,
            vix: 40.0,
            risk_appetite: None,
        });
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        let base = base_table(classify_regime(&fv));
        let m = dynamic_multipliers(&fv, &config);
        assert!(m.risk > base.risk);
        assert!(m.macro_ > base.macro_);
    }

    #[test]
    fn high_imbalance_dampens_orderbook() {
        let config = PipelineConfig {
            feature_vector_length: crate::config::FeatureVectorLength::Extended35,
            ..PipelineConfig::default()
        };
        let mut results = AdapterResults::default();
        results.orderbook = Some(crate::features::OrderBookSnapshot {
            imbalance: 0.9,
            support_strength: 50.0,
            resistance_strength: 50.0,
        });
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        let base = base_table(classify_regime(&fv));
        let m = dynamic_multipliers(&fv, &config);
        assert!(m.orderbook < base.orderbook);
    }

    #[test]
    fn category_get_covers_every_variant() {
        assert_eq!(NEUTRAL.get(Category::Orderbook), 1.0);
        assert_eq!(NEUTRAL.get(Category::Risk), 1.0);
        assert_eq!(NEUTRAL.get(Category::Macro), 1.0);
        assert_eq!(NEUTRAL.get(Category::Futures), 1.0);
    }
}

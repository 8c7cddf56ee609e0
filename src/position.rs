//! Position sizing and target planning (§4.5).

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::FeatureVector;
use crate::types::{AccountState, Side};

/// The 2.3 risk-reward ratio is a structural constant of the fixed
/// 1.5R/2.5R/4.0R ladder at 50/30/20 size fractions (§4.5, GLOSSARY):
/// `0.5*1.5 + 0.3*2.5 + 0.2*4.0 = 2.3`.
pub const RISK_REWARD_RATIO: f64 = 2.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitTier {
    pub price: f64,
    pub close_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPlan {
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profits: [TakeProfitTier; 3],
    pub size_base: f64,
    pub size_quote: f64,
    pub margin: f64,
    pub leverage: u32,
    pub risk_amount: f64,
    pub max_loss: f64,
    pub expected_profit: f64,
    pub risk_reward_ratio: f64,
    /// The risk fraction of balance actually taken on, after any
    /// notional-cap scale-down (§4.5: "report the effective risk_percent").
    /// Equal to `config`'s `risk_percent` unless the cap bound.
    pub effective_risk_percent: f64,
}

/// Picks the stop-loss percentage (§4.5): an explicit config override wins;
/// otherwise it is banded off realised volatility.
fn resolve_stop_loss_pct(features: &FeatureVector, config: &PipelineConfig) -> f64 {
    if let Some(pct) = config.stop_loss_pct {
        return pct;
    }
    let vol = features.volatility();
    if vol < 0.01 {
        0.015
    } else if vol < 0.02 {
        0.020
    } else if vol < 0.03 {
        0.025
    } else {
        0.030
    }
}

/// Builds the three-tier take-profit ladder at 1.5R/2.5R/4.0R from entry,
/// with the fixed 50/30/20 close-fraction split (§4.5).
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

/// Turns a LONG/SHORT action into a fully-sized [`PositionPlan`] (§4.5).
/// Caller must not invoke this for a HOLD action.
///
/// Invalid inputs (non-positive entry price/leverage/balance, degenerate
/// stop distance) return [`PipelineError::PlannerFailed`]; the pipeline
/// downgrades this to a HOLD decision rather than propagating a hard
/// failure (§7).
pub fn plan_position(side: Side, features: &FeatureVector, account: &AccountState, config: &PipelineConfig) -> Result<PositionPlan> {
    let entry_price = features.current_price();
    if entry_price <= 0.0 {
        return Err(PipelineError::PlannerFailed(format!(
            "non-positive entry price: {entry_price}"
        )));
    }
    if account.leverage == 0 {
        return Err(PipelineError::PlannerFailed("non-positive leverage".into()));
    }
    if account.balance <= 0.0 {
        return Err(PipelineError::PlannerFailed("non-positive balance".into()));
    }

    let stop_pct = resolve_stop_loss_pct(features, config);
    let stop_distance = entry_price * stop_pct;
    if stop_distance <= 0.0 {
        return Err(PipelineError::PlannerFailed("degenerate stop distance".into()));
    }

    let stop_loss = match side {
        Side::Long => entry_price - stop_distance,
        Side::Short => entry_price + stop_distance,
    };

    let risk_amount = account.balance * account.risk_percent;
    let mut size_base = risk_amount / stop_distance;
    let mut effective_risk_percent = account.risk_percent;

    // Cap notional exposure at max_position_fraction * leverage of balance
    // (§4.5). If the cap binds, scale size down and report the actual
    // (lower) effective risk fraction.
    let max_notional = account.balance * config.max_position_fraction * account.leverage as f64;
    let mut size_quote = size_base * entry_price;
    if size_quote > max_notional {
        size_base = max_notional / entry_price;
        size_quote = max_notional;
        let effective_risk_amount = size_base * stop_distance;
        effective_risk_percent = effective_risk_amount / account.balance;
    }

    let effective_risk_amount = size_base * stop_distance;
    let margin = size_quote / account.leverage as f64;
    let take_profits = take_profit_ladder(side, entry_price, stop_distance);
    let expected_profit = effective_risk_amount * RISK_REWARD_RATIO;

    Ok(PositionPlan {
        side,
        entry_price,
        stop_loss,
        take_profits,
        size_base,
        size_quote,
        margin,
        leverage: account.leverage,
        risk_amount: effective_risk_amount,
        max_loss: -effective_risk_amount,
        expected_profit,
        risk_reward_ratio: RISK_REWARD_RATIO,
        effective_risk_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_feature_vector, AdapterResults, CandleWindow};
    use crate::types::Candle;
    use chrono::Utc;

    fn account() -> AccountState {
        AccountState {
            balance: 10_000.0,
            open_positions: 0,
            leverage: 10,
            risk_percent: 0.015,
        }
    }

    fn features_with_price(price: f64) -> FeatureVector {
        let config = PipelineConfig::default();
        let candles = vec![Candle::new(0, price, price, price, price, 1.0)];
        let mut results = AdapterResults::default();
        results.candles = Some(CandleWindow { candles });
        let (fv, _) = build_feature_vector(&results, "BTCUSDT", Utc::now(), &config);
        fv
    }

    #[test]
    fn long_stop_is_below_entry_and_tps_ascend() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let plan = plan_position(Side::Long, &fv, &account(), &config).unwrap();
        assert!(plan.stop_loss < plan.entry_price);
        assert!(plan.entry_price < plan.take_profits[0].price);
        assert!(plan.take_profits[0].price < plan.take_profits[1].price);
        assert!(plan.take_profits[1].price < plan.take_profits[2].price);
        let total_fraction: f64 = plan.take_profits.iter().map(|t| t.close_fraction).sum();
        assert!((total_fraction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn short_stop_is_above_entry_and_tps_descend() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let plan = plan_position(Side::Short, &fv, &account(), &config).unwrap();
        assert!(plan.stop_loss > plan.entry_price);
        assert!(plan.entry_price > plan.take_profits[0].price);
        assert!(plan.take_profits[0].price > plan.take_profits[1].price);
        assert!(plan.take_profits[1].price > plan.take_profits[2].price);
    }

    #[test]
    fn zero_price_fails_planning() {
        let config = PipelineConfig::default();
        let fv = features_with_price(0.0);
        let err = plan_position(Side::Long, &fv, &account(), &config).unwrap_err();
        assert!(matches!(err, PipelineError::PlannerFailed(_)));
    }

    #[test]
    fn zero_leverage_fails_planning() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let mut acct = account();
        acct.leverage = 0;
        let err = plan_position(Side::Long, &fv, &acct, &config).unwrap_err();
        assert!(matches!(err, PipelineError::PlannerFailed(_)));
    }

    #[test]
    fn notional_is_capped_at_max_position_fraction() {
        let mut config = PipelineConfig::default();
        config.max_position_fraction = 0.01; // force the cap to bind
        let fv = features_with_price(100.0);
        let acct = account();
        let plan = plan_position(Side::Long, &fv, &acct, &config).unwrap();
        let max_notional = acct.balance * config.max_position_fraction * acct.leverage as f64;
        assert!(plan.size_quote <= max_notional + 1e-6);
        assert!(plan.effective_risk_percent < acct.risk_percent);
    }

    #[test]
    fn risk_invariant_on_stop_loss_fill() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let acct = account();
        let plan = plan_position(Side::Long, &fv, &acct, &config).unwrap();
        let epsilon = 1e-6 * acct.balance;
        // §8 risk invariant: realised PnL on a stop fill equals -risk_amount.
        assert!((plan.max_loss - (-plan.risk_amount)).abs() < epsilon);
        assert!((plan.risk_amount - acct.balance * acct.risk_percent).abs() < epsilon);
    }

    #[test]
    fn expected_profit_matches_2_3_risk_reward() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let acct = account();
        let plan = plan_position(Side::Long, &fv, &acct, &config).unwrap();
        assert_eq!(plan.risk_reward_ratio, 2.3);
        assert!((plan.expected_profit - plan.risk_amount * 2.3).abs() < 1e-9);
    }

    #[test]
    fn margin_matches_leverage_formula() {
        let config = PipelineConfig::default();
        let fv = features_with_price(100.0);
        let acct = account();
        let plan = plan_position(Side::Long, &fv, &acct, &config).unwrap();
        let expected_margin = plan.size_quote / acct.leverage as f64;
        assert!((plan.margin - expected_margin).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_pct_bands_follow_volatility() {
        // Directly exercises the volatility -> stop-pct banding of §4.5.
        let config = PipelineConfig::default();
        let low_vol = features_with_price(100.0); // flat candle -> vol 0.0
        assert_eq!(resolve_stop_loss_pct(&low_vol, &config), 0.015);
    }
}

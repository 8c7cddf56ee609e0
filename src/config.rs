use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::weights::Category;

/// Score thresholds the conservative decision stage consults (§4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub buy_score: f64,
    pub sell_score: f64,
    pub min_consistency: f64,
    pub fear_greed_long_ceiling: f64,
    pub fear_greed_short_floor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            buy_score: 75.0,
            sell_score: 25.0,
            min_consistency: 0.80,
            fear_greed_long_ceiling: 70.0,
            fear_greed_short_floor: 30.0,
        }
    }
}

/// Safety gate thresholds (§4.4.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyGateConfig {
    pub eth_gas_gate: f64,
    pub btc_fee_gate: f64,
    pub min_news_count: f64,
    pub fear_greed_low: f64,
    pub fear_greed_high: f64,
    pub max_volatility: f64,
    pub max_open_positions: u32,
    pub min_balance: f64,
}

impl Default for SafetyGateConfig {
    fn default() -> Self {
        Self {
            eth_gas_gate: 30.0,
            btc_fee_gate: 15.0,
            min_news_count: 8.0,
            fear_greed_low: 25.0,
            fear_greed_high: 75.0,
            max_volatility: 0.04,
            max_open_positions: 3,
            min_balance: 100.0,
        }
    }
}

/// Per-family deadlines for source adapters (§4.1, §5), in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterDeadlines {
    pub candles: u64,
    pub orderbook: u64,
    pub gas: u64,
    pub news: u64,
    pub sentiment: u64,
    pub macro_data: u64,
    pub futures: u64,
    pub prediction_market: u64,
    pub ai_predictors: u64,
}

impl Default for AdapterDeadlines {
    fn default() -> Self {
        Self {
            candles: 10,
            orderbook: 10,
            gas: 10,
            news: 10,
            sentiment: 10,
            macro_data: 10,
            futures: 10,
            prediction_market: 10,
            ai_predictors: 10,
        }
    }
}

/// Feature vector length a deployment has chosen to advertise (§3 Open
/// Question: two lengths exist upstream; a deployment picks one).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeatureVectorLength {
    Core26,
    Extended35,
}

impl FeatureVectorLength {
    pub fn len(self) -> usize {
        match self {
            FeatureVectorLength::Core26 => 26,
            FeatureVectorLength::Extended35 => 35,
        }
    }
}

/// Category base weights for the weighted signal engine (§4.4.2). Must sum
/// to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryWeights {
    pub news: f64,
    pub price: f64,
    pub sentiment: f64,
    pub ai: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            news: 0.30,
            price: 0.25,
            sentiment: 0.25,
            ai: 0.20,
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::News => self.news,
            Category::Price => self.price,
            Category::Sentiment => self.sentiment,
            Category::Ai => self.ai,
            // Categories outside the four scored dimensions have no base
            // weight in the weighted sum; they only ever act as dynamic
            // multipliers on the four above (§4.4.2).
            _ => 0.0,
        }
    }
}

/// The explicit, fully-enumerated configuration record replacing the
/// unstructured "property bag" pattern the source relied on (§9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub risk_percent: f64,
    pub leverage: u32,
    pub max_position_fraction: f64,
    pub stop_loss_pct: Option<f64>,
    pub candle_window: usize,
    pub adapter_deadlines: AdapterDeadlines,
    pub thresholds: Thresholds,
    pub weights: CategoryWeights,
    pub safety_gate: SafetyGateConfig,
    pub feature_vector_length: FeatureVectorLength,
    pub allow_ai_override: bool,
    pub debug_payloads: bool,
    pub whole_request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            risk_percent: 0.015,
            leverage: 10,
            max_position_fraction: 0.15,
            stop_loss_pct: None,
            candle_window: 24,
            adapter_deadlines: AdapterDeadlines::default(),
            thresholds: Thresholds::default(),
            weights: CategoryWeights::default(),
            safety_gate: SafetyGateConfig::default(),
            feature_vector_length: FeatureVectorLength::Core26,
            allow_ai_override: false,
            debug_payloads: false,
            whole_request_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_backoff_ms: 200,
        }
    }
}

impl PipelineConfig {
    /// Layer a `config.toml` file on top of the defaults. Missing file is
    /// not an error — it simply means "use built-in defaults + env + CLI".
    pub fn load_with_overrides(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path
            && path.exists()
        {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::InvalidInput(format!("cannot read config file: {e}"))
            })?;
            config = toml::from_str(&raw)
                .map_err(|e| PipelineError::InvalidInput(format!("invalid config.toml: {e}")))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.news + self.weights.price + self.weights.sentiment + self.weights.ai;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::InvalidInput(format!(
                "category weights must sum to 1.0, got {sum}"
            )));
        }
        if self.risk_percent <= 0.0 || self.risk_percent >= 1.0 {
            return Err(PipelineError::InvalidInput(
                "risk_percent must be in (0, 1)".into(),
            ));
        }
        if self.leverage == 0 {
            return Err(PipelineError::InvalidInput("leverage must be >= 1".into()));
        }
        Ok(())
    }
}

/// Reads `<SOURCE>_API_KEY` for the given family; returns `None` (adapter
/// disabled, never a hard failure) when unset, matching §6's environment
/// contract.
pub fn adapter_api_key(source_name: &str) -> Option<String> {
    std::env::var(format!("{}_API_KEY", source_name.to_uppercase())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_weights_fail_validation() {
        let mut config = PipelineConfig::default();
        config.weights.news = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = PipelineConfig::load_with_overrides(None).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn missing_api_key_returns_none() {
        assert!(adapter_api_key("DEFINITELY_NOT_SET_XYZ").is_none());
    }
}

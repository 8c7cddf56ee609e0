//! Prediction-market adapter (§4.1): crypto-relevant market odds from a
//! Polymarket-style public CLOB API. Informational only — no module
//! currently folds this into the scored feature set, but the raw readings
//! are carried in [`crate::features::FeatureMetadata::raw_payloads`] when
//! `debug_payloads` is enabled.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::{PredictionMarketEntry, PredictionMarketReading};

const BASE_URL: &str = "https://clob.polymarket.com/markets";

pub struct PredictionMarketAdapter {
    client: Client,
}

impl PredictionMarketAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, symbol: &str, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<PredictionMarketReading> {
        super::with_retry(
            config,
            "prediction_market",
            config.adapter_deadlines.prediction_market,
            || async { self.fetch_once(symbol).await },
        )
        .await
    }

    async fn fetch_once(&self, symbol: &str) -> Result<PredictionMarketReading> {
        let resp = self.client.get(BASE_URL).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "prediction_market".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "prediction_market".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let base_asset = symbol.trim_end_matches("USDT").to_lowercase();
        let markets: Vec<PredictionMarketEntry> = body["data"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .filter(|m| {
                m.get("question")
                    .and_then(|q| q.as_str())
                    .map(|q| q.to_lowercase().contains(&base_asset))
                    .unwrap_or(false)
            })
            .filter_map(|m| {
                Some(PredictionMarketEntry {
                    question: m.get("question")?.as_str()?.to_string(),
                    yes_price: m.get("lastTradePrice").and_then(|p| p.as_f64()).unwrap_or(0.5),
                })
            })
            .collect();

        if markets.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                source_name: "prediction_market".into(),
                reason: format!("no markets referencing {base_asset}"),
            });
        }

        let composite_score = (markets.iter().map(|m| m.yes_price).sum::<f64>() / markets.len() as f64 - 0.5) * 200.0;

        Ok(PredictionMarketReading {
            markets,
            composite_score,
        })
    }
}

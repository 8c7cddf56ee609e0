//! Candle/OHLCV adapter (§4.1): perpetual futures klines from a Binance-style
//! market-data endpoint.

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::CandleWindow;
use crate::types::{candles_are_monotonic, Candle};

const BASE_URL: &str = "https://fapi.binance.com/fapi/v1/klines";

pub struct CandlesAdapter {
    client: Client,
}

impl CandlesAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, symbol: &str, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<CandleWindow> {
        super::with_retry(config, "candles", config.adapter_deadlines.candles, || async {
            self.fetch_once(symbol, config.candle_window).await
        })
        .await
    }

    async fn fetch_once(&self, symbol: &str, window: usize) -> Result<CandleWindow> {
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            &[
                ("symbol", symbol.to_string()),
                ("interval", "1h".to_string()),
                ("limit", window.to_string()),
            ],
        )
        .map_err(|e| PipelineError::InvalidInput(format!("bad symbol for candles: {e}")))?;

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "candles".into(),
            reason: e.to_string(),
        })?;

        if !resp.status().is_success() {
            return Err(PipelineError::SourceUnavailable {
                source_name: "candles".into(),
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let raw: Vec<Vec<serde_json::Value>> = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "candles".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let candles = raw
            .into_iter()
            .filter_map(|row| {
                let open_ts = row.first()?.as_i64()? / 1000;
                let open = row.get(1)?.as_str()?.parse::<f64>().ok()?;
                let high = row.get(2)?.as_str()?.parse::<f64>().ok()?;
                let low = row.get(3)?.as_str()?.parse::<f64>().ok()?;
                let close = row.get(4)?.as_str()?.parse::<f64>().ok()?;
                let volume = row.get(5)?.as_str()?.parse::<f64>().ok()?;
                Some(Candle::new(open_ts, open, high, low, close, volume))
            })
            .collect::<Vec<_>>();

        if candles.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                source_name: "candles".into(),
                reason: "empty candle response".into(),
            });
        }

        // §4.1: candles must never be non-monotonic; treat a source that
        // violates this as unavailable rather than feeding a corrupt window
        // downstream.
        if !candles_are_monotonic(&candles) {
            return Err(PipelineError::SourceUnavailable {
                source_name: "candles".into(),
                reason: "non-monotonic candle timestamps".into(),
            });
        }

        info!(count = candles.len(), "fetched candle window");
        Ok(CandleWindow { candles })
    }
}

//! Order book depth adapter (§4.1): top-of-book imbalance from a futures
//! depth snapshot. Only consulted under the 35-index extended layout.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::OrderBookSnapshot;

const BASE_URL: &str = "https://fapi.binance.com/fapi/v1/depth";

pub struct OrderbookAdapter {
    client: Client,
}

impl OrderbookAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, symbol: &str, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<OrderBookSnapshot> {
        super::with_retry(config, "orderbook", config.adapter_deadlines.orderbook, || async {
            self.fetch_once(symbol).await
        })
        .await
    }

    async fn fetch_once(&self, symbol: &str) -> Result<OrderBookSnapshot> {
        let url = reqwest::Url::parse_with_params(BASE_URL, &[("symbol", symbol), ("limit", "20")])
            .map_err(|e| PipelineError::InvalidInput(format!("bad symbol for orderbook: {e}")))?;

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "orderbook".into(),
            reason: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(PipelineError::SourceUnavailable {
                source_name: "orderbook".into(),
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "orderbook".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let sum_qty = |levels: &serde_json::Value| -> f64 {
            levels
                .as_array()
                .map(|rows| {
                    rows.iter()
                        .filter_map(|r| r.get(1).and_then(|q| q.as_str()).and_then(|s| s.parse::<f64>().ok()))
                        .sum()
                })
                .unwrap_or(0.0)
        };

        let bid_qty = sum_qty(body.get("bids").unwrap_or(&serde_json::Value::Null));
        let ask_qty = sum_qty(body.get("asks").unwrap_or(&serde_json::Value::Null));
        let total = bid_qty + ask_qty;

        if total <= 0.0 {
            return Err(PipelineError::SourceUnavailable {
                source_name: "orderbook".into(),
                reason: "empty depth snapshot".into(),
            });
        }

        let imbalance = (bid_qty - ask_qty) / total;
        let support_strength = (bid_qty / total * 100.0).clamp(0.0, 100.0);
        let resistance_strength = (ask_qty / total * 100.0).clamp(0.0, 100.0);

        Ok(OrderBookSnapshot {
            imbalance,
            support_strength,
            resistance_strength,
        })
    }
}

//! Network fee adapter (§4.1): Ethereum gas price and Bitcoin fee-rate
//! readings that feed the safety gate's tradeability checks.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::GasReading;

const ETH_GAS_URL: &str = "https://api.etherscan.io/api";
const BTC_FEE_URL: &str = "https://mempool.space/api/v1/fees/recommended";

pub struct GasAdapter {
    client: Client,
}

impl GasAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<GasReading> {
        super::with_retry(config, "gas", config.adapter_deadlines.gas, || self.fetch_once()).await
    }

    async fn fetch_once(&self) -> Result<GasReading> {
        let eth_gwei = self.fetch_eth_gwei().await?;
        let btc_sat_vb = self.fetch_btc_sat_vb().await?;
        Ok(GasReading { eth_gwei, btc_sat_vb })
    }

    async fn fetch_eth_gwei(&self) -> Result<f64> {
        let mut url = reqwest::Url::parse(ETH_GAS_URL).unwrap();
        url.query_pairs_mut().append_pair("module", "gastracker").append_pair("action", "gasoracle");
        if let Some(key) = crate::config::adapter_api_key("etherscan") {
            url.query_pairs_mut().append_pair("apikey", &key);
        }

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "gas".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "gas".into(),
            reason: format!("decode failure: {e}"),
        })?;

        body["result"]["ProposeGasPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| PipelineError::SourceUnavailable {
                source_name: "gas".into(),
                reason: "missing ProposeGasPrice".into(),
            })
    }

    async fn fetch_btc_sat_vb(&self) -> Result<f64> {
        let resp = self.client.get(BTC_FEE_URL).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "gas".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "gas".into(),
            reason: format!("decode failure: {e}"),
        })?;

        body["halfHourFee"].as_f64().ok_or_else(|| PipelineError::SourceUnavailable {
            source_name: "gas".into(),
            reason: "missing halfHourFee".into(),
        })
    }
}

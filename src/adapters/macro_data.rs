//! Macro-economic backdrop adapter (§4.1): USD strength, equities and the
//! VIX. Only consulted under the 35-index extended layout. Requires a FRED
//! API key (`FRED_API_KEY`); absent a key, this source is simply
//! unavailable for the request — not a hard failure.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::MacroReading;

const SERIES_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

pub struct MacroAdapter {
    client: Client,
}

impl MacroAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<MacroReading> {
        super::with_retry(config, "macro_data", config.adapter_deadlines.macro_data, || self.fetch_once()).await
    }

    async fn fetch_once(&self) -> Result<MacroReading> {
        let api_key = crate::config::adapter_api_key("fred").ok_or_else(|| PipelineError::SourceUnavailable {
            source_name: "macro_data".into(),
            reason: "FRED_API_KEY not set".into(),
        })?;

        let dxy_pct = self.fetch_pct_change(&api_key, "DTWEXBGS").await?;
        let sp500_pct = self.fetch_pct_change(&api_key, "SP500").await?;
        let vix = self.fetch_latest(&api_key, "VIXCLS").await?;

        Ok(MacroReading {
            dxy_pct,
            sp500_pct,
            vix,
            risk_appetite: None,
        })
    }

    async fn fetch_series(&self, api_key: &str, series_id: &str) -> Result<Vec<f64>> {
        let url = reqwest::Url::parse_with_params(
            SERIES_URL,
            &[
                ("series_id", series_id),
                ("api_key", api_key),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", "2"),
            ],
        )
        .unwrap();

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "macro_data".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "macro_data".into(),
            reason: format!("decode failure: {e}"),
        })?;

        Ok(body["observations"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .filter_map(|o| o["value"].as_str().and_then(|s| s.parse::<f64>().ok()))
            .collect())
    }

    async fn fetch_pct_change(&self, api_key: &str, series_id: &str) -> Result<f64> {
        let values = self.fetch_series(api_key, series_id).await?;
        match values.as_slice() {
            [latest, prior, ..] if *prior != 0.0 => Ok((latest - prior) / prior * 100.0),
            _ => Err(PipelineError::SourceUnavailable {
                source_name: "macro_data".into(),
                reason: format!("insufficient {series_id} history"),
            }),
        }
    }

    async fn fetch_latest(&self, api_key: &str, series_id: &str) -> Result<f64> {
        let values = self.fetch_series(api_key, series_id).await?;
        values.first().copied().ok_or_else(|| PipelineError::SourceUnavailable {
            source_name: "macro_data".into(),
            reason: format!("missing {series_id} value"),
        })
    }
}

//! Market sentiment adapter (§4.1): the Fear & Greed index plus a composite
//! derived from its recent trend.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::SentimentReading;

const BASE_URL: &str = "https://api.alternative.me/fng/";

pub struct SentimentAdapter {
    client: Client,
}

impl SentimentAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<SentimentReading> {
        super::with_retry(config, "sentiment", config.adapter_deadlines.sentiment, || self.fetch_once()).await
    }

    async fn fetch_once(&self) -> Result<SentimentReading> {
        let url = reqwest::Url::parse_with_params(BASE_URL, &[("limit", "2"), ("format", "json")]).unwrap();

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "sentiment".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "sentiment".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let data = body["data"].as_array().cloned().unwrap_or_default();
        let latest = data.first().and_then(|d| d["value"].as_str()).and_then(|s| s.parse::<f64>().ok());
        let prior = data.get(1).and_then(|d| d["value"].as_str()).and_then(|s| s.parse::<f64>().ok());

        let fear_greed = latest.ok_or_else(|| PipelineError::SourceUnavailable {
            source_name: "sentiment".into(),
            reason: "missing fear/greed value".into(),
        })?;

        let composite = match prior {
            Some(p) => (fear_greed - p).clamp(-100.0, 100.0),
            None => 0.0,
        };
        let label = if fear_greed > 55.0 {
            1
        } else if fear_greed < 45.0 {
            -1
        } else {
            0
        };

        Ok(SentimentReading {
            fear_greed,
            label,
            composite,
        })
    }
}

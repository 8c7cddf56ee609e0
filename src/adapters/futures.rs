//! Perpetual futures market-structure adapter (§4.1): open-interest change
//! and funding-rate trend. Only consulted under the 35-index extended
//! layout.

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::FuturesReading;

const OI_URL: &str = "https://fapi.binance.com/futures/data/openInterestHist";
const FUNDING_URL: &str = "https://fapi.binance.com/fapi/v1/fundingRate";

pub struct FuturesAdapter {
    client: Client,
}

impl FuturesAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, symbol: &str, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<FuturesReading> {
        super::with_retry(config, "futures", config.adapter_deadlines.futures, || async {
            self.fetch_once(symbol).await
        })
        .await
    }

    async fn fetch_once(&self, symbol: &str) -> Result<FuturesReading> {
        let oi_change_pct = self.fetch_oi_change(symbol).await?;
        let funding_trend = self.fetch_funding_trend(symbol).await?;
        Ok(FuturesReading {
            oi_change_pct,
            funding_trend,
        })
    }

    async fn fetch_oi_change(&self, symbol: &str) -> Result<f64> {
        let url = reqwest::Url::parse_with_params(
            OI_URL,
            &[("symbol", symbol), ("period", "1h"), ("limit", "2")],
        )
        .map_err(|e| PipelineError::InvalidInput(format!("bad symbol for futures: {e}")))?;

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "futures".into(),
            reason: e.to_string(),
        })?;
        let body: Vec<serde_json::Value> = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "futures".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let values: Vec<f64> = body
            .iter()
            .filter_map(|v| v.get("sumOpenInterest").and_then(|s| s.as_str()).and_then(|s| s.parse::<f64>().ok()))
            .collect();

        match values.as_slice() {
            [.., prior, latest] if *prior != 0.0 => Ok((latest - prior) / prior * 100.0),
            _ => Err(PipelineError::SourceUnavailable {
                source_name: "futures".into(),
                reason: "insufficient open-interest history".into(),
            }),
        }
    }

    async fn fetch_funding_trend(&self, symbol: &str) -> Result<f64> {
        let url = reqwest::Url::parse_with_params(FUNDING_URL, &[("symbol", symbol), ("limit", "8")])
            .map_err(|e| PipelineError::InvalidInput(format!("bad symbol for futures: {e}")))?;

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "futures".into(),
            reason: e.to_string(),
        })?;
        let body: Vec<serde_json::Value> = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "futures".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let rates: Vec<f64> = body
            .iter()
            .filter_map(|v| v.get("fundingRate").and_then(|s| s.as_str()).and_then(|s| s.parse::<f64>().ok()))
            .collect();

        if rates.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                source_name: "futures".into(),
                reason: "no funding rate history".into(),
            });
        }

        Ok(funding_trend_from_rates(&rates))
    }
}

/// GLOSSARY "funding trend": a signed, clipped count of consecutive
/// same-sign funding payments in the recent window, normalised to
/// `[-1, 1]` by dividing by the window length. Counts back from the most
/// recent rate; a zero-rate breaks the streak.
fn funding_trend_from_rates(rates: &[f64]) -> f64 {
    let mut streak = 0i32;
    let mut sign = 0.0_f64;
    for &rate in rates.iter().rev() {
        let s = rate.signum();
        if s == 0.0 {
            break;
        }
        if sign == 0.0 {
            sign = s;
            streak = 1;
        } else if s == sign {
            streak += 1;
        } else {
            break;
        }
    }
    (sign * streak as f64 / rates.len() as f64).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_positive_rates_give_trend_of_one() {
        let rates = vec![0.0001, 0.0002, 0.0001, 0.0003];
        assert_eq!(funding_trend_from_rates(&rates), 1.0);
    }

    #[test]
    fn mixed_sign_rates_count_only_the_trailing_streak() {
        let rates = vec![-0.0001, -0.0002, 0.0001, 0.0002];
        // trailing streak of 2 positive out of 4 -> 0.5
        assert_eq!(funding_trend_from_rates(&rates), 0.5);
    }

    #[test]
    fn all_negative_rates_give_trend_of_negative_one() {
        let rates = vec![-0.0001, -0.0002, -0.0001, -0.0003];
        assert_eq!(funding_trend_from_rates(&rates), -1.0);
    }
}

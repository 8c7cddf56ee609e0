//! News digest adapter (§4.1): recent headlines scored by a keyword
//! heuristic (no LLM dependency — the AI layer is a separate, explicitly
//! advisory concern, see [`crate::substrategies`]).

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::{NewsDigest, NewsItem};

const BASE_URL: &str = "https://cryptopanic.com/api/v1/posts/";

const POSITIVE_WORDS: &[&str] = &["surge", "rally", "bullish", "soar", "breakout", "adoption", "partnership", "upgrade"];
const NEGATIVE_WORDS: &[&str] = &["crash", "plunge", "bearish", "hack", "exploit", "lawsuit", "ban", "delist"];

pub struct NewsAdapter {
    client: Client,
}

impl NewsAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, symbol: &str, _now: DateTime<Utc>, config: &PipelineConfig) -> Result<NewsDigest> {
        super::with_retry(config, "news", config.adapter_deadlines.news, || async {
            self.fetch_once(symbol).await
        })
        .await
    }

    async fn fetch_once(&self, symbol: &str) -> Result<NewsDigest> {
        let api_key = crate::config::adapter_api_key("cryptopanic").ok_or_else(|| PipelineError::SourceUnavailable {
            source_name: "news".into(),
            reason: "CRYPTOPANIC_API_KEY not set".into(),
        })?;

        let currency = symbol.trim_end_matches("USDT").to_string();
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            &[("auth_token", api_key), ("currencies", currency), ("public", "true".to_string())],
        )
        .map_err(|e| PipelineError::InvalidInput(format!("bad symbol for news: {e}")))?;

        let resp = self.client.get(url).send().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "news".into(),
            reason: e.to_string(),
        })?;
        let body: serde_json::Value = resp.json().await.map_err(|e| PipelineError::SourceUnavailable {
            source_name: "news".into(),
            reason: format!("decode failure: {e}"),
        })?;

        let results = body["results"].as_array().cloned().unwrap_or_default();
        let items: Vec<NewsItem> = results
            .iter()
            .filter_map(|r| {
                Some(NewsItem {
                    title: r.get("title")?.as_str()?.to_string(),
                    summary: r.get("title")?.as_str()?.to_string(),
                    published_at: r.get("published_at").and_then(|s| s.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()).unwrap_or_else(Utc::now),
                    source: r.get("source").and_then(|s| s.get("title")).and_then(|s| s.as_str()).unwrap_or("unknown").to_string(),
                    language: "en".to_string(),
                })
            })
            .collect();

        let currency = symbol.trim_end_matches("USDT").to_lowercase();
        let items = filter_and_dedupe(items, &currency);

        Ok(score_items(items))
    }
}

/// Title-prefix dedup plus keyword relevance filtering (§4.1 "Adapter
/// deduplicates by title prefix (case-insensitive) and filters out items
/// not matching any keyword in the configured keyword set"). The keyword
/// set here is the instrument's base currency plus the generic crypto
/// terms the sentiment scorer already watches for.
fn filter_and_dedupe(items: Vec<NewsItem>, currency: &str) -> Vec<NewsItem> {
    const DEDUPE_PREFIX_LEN: usize = 40;

    let mut keywords: Vec<String> = POSITIVE_WORDS.iter().chain(NEGATIVE_WORDS.iter()).map(|w| w.to_string()).collect();
    keywords.push(currency.to_string());

    let mut seen_prefixes = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let lower = item.title.to_lowercase();
            let prefix: String = lower.chars().take(DEDUPE_PREFIX_LEN).collect();
            if !seen_prefixes.insert(prefix) {
                return false;
            }
            keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .collect()
}

fn score_items(items: Vec<NewsItem>) -> NewsDigest {
    let count = items.len() as f64;
    if items.is_empty() {
        return NewsDigest {
            score: 0.0,
            pos_ratio: 0.0,
            neg_ratio: 0.0,
            count: 0.0,
            items,
        };
    }

    let mut pos = 0usize;
    let mut neg = 0usize;
    for item in &items {
        let text = item.title.to_lowercase();
        let is_pos = POSITIVE_WORDS.iter().any(|w| text.contains(w));
        let is_neg = NEGATIVE_WORDS.iter().any(|w| text.contains(w));
        if is_pos && !is_neg {
            pos += 1;
        } else if is_neg && !is_pos {
            neg += 1;
        }
    }

    let pos_ratio = pos as f64 / count;
    let neg_ratio = neg as f64 / count;
    let score = (pos_ratio - neg_ratio) * 100.0;

    NewsDigest {
        score,
        pos_ratio,
        neg_ratio,
        count,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_headlines_score_positive() {
        let items = vec![
            NewsItem {
                title: "Bitcoin rally continues as adoption grows".into(),
                summary: String::new(),
                published_at: Utc::now(),
                source: "test".into(),
                language: "en".into(),
            },
            NewsItem {
                title: "Exchange announces new partnership".into(),
                summary: String::new(),
                published_at: Utc::now(),
                source: "test".into(),
                language: "en".into(),
            },
        ];
        let digest = score_items(items);
        assert!(digest.score > 0.0);
        assert_eq!(digest.count, 2.0);
    }

    #[test]
    fn empty_items_score_neutral() {
        let digest = score_items(vec![]);
        assert_eq!(digest.score, 0.0);
        assert_eq!(digest.count, 0.0);
    }
}

//! Orchestration (§4, §5): fans adapter calls out concurrently, assembles
//! the feature vector, runs the decision engine and (for a non-HOLD
//! action) the position planner.

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::ai_predictors::AiPredictorsAdapter;
use crate::adapters::candles::CandlesAdapter;
use crate::adapters::futures::FuturesAdapter;
use crate::adapters::gas::GasAdapter;
use crate::adapters::macro_data::MacroAdapter;
use crate::adapters::news::NewsAdapter;
use crate::adapters::orderbook::OrderbookAdapter;
use crate::adapters::prediction_market::PredictionMarketAdapter;
use crate::adapters::sentiment::SentimentAdapter;
use crate::config::{FeatureVectorLength, PipelineConfig};
use crate::decision::{decide, Decision};
use crate::error::{PipelineError, Result};
use crate::features::{build_feature_vector, validate as validate_features, AdapterResults, FeatureMetadata, FeatureVector};
use crate::position::{plan_position, PositionPlan};
use crate::substrategies::{aggregate_ai_layer, run_all as run_substrategies, AiSuggestion, Signal};
use crate::types::{Action, AccountState};

/// Everything a single `run_pipeline` call produces (§4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub request_id: Uuid,
    pub symbol: String,
    pub decision: Decision,
    pub position_plan: Option<PositionPlan>,
    pub substrategy_signals: Vec<Signal>,
    pub ai_suggestion: AiSuggestion,
    pub metadata: FeatureMetadata,
}

fn build_client() -> Client {
    Client::builder()
        .user_agent("crypto-momentum-ai/0.1 (rust)")
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .expect("static reqwest client configuration is valid")
}

/// Fans every adapter out concurrently, applying the whole-request timeout
/// with explicit cancellation of any adapter still in flight once it
/// expires (§5 "whole-request timeout with cancellation via
/// `JoinHandle::abort`"). Individual adapter failures never abort the
/// request: they are folded into `AdapterResults`'s `None` slots.
async fn gather_adapter_results(symbol: &str, config: &PipelineConfig) -> (AdapterResults, bool) {
    let client = build_client();
    let now = Utc::now();

    let candles_handle = {
        let client = client.clone();
        let symbol = symbol.to_string();
        let config = config.clone();
        tokio::spawn(async move { CandlesAdapter::new(client).fetch(&symbol, now, &config).await })
    };
    let gas_handle = {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move { GasAdapter::new(client).fetch(now, &config).await })
    };
    let news_handle = {
        let client = client.clone();
        let symbol = symbol.to_string();
        let config = config.clone();
        tokio::spawn(async move { NewsAdapter::new(client).fetch(&symbol, now, &config).await })
    };
    let sentiment_handle = {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move { SentimentAdapter::new(client).fetch(now, &config).await })
    };

    let extended = config.feature_vector_length == FeatureVectorLength::Extended35;
    let orderbook_handle = extended.then(|| {
        let client = client.clone();
        let symbol = symbol.to_string();
        let config = config.clone();
        tokio::spawn(async move { OrderbookAdapter::new(client).fetch(&symbol, now, &config).await })
    });
    let macro_handle = extended.then(|| {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move { MacroAdapter::new(client).fetch(now, &config).await })
    });
    let futures_handle = extended.then(|| {
        let client = client.clone();
        let symbol = symbol.to_string();
        let config = config.clone();
        tokio::spawn(async move { FuturesAdapter::new(client).fetch(&symbol, now, &config).await })
    });
    let prediction_market_handle = {
        let client = client.clone();
        let symbol = symbol.to_string();
        let config = config.clone();
        tokio::spawn(async move { PredictionMarketAdapter::new(client).fetch(&symbol, now, &config).await })
    };

    let deadline = std::time::Duration::from_secs(config.whole_request_timeout_secs);
    let budget = tokio::time::Instant::now() + deadline;

    async fn collect<T>(handle: tokio::task::JoinHandle<Result<T>>, budget: tokio::time::Instant, source: &str) -> Option<T> {
        let abort_handle = handle.abort_handle();
        match tokio::time::timeout_at(budget, handle).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                warn!(source, error = %e, "adapter returned an error");
                None
            }
            Ok(Err(join_err)) => {
                warn!(source, error = %join_err, "adapter task panicked");
                None
            }
            Err(_) => {
                // Whole-request deadline exceeded: cancel the still-running
                // adapter task rather than let it keep doing I/O after its
                // result can no longer be used (§5 cancellation contract).
                abort_handle.abort();
                warn!(source, "whole-request deadline exceeded, aborting adapter");
                None
            }
        }
    }

    let candles = collect(candles_handle, budget, "candles").await;
    let gas = collect(gas_handle, budget, "gas").await;
    let news = collect(news_handle, budget, "news").await;
    let sentiment = collect(sentiment_handle, budget, "sentiment").await;
    let orderbook = match orderbook_handle {
        Some(h) => collect(h, budget, "orderbook").await,
        None => None,
    };
    let macro_data = match macro_handle {
        Some(h) => collect(h, budget, "macro_data").await,
        None => None,
    };
    let futures = match futures_handle {
        Some(h) => collect(h, budget, "futures").await,
        None => None,
    };
    let prediction_market = collect(prediction_market_handle, budget, "prediction_market").await;

    // The AI predictor ensemble needs the candle window that was just
    // fetched, so it runs after the fan-out rather than inside it.
    let ai_predictors = match &candles {
        Some(window) => {
            let handle = {
                let window = window.clone();
                let config = config.clone();
                tokio::spawn(async move { AiPredictorsAdapter::new().fetch(&window, now, &config).await })
            };
            collect(handle, budget, "ai_predictors").await
        }
        None => None,
    };

    let deadline_exceeded = tokio::time::Instant::now() >= budget;

    (
        AdapterResults {
            candles,
            orderbook,
            gas,
            news,
            sentiment,
            macro_data,
            futures,
            prediction_market,
            ai_predictors,
        },
        deadline_exceeded,
    )
}

/// Runs the full pipeline for one symbol (§4): adapter fan-out, feature
/// construction, decision, optional position plan. A request_id tags the
/// output so a caller issuing overlapping requests for the same symbol can
/// discard stale responses (§5).
pub async fn run_pipeline(symbol: &str, account: &AccountState, config: &PipelineConfig) -> Result<PipelineOutput> {
    if symbol.trim().is_empty() {
        return Err(PipelineError::InvalidInput("symbol must not be empty".into()));
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, symbol, "pipeline run starting");

    let (results, deadline_exceeded) = gather_adapter_results(symbol, config).await;
    let (features, metadata) = build_feature_vector(&results, symbol, Utc::now(), config);
    // §7 InternalInconsistency: refuse the request outright rather than
    // publish a HOLD that looks like a considered decision.
    validate_features(&features)?;

    let mut decision = decide(&features, account, config);
    if deadline_exceeded {
        // §5/§7 DeadlineExceeded: behaves identically to all-adapters-failed
        // — a HOLD whose safety gate is reported failed with reason
        // "time-out", regardless of what the scores would otherwise say.
        decision.action = Action::Hold;
        decision.confidence = 0.0;
        decision.safety_gate.passed = false;
        decision.safety_gate.reasons.push("time-out: whole-request deadline exceeded".to_string());
        decision.reasons = decision.safety_gate.reasons.clone();
    }

    let substrategy_signals = results.candles.as_ref().map(|w| run_substrategies(&w.candles)).unwrap_or_default();
    let ai_suggestion = aggregate_ai_layer(&results.ai_predictors.clone().unwrap_or_default());

    let final_action = resolve_action(decision.action, &ai_suggestion, config, &features)?;

    let position_plan = match final_action.as_side() {
        Some(side) => match plan_position(side, &features, account, config) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(%request_id, error = %e, "position planning failed, downgrading to HOLD");
                None
            }
        },
        None => None,
    };

    if position_plan.is_none() {
        decision.action = Action::Hold;
    } else {
        decision.action = final_action;
    }

    info!(%request_id, symbol, action = ?decision.action, "pipeline run complete");

    Ok(PipelineOutput {
        request_id,
        symbol: symbol.to_string(),
        decision,
        position_plan,
        substrategy_signals,
        ai_suggestion,
        metadata,
    })
}

/// Applies the AI override rule (§4.6.6, §9 Open Question decision): the AI
/// layer is advisory-only unless `allow_ai_override` is set, in which case
/// a confident, unanimous-enough AI suggestion that disagrees with the
/// gated decision can veto it back to HOLD (the AI layer never flips a
/// HOLD into a trade — only a trade into a HOLD).
fn resolve_action(action: Action, ai_suggestion: &AiSuggestion, config: &PipelineConfig, features: &FeatureVector) -> Result<Action> {
    let _ = features;
    if !config.allow_ai_override || action == Action::Hold {
        return Ok(action);
    }

    if let Some(side) = ai_suggestion.side
        && ai_suggestion.confidence >= 70.0
        && action.as_side() != Some(side)
    {
        return Ok(Action::Hold);
    }

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountState {
        AccountState {
            balance: 10_000.0,
            open_positions: 0,
            leverage: 10,
            risk_percent: 0.015,
        }
    }

    #[test]
    fn ai_override_disabled_never_changes_action() {
        let config = PipelineConfig::default();
        let suggestion = AiSuggestion {
            side: Some(crate::types::Side::Short),
            confidence: 99.0,
        };
        let (fv, _) = crate::features::build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        let action = resolve_action(Action::Long, &suggestion, &config, &fv).unwrap();
        assert_eq!(action, Action::Long);
    }

    #[test]
    fn ai_override_enabled_vetoes_disagreement() {
        let mut config = PipelineConfig::default();
        config.allow_ai_override = true;
        let suggestion = AiSuggestion {
            side: Some(crate::types::Side::Short),
            confidence: 90.0,
        };
        let (fv, _) = crate::features::build_feature_vector(&AdapterResults::default(), "BTCUSDT", Utc::now(), &config);
        let action = resolve_action(Action::Long, &suggestion, &config, &fv).unwrap();
        assert_eq!(action, Action::Hold);
    }

    #[test]
    fn empty_symbol_is_invalid() {
        let config = PipelineConfig::default();
        let result = tokio_test_block_on(run_pipeline("", &account(), &config));
        assert!(result.is_err());
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
    }
}

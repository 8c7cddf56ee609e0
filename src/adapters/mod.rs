//! Source adapters (§4.1): one module per data family, each wrapping an
//! external HTTP call (or, for the AI predictor ensemble, a local
//! computation) behind a uniform retry/deadline contract.

pub mod ai_predictors;
pub mod candles;
pub mod futures;
pub mod gas;
pub mod macro_data;
pub mod news;
pub mod orderbook;
pub mod prediction_market;
pub mod sentiment;

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Runs `action` with exponential-backoff retries, wrapped in a per-adapter
/// deadline (§4.1, §5). A timed-out or exhausted adapter yields
/// [`PipelineError::SourceUnavailable`] — never a hard failure — so the
/// caller can fold it into a neutral feature default.
pub async fn with_retry<F, Fut, T>(
    config: &PipelineConfig,
    source_name: &str,
    deadline_secs: u64,
    action: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(config.retry_base_backoff_ms)
        .map(|d| d.min(Duration::from_secs(5)))
        .take(config.retry_attempts as usize);

    let attempt = Retry::spawn(strategy, || async {
        action().await.map_err(|e| {
            warn!(source = source_name, error = %e, "adapter attempt failed");
            e
        })
    });

    match tokio::time::timeout(Duration::from_secs(deadline_secs), attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PipelineError::SourceUnavailable {
            source_name: source_name.to_string(),
            reason: format!("deadline of {deadline_secs}s exceeded"),
        }),
    }
}

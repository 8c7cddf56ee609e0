//! HTTP surface for the `api` subcommand (§6): a small read-mostly cache of
//! the last decision per symbol, refreshed on demand or on request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{run_pipeline, PipelineOutput};
use crate::types::AccountState;

#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    account: AccountState,
    default_symbol: String,
    cache: RwLock<HashMap<String, PipelineOutput>>,
}

impl ServiceState {
    pub fn new(config: PipelineConfig, account: AccountState, default_symbol: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                account,
                default_symbol,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }
}

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/decision", get(decision))
        .route("/api/summary", get(summary))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    symbol: String,
}

/// §6 error envelope: `{status:"error", error:string}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
}

struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidInput(_) | PipelineError::InternalInconsistency(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        (
            status,
            Json(ErrorBody {
                status: "error",
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

/// The stable `{status, data: {...}}` envelope of §6 wraps every
/// successful response body.
#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: &'static str,
    data: T,
}

#[derive(Debug, Serialize)]
struct RiskManagement {
    risk_amount: f64,
    max_loss: f64,
    expected_profit: f64,
    risk_reward_ratio: f64,
    effective_risk_percent: f64,
}

impl From<&crate::position::PositionPlan> for RiskManagement {
    fn from(p: &crate::position::PositionPlan) -> Self {
        Self {
            risk_amount: p.risk_amount,
            max_loss: p.max_loss,
            expected_profit: p.expected_profit,
            risk_reward_ratio: p.risk_reward_ratio,
            effective_risk_percent: p.effective_risk_percent,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeData {
    decision: crate::decision::Decision,
    signals: Vec<crate::substrategies::Signal>,
    position: Option<crate::position::PositionPlan>,
    risk_management: Option<RiskManagement>,
    safety_checks: crate::decision::SafetyGateResult,
    timestamp: chrono::DateTime<Utc>,
}

impl From<&PipelineOutput> for AnalyzeData {
    fn from(o: &PipelineOutput) -> Self {
        Self {
            decision: o.decision.clone(),
            signals: o.substrategy_signals.clone(),
            position: o.position_plan.clone(),
            risk_management: o.position_plan.as_ref().map(RiskManagement::from),
            safety_checks: o.decision.safety_gate.clone(),
            timestamp: o.metadata.timestamp,
        }
    }
}

async fn analyze(State(state): State<ServiceState>, Json(req): Json<AnalyzeRequest>) -> Result<Json<Envelope<AnalyzeData>>, ApiError> {
    if req.symbol.trim().is_empty() {
        return Err(ApiError(PipelineError::InvalidInput("symbol must not be empty".into())));
    }

    info!(symbol = %req.symbol, "api analyze request");
    let output = run_pipeline(&req.symbol, &state.inner.account, &state.inner.config).await?;
    let data = AnalyzeData::from(&output);
    state.inner.cache.write().await.insert(req.symbol.clone(), output);
    Ok(Json(Envelope { status: "success", data }))
}

/// Most recent analysis result for the service's configured default symbol
/// (§6: "GET /api/decision ... most recent analysis result for the default
/// symbol" — no path parameter).
async fn decision(State(state): State<ServiceState>) -> Result<Json<Envelope<AnalyzeData>>, ApiError> {
    let cache = state.inner.cache.read().await;
    match cache.get(&state.inner.default_symbol) {
        Some(output) => Ok(Json(Envelope {
            status: "success",
            data: AnalyzeData::from(output),
        })),
        None => Err(ApiError(PipelineError::InvalidInput(format!(
            "no cached decision for {}, POST /api/analyze first",
            state.inner.default_symbol
        )))),
    }
}

/// Human-readable text summary of the most recent result for the default
/// symbol (§6).
async fn summary(State(state): State<ServiceState>) -> Response {
    let cache = state.inner.cache.read().await;
    let body = match cache.get(&state.inner.default_symbol) {
        Some(output) => {
            let d = &output.decision;
            let mut text = format!(
                "{} — {:?} (confidence {:.1})\nscores: news={:.1} price={:.1} sentiment={:.1} ai={:.1}\ntotal={:.1} consistency={:.2}\nsafety gate: {}\n",
                output.symbol,
                d.action,
                d.confidence,
                d.scores.news,
                d.scores.price,
                d.scores.sentiment,
                d.scores.ai,
                d.total_score,
                d.consistency,
                if d.safety_gate.passed { "passed" } else { "failed" }
            );
            for reason in &d.reasons {
                text.push_str(&format!("  - {reason}\n"));
            }
            if let Some(plan) = &output.position_plan {
                text.push_str(&format!(
                    "plan: entry={:.2} stop={:.2} size={:.6}\n",
                    plan.entry_price, plan.stop_loss, plan.size_base
                ));
            }
            text
        }
        None => format!("no analysis yet for {}\n", state.inner.default_symbol),
    };
    ([("content-type", "text/plain; charset=utf-8")], body).into_response()
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    system: &'static str,
    timestamp: chrono::DateTime<Utc>,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        system: "crypto-momentum-ai",
        timestamp: Utc::now(),
    })
}

pub async fn serve(state: ServiceState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    info!(%addr, "api service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "api service crashed");
        e
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> ServiceState {
        ServiceState::new(
            PipelineConfig::default(),
            AccountState {
                balance: 10_000.0,
                open_positions: 0,
                leverage: 10,
                risk_percent: 0.015,
            },
            "BTCUSDT".to_string(),
        )
    }

    #[tokio::test]
    async fn health_reports_ok_with_empty_cache() {
        let app = router(state());
        let response = app.oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn decision_without_prior_analyze_is_not_found_style_error() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/api/decision").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_starts_empty() {
        let app = router(state());
        let response = app.oneshot(Request::builder().uri("/api/summary").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

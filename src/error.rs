use thiserror::Error;

/// The seven recoverable/hard error kinds of the decision pipeline.
///
/// Most variants are *recovered locally* by the pipeline (folded into a HOLD
/// decision) and never escape `run_pipeline` as an `Err`. Only
/// [`PipelineError::InvalidInput`] and [`PipelineError::InternalInconsistency`]
/// are surfaced as hard failures to the caller.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("source unavailable: {source_name} ({reason})")]
    SourceUnavailable {
        source_name: String,
        reason: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("safety gate failed: {}", .reasons.join(", "))]
    SafetyGateFailed { reasons: Vec<String> },

    #[error("insufficient score: total={total:.1} consistency={consistency:.2}")]
    InsufficientScore { total: f64, consistency: f64 },

    #[error("planner failed: {0}")]
    PlannerFailed(String),

    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl PipelineError {
    /// Only these two kinds should ever be surfaced as a non-success
    /// response; every other kind is recovered into a HOLD decision.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidInput(_) | PipelineError::InternalInconsistency(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_input_and_internal_inconsistency_are_hard() {
        assert!(PipelineError::InvalidInput("bad symbol".into()).is_hard_failure());
        assert!(PipelineError::InternalInconsistency("up+down>total".into()).is_hard_failure());

        assert!(!PipelineError::SourceUnavailable {
            source_name: "news".into(),
            reason: "timeout".into()
        }
        .is_hard_failure());
        assert!(!PipelineError::SafetyGateFailed { reasons: vec!["cost".into()] }.is_hard_failure());
        assert!(!PipelineError::InsufficientScore { total: 50.0, consistency: 0.2 }.is_hard_failure());
        assert!(!PipelineError::PlannerFailed("bad entry".into()).is_hard_failure());
        assert!(!PipelineError::DeadlineExceeded { elapsed_ms: 30_000 }.is_hard_failure());
    }
}

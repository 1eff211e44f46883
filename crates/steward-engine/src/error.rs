//! Engine errors
//!
//! Two layers:
//! - [`ExecutionError`] is what happens to one execution; the dispatcher
//!   absorbs it into a FAILED proposal and never returns it to callers.
//! - [`OrchestratorError`] is returned synchronously by the public API.

use steward_core::{
    AnalysisKind, Capability, ConfigError, StateTransitionError, ValidationError,
};
use steward_store::StoreError;

/// Error reported by an analysis executor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// Analysis ran and failed
    #[error("{0}")]
    Failed(String),

    /// Backing data source is unreachable
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// Executor cannot produce this kind
    #[error("unsupported analysis kind: {0}")]
    UnsupportedKind(AnalysisKind),

    /// Executor produced something that is not an analysis output
    #[error("invalid executor output: {0}")]
    InvalidOutput(String),
}

/// Why one execution did not produce a result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Executor returned an error
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Executor exceeded its time budget
    #[error("executor timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Executor task panicked
    #[error("executor panicked: {0}")]
    Panicked(String),

    /// Output violates the executor contract
    #[error("contract violation: {0}")]
    Contract(String),

    /// Routed capability rejects the proposal's parameters
    #[error(transparent)]
    Parameters(#[from] ValidationError),
}

/// Executor set is incomplete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorSetError {
    /// Capabilities without an executor
    #[error("no executor registered for: {}", .0.iter().map(|c| c.name()).collect::<Vec<_>>().join(", "))]
    Missing(Vec<Capability>),
}

/// Errors returned by the orchestrator API
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Input rejected; nothing was persisted
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Illegal status change; the proposal is unchanged
    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    /// Unknown proposal
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Executors missing for some capability
    #[error(transparent)]
    ExecutorSet(#[from] ExecutorSetError),
}

impl OrchestratorError {
    /// Whether the caller supplied bad input (as opposed to a system fault)
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Transition(_) | Self::NotFound(_)
        )
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transition(e) => Self::Transition(e),
            StoreError::Validation(e) => Self::Validation(e),
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

/// Result alias for orchestrator operations
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::ProposalStatus;

    #[test]
    fn store_domain_errors_are_unpacked() {
        let err: OrchestratorError = StoreError::Transition(StateTransitionError {
            from: ProposalStatus::Rejected,
            to: ProposalStatus::Approved,
        })
        .into();
        assert!(matches!(err, OrchestratorError::Transition(_)));
        assert!(err.is_caller_error());

        let err: OrchestratorError = StoreError::Join("cancelled".into()).into();
        assert!(matches!(err, OrchestratorError::Store(_)));
        assert!(!err.is_caller_error());
    }

    #[test]
    fn executor_message_is_verbatim() {
        let err: ExecutionError = ExecutorError::Failed("warehouse offline".into()).into();
        assert_eq!(err.to_string(), "warehouse offline");
        assert_eq!(
            ExecutionError::Timeout(std::time::Duration::from_secs(5)).to_string(),
            "executor timed out after 5s"
        );
    }

    #[test]
    fn missing_executors_are_listed() {
        let err = ExecutorSetError::Missing(vec![
            Capability::BasketAnalyzer,
            Capability::SalesAnalyzer,
        ]);
        assert_eq!(
            err.to_string(),
            "no executor registered for: BasketAnalyzer, SalesAnalyzer"
        );
    }
}

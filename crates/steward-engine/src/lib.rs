//! Steward Engine - routing, dispatch, scoring and self-improvement
//!
//! Flow of one proposal:
//! 1. A human submits it (PENDING) and a reviewer approves it (APPROVED)
//! 2. The dispatcher claims it (RUNNING) and routes free-text intents
//! 3. The capability's executor runs under a timeout
//! 4. The result is persisted (COMPLETED) and graded by the rubric scorer,
//!    or the error is persisted verbatim (FAILED)
//! 5. Every Nth completion of a capability, the self-improvement engine may
//!    emit a remediation proposal back into step 1
//!
//! # Example
//!
//! ```rust
//! use steward_engine::IntentRouter;
//! use steward_core::AnalysisKind;
//!
//! let router = IntentRouter::new(AnalysisKind::SalesTrend);
//! let decision = router.route("find products that run out during the day");
//! assert_eq!(decision.kind, AnalysisKind::IntradayStockout);
//! ```

#![warn(unreachable_pub)]

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod improvement;
pub mod orchestrator;
pub mod router;
pub mod scorer;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{ExecutionError, ExecutorError, ExecutorSetError, OrchestratorError};
pub use executor::{AnalysisExecutor, ExecutorSet, ExecutorSetBuilder, ReplayExecutor};
pub use improvement::{Evaluation, ImprovementEngine};
pub use orchestrator::{Orchestrator, ProposalView};
pub use router::{IntentRouter, KeywordGroup, KeywordTable, RoutingDecision};
pub use scorer::RubricScorer;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving an orchestrator
    pub use crate::{
        AnalysisExecutor, DispatchReport, ExecutorError, ExecutorSet, Orchestrator,
        OrchestratorError, ProposalView,
    };
    pub use steward_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

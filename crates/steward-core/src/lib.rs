//! Steward Core - domain model for approval-gated analysis
//!
//! Everything the store and engine agree on:
//! - Proposals, their status graph and review decisions
//! - The closed capability registry with input schemas
//! - Analysis outputs, rubric dimensions and score records
//! - Improvement cycles and the hash-chained audit trail
//! - Configuration
//!
//! # Example
//!
//! ```rust
//! use steward_core::{validate_transition, ProposalStatus};
//!
//! assert!(validate_transition(ProposalStatus::Pending, ProposalStatus::Approved).is_ok());
//! assert!(validate_transition(ProposalStatus::Rejected, ProposalStatus::Approved).is_err());
//! ```

#![warn(unreachable_pub)]

pub mod analysis;
pub mod audit;
pub mod capability;
pub mod config;
pub mod error;
pub mod improvement;
pub mod risk;
pub mod rubric;
pub mod state_machine;
pub mod types;

pub use analysis::{AnalysisOutput, AnalysisResult, EvidenceTable, Finding, Impact};
pub use audit::{verify_chain, AuditEntry, AuditIntegrityError, AuditKind, AuditRecord, GENESIS_HASH};
pub use capability::{AnalysisKind, Capability, CapabilityRegistry, CapabilitySpec};
pub use config::{ImprovementConfig, RiskConfig, RouterConfig, RubricConfig, StewardConfig};
pub use error::{ConfigError, StateTransitionError, StewardError, ValidationError};
pub use improvement::{
    resolve_outcome, CycleOpening, CycleOutcome, CyclePlan, ImprovementCycle, WindowId,
    MAX_IMPROVEMENT_ATTEMPTS,
};
pub use risk::assess_risk;
pub use rubric::{composite, Dimension, DimensionScores, GradeBand, GradeThresholds, ScoreRecord};
pub use state_machine::{allowed_transitions, is_review_transition, validate_transition};
pub use types::{
    Creator, NewProposal, Parameters, Proposal, ProposalId, ProposalRequest, ProposalStatus,
    Review, ReviewDecision, RiskLevel,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Steward Core
    pub use crate::{
        AnalysisKind, AnalysisOutput, Capability, Dimension, Proposal, ProposalId,
        ProposalRequest, ProposalStatus, Review, ScoreRecord, StewardConfig,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

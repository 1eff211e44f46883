//! Error types for Steward Core
//!
//! Two error families are returned synchronously to callers:
//! - [`ValidationError`]: bad input rejected before anything is persisted
//! - [`StateTransitionError`]: an illegal status change, proposal unchanged
//!
//! Execution and scoring problems are never errors at this level; they are
//! absorbed into the proposal and score records.

use crate::audit::AuditIntegrityError;
use crate::types::{ProposalId, ProposalStatus};

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum StewardError {
    /// Input rejected
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Illegal status change
    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Audit chain does not verify
    #[error("audit integrity: {0}")]
    AuditIntegrity(#[from] AuditIntegrityError),
}

impl StewardError {
    /// Whether the caller supplied bad input (as opposed to a system fault)
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Transition(_))
    }
}

/// Result alias for core operations
pub type Result<T, E = StewardError> = std::result::Result<T, E>;

/// Input rejected before persistence
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Neither a capability nor an intent was supplied
    #[error("a proposal needs an explicit capability or a free-text intent")]
    MissingTarget,

    /// Capability name is not registered
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Parameters violate the capability's input schema
    #[error("parameters rejected by {capability} schema: {}", violations.join("; "))]
    Parameters {
        /// Capability whose schema was applied
        capability: String,
        /// One message per violation
        violations: Vec<String>,
    },

    /// A capability schema failed to compile
    #[error("invalid input schema for {capability}: {message}")]
    Schema {
        /// Capability owning the schema
        capability: String,
        /// Compiler message
        message: String,
    },

    /// Rejections must explain themselves
    #[error("rejecting a proposal requires non-empty review notes")]
    MissingReviewNotes,

    /// Reviewer name was blank
    #[error("reviewer must be named")]
    MissingReviewer,

    /// Creator name is blank or reserved
    #[error("invalid creator name: {0:?}")]
    InvalidCreator(String),

    /// Risk assessment blocks approval
    #[error("proposal {0} is risk-blocked and cannot be approved")]
    RiskBlocked(ProposalId),

    /// Parameters are frozen once a proposal leaves PENDING
    #[error("parameters are immutable once a proposal is {0}")]
    ParametersFrozen(ProposalStatus),
}

/// Illegal status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct StateTransitionError {
    /// Status the proposal was in
    pub from: ProposalStatus,
    /// Status that was requested
    pub to: ProposalStatus,
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// Why it was refused
        reason: String,
    },
}

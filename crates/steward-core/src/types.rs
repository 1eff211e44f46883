//! Core proposal types
//!
//! Defines the unit of work and everything needed to create and review it:
//! - Proposal identity, status and risk
//! - Submission requests and review decisions
//! - Parameter helpers

use crate::capability::{AnalysisKind, Capability};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proposal parameters (store id, time window, row limit, ...)
pub type Parameters = serde_json::Map<String, Value>;

/// Unique proposal identifier, assigned monotonically by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub i64);

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proposal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Awaiting human review
    Pending,
    /// Approved, waiting for a dispatcher
    Approved,
    /// Claimed by a dispatcher and executing
    Running,
    /// Executed and scored
    Completed,
    /// Execution failed, timed out or its claim expired
    Failed,
    /// Refused by a reviewer
    Rejected,
}

impl ProposalStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Approved,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Rejected,
    ];

    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// No further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who created a proposal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Creator {
    /// A named human operator
    Human(String),
    /// The self-improvement engine
    System,
}

impl Creator {
    const SYSTEM: &'static str = "system";

    /// Human creator
    #[inline]
    #[must_use]
    pub fn human(name: impl Into<String>) -> Self {
        Self::Human(name.into())
    }

    /// Stored representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Human(name) => name,
            Self::System => Self::SYSTEM,
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        if s == Self::SYSTEM {
            Self::System
        } else {
            Self::Human(s.to_string())
        }
    }

    /// Whether this creator is the system itself
    #[inline]
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl std::fmt::Display for Creator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assessed risk of running a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Capability not known yet
    Unassessed,
    /// Small scan
    Low,
    /// Long time window
    Medium,
    /// Large scan
    High,
    /// Exceeds the hard ceiling; cannot be approved
    Blocked,
}

impl RiskLevel {
    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassessed => "unassessed",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Blocked => "blocked",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Unassessed,
            Self::Low,
            Self::Medium,
            Self::High,
            Self::Blocked,
        ]
        .into_iter()
        .find(|level| level.as_str() == s)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Identifier
    pub id: ProposalId,
    /// Explicitly requested capability
    pub capability: Option<Capability>,
    /// Free-text intent
    pub intent: Option<String>,
    /// Analysis parameters
    pub parameters: Parameters,
    /// Current status
    pub status: ProposalStatus,
    /// Who asked for it
    pub creator: Creator,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Who reviewed it
    pub reviewer: Option<String>,
    /// When it was reviewed
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewer notes
    pub review_notes: Option<String>,
    /// Assessed risk
    pub risk_level: RiskLevel,
    /// Dispatcher instance holding the claim
    pub claimed_by: Option<String>,
    /// When the claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
    /// Analysis kind actually executed
    pub resolved_kind: Option<AnalysisKind>,
    /// Verbatim execution error for FAILED proposals
    pub failure_reason: Option<String>,
    /// When a terminal execution state was reached
    pub finished_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Short human-readable label
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.capability, &self.intent) {
            (Some(cap), _) => cap.name().to_string(),
            (None, Some(intent)) => format!("\"{intent}\""),
            (None, None) => "(untargeted)".to_string(),
        }
    }
}

/// A validated proposal ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewProposal {
    /// Explicit capability, if any
    pub capability: Option<Capability>,
    /// Free-text intent, if any
    pub intent: Option<String>,
    /// Parameters (already schema-checked when capability is explicit)
    pub parameters: Parameters,
    /// Creator
    pub creator: Creator,
    /// Assessed risk
    pub risk_level: RiskLevel,
}

/// Caller-facing submission request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    /// Capability name, e.g. `"StockoutAnalyzer"`
    pub capability: Option<String>,
    /// Free-text intent
    pub intent: Option<String>,
    /// Parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Human creator name
    pub creator: String,
}

impl ProposalRequest {
    /// Request for an explicit capability
    #[inline]
    #[must_use]
    pub fn for_capability(name: impl Into<String>) -> Self {
        Self {
            capability: Some(name.into()),
            ..Self::default()
        }
    }

    /// Request routed from free text
    #[inline]
    #[must_use]
    pub fn from_intent(intent: impl Into<String>) -> Self {
        Self {
            intent: Some(intent.into()),
            ..Self::default()
        }
    }

    /// With intent text
    #[inline]
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// With a parameter
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// With all parameters replaced
    #[inline]
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// With creator name
    #[inline]
    #[must_use]
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }
}

/// Review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// PENDING -> APPROVED
    Approve,
    /// PENDING -> REJECTED
    Reject,
}

/// A human review of a pending proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Approve or reject
    pub decision: ReviewDecision,
    /// Reviewer name
    pub reviewer: String,
    /// Notes (mandatory for reject)
    pub notes: Option<String>,
}

impl Review {
    /// Approval
    #[must_use]
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            decision: ReviewDecision::Approve,
            reviewer: reviewer.into(),
            notes: None,
        }
    }

    /// Rejection
    #[must_use]
    pub fn reject(reviewer: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            decision: ReviewDecision::Reject,
            reviewer: reviewer.into(),
            notes: Some(notes.into()),
        }
    }

    /// With notes
    #[inline]
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Target status of this decision
    #[inline]
    #[must_use]
    pub fn target_status(&self) -> ProposalStatus {
        match self.decision {
            ReviewDecision::Approve => ProposalStatus::Approved,
            ReviewDecision::Reject => ProposalStatus::Rejected,
        }
    }

    /// Notes with surrounding whitespace removed, `None` when blank
    #[must_use]
    pub fn trimmed_notes(&self) -> Option<&str> {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
    }
}

/// Integer parameter, accepting numeric strings
#[must_use]
pub fn param_i64(parameters: &Parameters, key: &str) -> Option<i64> {
    match parameters.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

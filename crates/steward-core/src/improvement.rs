//! Improvement cycle types
//!
//! A cycle is one bounded attempt to lift a capability's weakest rubric
//! dimension. At most [`MAX_IMPROVEMENT_ATTEMPTS`] cycles exist per
//! (capability, dimension, window); the next attempt escalates to a human.

use crate::capability::Capability;
use crate::rubric::Dimension;
use crate::types::ProposalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempts allowed per (capability, dimension, window)
pub const MAX_IMPROVEMENT_ATTEMPTS: u32 = 3;

const SECONDS_PER_DAY: i64 = 86_400;

/// Tolerance for score deltas; scores are means of decimal values
const DELTA_EPSILON: f64 = 1e-9;

/// Calendar bucket within which attempts are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId(pub i64);

impl WindowId {
    /// Window containing `at` for windows of `window_days` days
    #[must_use]
    pub fn containing(at: DateTime<Utc>, window_days: u32) -> Self {
        let span = i64::from(window_days.max(1)) * SECONDS_PER_DAY;
        Self(at.timestamp().div_euclid(span))
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Cycle outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Remediation proposal not yet resolved
    Open,
    /// Target dimension improved by at least the minimum delta
    Succeeded,
    /// No sufficient improvement, or the remediation never ran
    Failed,
    /// Attempts exhausted; handed to a human
    Escalated,
}

impl CycleOutcome {
    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [Self::Open, Self::Succeeded, Self::Failed, Self::Escalated]
            .into_iter()
            .find(|o| o.as_str() == s)
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted improvement attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementCycle {
    /// Row id
    pub id: i64,
    /// Capability being improved
    pub capability: Capability,
    /// Weakest dimension at evaluation time
    pub dimension: Dimension,
    /// Window the attempt counts against
    pub window: WindowId,
    /// 1..=3
    pub attempt: u32,
    /// Window mean of the dimension when the cycle opened
    pub before_score: f64,
    /// Dimension score of the remediation result
    pub after_score: Option<f64>,
    /// Current outcome
    pub outcome: CycleOutcome,
    /// Remediation proposal
    pub proposal_id: ProposalId,
    /// When the cycle opened
    pub created_at: DateTime<Utc>,
    /// When the cycle closed
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Plan for a new cycle, computed by the engine and persisted atomically
/// together with its remediation proposal
#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    /// Capability being improved
    pub capability: Capability,
    /// Target dimension
    pub dimension: Dimension,
    /// Current window
    pub window: WindowId,
    /// Window mean of the dimension
    pub before_score: f64,
}

/// Result of trying to open a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOpening {
    /// A new cycle and remediation proposal were created
    Opened(ImprovementCycle),
    /// The attempt budget is spent
    Exhausted {
        /// Attempts already made in the window
        attempts: u32,
    },
}

/// Outcome of a resolved remediation
#[must_use]
pub fn resolve_outcome(before: f64, after: Option<f64>, min_delta: f64) -> CycleOutcome {
    match after {
        Some(after) if after - before + DELTA_EPSILON >= min_delta => CycleOutcome::Succeeded,
        _ => CycleOutcome::Failed,
    }
}

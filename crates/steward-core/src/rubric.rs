//! Rubric types
//!
//! The dimension set is closed; which dimensions are applied is
//! configuration. A dimension that cannot be computed for a result is
//! recorded as `None` and excluded from the composite.

use crate::capability::Capability;
use crate::types::ProposalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scoring dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Summary pitched at the right reader
    AudienceFit,
    /// Findings carry recommendations
    Actionability,
    /// Evidence is well-formed and sourced
    DataIntegrity,
    /// All report sections present
    Completeness,
    /// Narrative is concise
    Brevity,
}

impl Dimension {
    /// Every dimension, in declaration order
    pub const ALL: [Self; 5] = [
        Self::AudienceFit,
        Self::Actionability,
        Self::DataIntegrity,
        Self::Completeness,
        Self::Brevity,
    ];

    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudienceFit => "audience_fit",
            Self::Actionability => "actionability",
            Self::DataIntegrity => "data_integrity",
            Self::Completeness => "completeness",
            Self::Brevity => "brevity",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentational grade band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeBand {
    /// composite >= board-ready threshold
    BoardReady,
    /// composite >= exec-ready threshold
    ExecReady,
    /// Below exec-ready
    Draft,
    /// No dimension applied
    Ungraded,
}

impl GradeBand {
    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BoardReady => "board_ready",
            Self::ExecReady => "exec_ready",
            Self::Draft => "draft",
            Self::Ungraded => "ungraded",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [Self::BoardReady, Self::ExecReady, Self::Draft, Self::Ungraded]
            .into_iter()
            .find(|b| b.as_str() == s)
    }
}

impl std::fmt::Display for GradeBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite thresholds for grade bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    /// Minimum composite for board-ready
    pub board_ready: f64,
    /// Minimum composite for exec-ready
    pub exec_ready: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            board_ready: 9.5,
            exec_ready: 8.0,
        }
    }
}

impl GradeThresholds {
    /// Band for a composite score
    #[must_use]
    pub fn band(&self, composite: Option<f64>) -> GradeBand {
        match composite {
            None => GradeBand::Ungraded,
            Some(c) if c >= self.board_ready => GradeBand::BoardReady,
            Some(c) if c >= self.exec_ready => GradeBand::ExecReady,
            Some(_) => GradeBand::Draft,
        }
    }
}

/// Per-dimension scores; `None` marks not-applicable
pub type DimensionScores = BTreeMap<Dimension, Option<f64>>;

/// Mean of the applicable dimensions
#[must_use]
pub fn composite(scores: &DimensionScores) -> Option<f64> {
    let applicable: Vec<f64> = scores.values().filter_map(|s| *s).collect();
    if applicable.is_empty() {
        None
    } else {
        #[allow(clippy::cast_precision_loss)]
        Some(applicable.iter().sum::<f64>() / applicable.len() as f64)
    }
}

/// Clamp a raw dimension score into [0, 10]; non-finite values are N/A
#[must_use]
pub fn bounded(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(0.0, 10.0))
}

/// One rubric evaluation of one result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Scored proposal
    pub proposal_id: ProposalId,
    /// Capability that produced the result
    pub capability: Capability,
    /// Per-dimension scores
    pub dimensions: DimensionScores,
    /// Mean of applicable dimensions
    pub composite: Option<f64>,
    /// Band derived from the composite
    pub grade: GradeBand,
    /// When it was scored
    pub scored_at: DateTime<Utc>,
}

impl ScoreRecord {
    /// Build a record, bounding every score and deriving composite and band
    #[must_use]
    pub fn new(
        proposal_id: ProposalId,
        capability: Capability,
        dimensions: DimensionScores,
        thresholds: &GradeThresholds,
        scored_at: DateTime<Utc>,
    ) -> Self {
        let dimensions: DimensionScores = dimensions
            .into_iter()
            .map(|(dim, score)| (dim, score.and_then(bounded)))
            .collect();
        let composite = composite(&dimensions);
        Self {
            proposal_id,
            capability,
            grade: thresholds.band(composite),
            composite,
            dimensions,
            scored_at,
        }
    }

    /// Score for one dimension, if applicable
    #[must_use]
    pub fn score(&self, dimension: Dimension) -> Option<f64> {
        self.dimensions.get(&dimension).copied().flatten()
    }

    /// Dimensions that could not be computed
    #[must_use]
    pub fn degraded(&self) -> Vec<Dimension> {
        self.dimensions
            .iter()
            .filter(|(_, score)| score.is_none())
            .map(|(dim, _)| *dim)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dims: &[(Dimension, Option<f64>)]) -> ScoreRecord {
        ScoreRecord::new(
            ProposalId(1),
            Capability::StockoutAnalyzer,
            dims.iter().copied().collect(),
            &GradeThresholds::default(),
            Utc::now(),
        )
    }

    #[test]
    fn composite_excludes_not_applicable() {
        let r = record(&[
            (Dimension::AudienceFit, Some(8.0)),
            (Dimension::Actionability, Some(6.0)),
            (Dimension::DataIntegrity, None),
        ]);
        assert_eq!(r.composite, Some(7.0));
        assert_eq!(r.degraded(), vec![Dimension::DataIntegrity]);
    }

    #[test]
    fn all_not_applicable_is_ungraded() {
        let r = record(&[(Dimension::Brevity, None)]);
        assert_eq!(r.composite, None);
        assert_eq!(r.grade, GradeBand::Ungraded);
    }

    #[test]
    fn scores_are_bounded() {
        let r = record(&[
            (Dimension::Brevity, Some(14.0)),
            (Dimension::Completeness, Some(-2.0)),
            (Dimension::AudienceFit, Some(f64::NAN)),
        ]);
        assert_eq!(r.score(Dimension::Brevity), Some(10.0));
        assert_eq!(r.score(Dimension::Completeness), Some(0.0));
        assert_eq!(r.score(Dimension::AudienceFit), None);
        assert_eq!(r.composite, Some(5.0));
    }

    #[test]
    fn bands_follow_thresholds() {
        let t = GradeThresholds::default();
        assert_eq!(t.band(Some(9.5)), GradeBand::BoardReady);
        assert_eq!(t.band(Some(9.49)), GradeBand::ExecReady);
        assert_eq!(t.band(Some(8.0)), GradeBand::ExecReady);
        assert_eq!(t.band(Some(7.99)), GradeBand::Draft);
    }
}

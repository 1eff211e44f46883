//! Rubric Scorer
//!
//! Every dimension is a pure function of the result structure returning a
//! raw score, or `None` when the dimension cannot be computed for that
//! result. [`ScoreRecord::new`] bounds the raw values into [0, 10] and
//! derives the composite and grade band.

use chrono::{DateTime, Utc};
use steward_core::{
    AnalysisOutput, AnalysisResult, Capability, Dimension, DimensionScores, GradeThresholds,
    RubricConfig, ScoreRecord,
};

/// Summaries of this many words or fewer are too thin for an executive
const SUMMARY_FLOOR_WORDS: usize = 20;
/// Summaries longer than this start losing the reader
const SUMMARY_CEILING_WORDS: usize = 80;
/// Titles longer than this are penalized
const TITLE_MAX_WORDS: usize = 12;
/// Narrative length that still counts as brief
const BRIEF_WORDS: usize = 150;
/// Report sections counted for completeness
const SECTIONS: f64 = 6.0;

/// Grades analysis results on the configured dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct RubricScorer {
    dimensions: Vec<Dimension>,
    thresholds: GradeThresholds,
}

impl Default for RubricScorer {
    fn default() -> Self {
        Self::from_config(&RubricConfig::default())
    }
}

impl RubricScorer {
    /// Scorer for an explicit dimension subset
    #[must_use]
    pub fn new(dimensions: Vec<Dimension>, thresholds: GradeThresholds) -> Self {
        Self {
            dimensions,
            thresholds,
        }
    }

    /// Scorer from configuration
    #[must_use]
    pub fn from_config(config: &RubricConfig) -> Self {
        Self::new(config.dimensions.clone(), config.thresholds)
    }

    /// Dimensions applied to every result
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Score one result
    #[must_use]
    pub fn score(
        &self,
        result: &AnalysisResult,
        capability: Capability,
        at: DateTime<Utc>,
    ) -> ScoreRecord {
        let dimensions: DimensionScores = self
            .dimensions
            .iter()
            .map(|dim| (*dim, score_dimension(*dim, &result.output)))
            .collect();
        let record = ScoreRecord::new(
            result.proposal_id,
            capability,
            dimensions,
            &self.thresholds,
            at,
        );
        tracing::debug!(
            proposal_id = %result.proposal_id,
            %capability,
            composite = ?record.composite,
            grade = %record.grade,
            "scored result"
        );
        record
    }
}

/// Raw score of one dimension
#[must_use]
pub fn score_dimension(dimension: Dimension, output: &AnalysisOutput) -> Option<f64> {
    match dimension {
        Dimension::AudienceFit => audience_fit(output),
        Dimension::Actionability => actionability(output),
        Dimension::DataIntegrity => data_integrity(output),
        Dimension::Completeness => Some(completeness(output)),
        Dimension::Brevity => brevity(output),
    }
}

#[allow(clippy::cast_precision_loss)]
fn words(n: usize) -> f64 {
    n as f64
}

fn audience_fit(output: &AnalysisOutput) -> Option<f64> {
    let w = output.executive_summary.split_whitespace().count();
    let mut score = if w == 0 {
        0.0
    } else if w < SUMMARY_FLOOR_WORDS {
        4.0 + 6.0 * words(w) / words(SUMMARY_FLOOR_WORDS)
    } else if w <= SUMMARY_CEILING_WORDS {
        10.0
    } else {
        (10.0 - words(w - SUMMARY_CEILING_WORDS) / 10.0).max(3.0)
    };
    if output.title.split_whitespace().count() > TITLE_MAX_WORDS {
        score -= 2.0;
    }
    Some(score)
}

fn actionability(output: &AnalysisOutput) -> Option<f64> {
    if output.findings.is_empty() {
        return None;
    }
    let actionable = output.findings.iter().filter(|f| f.is_actionable()).count();
    let share = words(actionable) / words(output.findings.len());
    let impact = if output.impact.is_some() { 2.0 } else { 0.0 };
    Some(8.0 * share + impact)
}

fn data_integrity(output: &AnalysisOutput) -> Option<f64> {
    if output.evidence.is_empty() {
        return None;
    }
    let rows: usize = output.evidence.iter().map(|t| t.rows.len()).sum();
    if rows == 0 {
        return Some(2.0);
    }
    let well_formed: usize = output.evidence.iter().map(|t| t.well_formed_rows()).sum();
    let mut score = 10.0 * words(well_formed) / words(rows);
    if output.data_sources.iter().all(|s| s.trim().is_empty()) {
        score -= 3.0;
    }
    Some(score)
}

fn completeness(output: &AnalysisOutput) -> f64 {
    let present = [
        !output.executive_summary.trim().is_empty(),
        !output.findings.is_empty(),
        !output.evidence.is_empty(),
        output.impact.is_some(),
        !output.methodology.trim().is_empty(),
        !output.data_sources.is_empty(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();
    10.0 * words(present) / SECTIONS
}

fn brevity(output: &AnalysisOutput) -> Option<f64> {
    let n = output.narrative_word_count();
    if n == 0 {
        None
    } else if n <= BRIEF_WORDS {
        Some(10.0)
    } else {
        Some(10.0 - words(n - BRIEF_WORDS) / 50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use steward_core::{AnalysisKind, EvidenceTable, Finding, GradeBand, Impact, ProposalId};

    fn full_output() -> AnalysisOutput {
        AnalysisOutput {
            title: "Intraday stock-outs at store 28".into(),
            executive_summary: "Milk and bread run out by mid afternoon on weekdays, \
                costing an estimated four hundred dollars a week in lost sales across \
                the dairy aisle."
                .into(),
            findings: vec![
                Finding::new("Milk is empty from 15:00 on weekdays")
                    .with_evidence("on-hand hits zero at 15:10 on 9 of 10 days")
                    .with_recommendation("add a 13:00 replenishment run"),
                Finding::new("Bread is empty from 17:00").with_recommendation("raise par level"),
            ],
            evidence: vec![EvidenceTable {
                name: "hourly on-hand".into(),
                headers: vec!["hour".into(), "units".into()],
                rows: vec![vec![json!(14), json!(6)], vec![json!(15), json!(0)]],
            }],
            impact: Some(Impact {
                estimate: 400.0,
                unit: "USD/week".into(),
                basis: "lost units x margin".into(),
            }),
            methodology: "hourly on-hand reconstruction from POS and receipts".into(),
            confidence: 0.8,
            data_sources: vec!["pos".into(), "receiving".into()],
        }
    }

    fn result(output: AnalysisOutput) -> AnalysisResult {
        AnalysisResult::new(ProposalId(1), AnalysisKind::IntradayStockout, output, Utc::now())
    }

    fn scorer() -> RubricScorer {
        RubricScorer::default()
    }

    #[test]
    fn complete_report_is_board_ready() {
        let record = scorer().score(&result(full_output()), Capability::StockoutAnalyzer, Utc::now());
        for dim in Dimension::ALL {
            assert_eq!(record.score(dim), Some(10.0), "{dim}");
        }
        assert_eq!(record.grade, GradeBand::BoardReady);
    }

    #[test]
    fn missing_sections_are_not_applicable_not_zero() {
        let mut output = full_output();
        output.findings.clear();
        output.evidence.clear();
        output.executive_summary.clear();
        let record = scorer().score(&result(output), Capability::StockoutAnalyzer, Utc::now());
        assert_eq!(record.score(Dimension::Actionability), None);
        assert_eq!(record.score(Dimension::DataIntegrity), None);
        assert_eq!(record.score(Dimension::Brevity), None);
        assert_eq!(record.score(Dimension::AudienceFit), Some(0.0));
        assert_eq!(
            record.degraded(),
            vec![
                Dimension::Actionability,
                Dimension::DataIntegrity,
                Dimension::Brevity
            ]
        );
    }

    #[test]
    fn long_narrative_loses_brevity() {
        let mut output = full_output();
        output.executive_summary = vec!["word"; 400].join(" ");
        let brevity = score_dimension(Dimension::Brevity, &output).unwrap();
        assert!(brevity < 5.0, "{brevity}");
    }

    #[test]
    fn ragged_evidence_and_no_sources_hurt_integrity() {
        let mut output = full_output();
        output.evidence[0].rows.push(vec![json!(16)]);
        output.data_sources.clear();
        let score = score_dimension(Dimension::DataIntegrity, &output).unwrap();
        assert!((score - (10.0 * 2.0 / 3.0 - 3.0)).abs() < 1e-9);
    }

    #[test]
    fn configured_subset_only() {
        let scorer = RubricScorer::new(
            vec![Dimension::Completeness, Dimension::Brevity],
            GradeThresholds::default(),
        );
        let record = scorer.score(&result(full_output()), Capability::StockoutAnalyzer, Utc::now());
        assert_eq!(record.dimensions.len(), 2);
        assert_eq!(record.score(Dimension::AudienceFit), None);
    }

    #[test]
    fn same_input_same_score() {
        let at = Utc::now();
        let a = scorer().score(&result(full_output()), Capability::StockoutAnalyzer, at);
        let b = scorer().score(&result(full_output()), Capability::StockoutAnalyzer, at);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn scores_stay_in_bounds(
            summary_words in 0usize..600,
            title_words in 1usize..30,
            findings in 0usize..6,
            actionable in 0usize..6,
            rows in 0usize..10,
            ragged in 0usize..10,
        ) {
            let mut output = full_output();
            output.title = vec!["t"; title_words].join(" ");
            output.executive_summary = vec!["w"; summary_words].join(" ");
            output.findings = (0..findings)
                .map(|i| {
                    let f = Finding::new(format!("finding {i}"));
                    if i < actionable { f.with_recommendation("act") } else { f }
                })
                .collect();
            output.evidence[0].rows = (0..rows)
                .map(|i| if i < ragged { vec![json!(i)] } else { vec![json!(i), json!(1)] })
                .collect();

            let record = scorer().score(&result(output), Capability::StockoutAnalyzer, Utc::now());
            for score in record.dimensions.values().flatten() {
                prop_assert!((0.0..=10.0).contains(score));
            }
            if let Some(c) = record.composite {
                prop_assert!((0.0..=10.0).contains(&c));
            }
        }
    }
}

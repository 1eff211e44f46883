//! Analysis outputs and persisted results
//!
//! An executor returns an [`AnalysisOutput`]; the dispatcher binds it to the
//! owning proposal as an immutable [`AnalysisResult`].

use crate::capability::AnalysisKind;
use crate::types::ProposalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One finding with its supporting evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// What was found
    pub statement: String,
    /// Supporting evidence lines
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Suggested action, if any
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl Finding {
    /// New finding without evidence
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            evidence: Vec::new(),
            recommendation: None,
        }
    }

    /// With an evidence line
    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// With a recommendation
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    /// Whether the finding carries a usable recommendation
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.recommendation
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

/// Tabular evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceTable {
    /// Table name
    pub name: String,
    /// Column headers
    pub headers: Vec<String>,
    /// Rows; each should have one cell per header
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl EvidenceTable {
    /// Rows whose width matches the header
    #[must_use]
    pub fn well_formed_rows(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.len() == self.headers.len())
            .count()
    }
}

/// Estimated financial or operational impact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    /// Point estimate
    pub estimate: f64,
    /// Unit, e.g. `"USD/week"`
    pub unit: String,
    /// How the estimate was derived
    #[serde(default)]
    pub basis: String,
}

/// Structured result returned by an analysis executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Report title
    pub title: String,
    /// Executive summary
    #[serde(default)]
    pub executive_summary: String,
    /// Ordered findings
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Evidence tables
    #[serde(default)]
    pub evidence: Vec<EvidenceTable>,
    /// Estimated impact
    #[serde(default)]
    pub impact: Option<Impact>,
    /// Methodology description
    #[serde(default)]
    pub methodology: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Cited data sources
    #[serde(default)]
    pub data_sources: Vec<String>,
}

impl AnalysisOutput {
    /// Check the executor contract
    ///
    /// # Errors
    /// A description of the first violated rule
    pub fn check_contract(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("analysis output has an empty title".to_string());
        }
        if self.executive_summary.trim().is_empty() {
            return Err("analysis output has an empty executive summary".to_string());
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "analysis confidence {} is outside [0, 1]",
                self.confidence
            ));
        }
        if let Some(impact) = &self.impact {
            if !impact.estimate.is_finite() {
                return Err(format!("impact estimate {} is not finite", impact.estimate));
            }
        }
        Ok(())
    }

    /// Words across the summary and findings
    #[must_use]
    pub fn narrative_word_count(&self) -> usize {
        let summary = self.executive_summary.split_whitespace().count();
        let findings: usize = self
            .findings
            .iter()
            .map(|f| f.statement.split_whitespace().count())
            .sum();
        summary + findings
    }
}

/// Persisted output of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Owning proposal
    pub proposal_id: ProposalId,
    /// Kind that was executed
    pub analysis_kind: AnalysisKind,
    /// Executor output
    #[serde(flatten)]
    pub output: AnalysisOutput,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Bind an output to its proposal
    #[must_use]
    pub fn new(
        proposal_id: ProposalId,
        analysis_kind: AnalysisKind,
        output: AnalysisOutput,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            proposal_id,
            analysis_kind,
            output,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(confidence: f64) -> AnalysisOutput {
        AnalysisOutput {
            title: "Stock-outs".to_string(),
            executive_summary: "Milk runs out by 3pm".to_string(),
            findings: vec![Finding::new("Milk empty from 15:00")],
            evidence: vec![],
            impact: None,
            methodology: String::new(),
            confidence,
            data_sources: vec![],
        }
    }

    #[test]
    fn contract_rejects_out_of_range_confidence() {
        assert!(output(0.7).check_contract().is_ok());
        assert!(output(1.2).check_contract().is_err());
        assert!(output(f64::NAN).check_contract().is_err());
    }

    #[test]
    fn contract_rejects_blank_summary_and_non_finite_impact() {
        let mut blank = output(0.5);
        blank.executive_summary = "  ".to_string();
        assert!(blank.check_contract().unwrap_err().contains("executive summary"));

        let mut impact = output(0.5);
        impact.impact = Some(Impact {
            estimate: f64::NAN,
            unit: "USD/week".to_string(),
            basis: String::new(),
        });
        assert!(impact.check_contract().unwrap_err().contains("not finite"));
        for (estimate, ok) in [(f64::INFINITY, false), (1250.0, true)] {
            impact.impact.as_mut().unwrap().estimate = estimate;
            assert_eq!(impact.check_contract().is_ok(), ok, "{estimate}");
        }
        assert!(impact.check_contract().is_ok());
    }

    #[test]
    fn well_formed_rows_ignore_ragged_rows() {
        let table = EvidenceTable {
            name: "hourly".to_string(),
            headers: vec!["hour".to_string(), "units".to_string()],
            rows: vec![vec![json!(9), json!(12)], vec![json!(10)]],
        };
        assert_eq!(table.well_formed_rows(), 1);
    }

    #[test]
    fn actionable_needs_non_blank_recommendation() {
        assert!(!Finding::new("x").with_recommendation("  ").is_actionable());
        assert!(Finding::new("x").with_recommendation("reorder").is_actionable());
    }

    #[test]
    fn word_count_covers_summary_and_findings() {
        assert_eq!(output(0.5).narrative_word_count(), 5 + 4);
    }
}

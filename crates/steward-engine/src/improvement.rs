//! Self-Improvement Engine
//!
//! Watches a capability's recent scores, finds the weakest rubric dimension
//! and proposes a remediation run through the normal approval pipeline.
//! Attempts are bounded per (capability, dimension, window); the store
//! enforces the bound and escalates when it is spent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use steward_core::types::param_i64;
use steward_core::{
    assess_risk, Capability, CapabilityRegistry, Creator, CycleOpening, CyclePlan, Dimension,
    ImprovementConfig, ImprovementCycle, NewProposal, Parameters, RiskConfig, ScoreRecord,
    WindowId,
};
use steward_store::{SqliteStore, StoreError};

const LIMIT_FLOOR: i64 = 5;
const LIMIT_CEILING: i64 = 1000;
const DAYS_CEILING: i64 = 90;

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// Too few scores to judge
    InsufficientScores {
        /// Scores available
        have: usize,
        /// Scores required
        need: usize,
    },
    /// Weakest dimension already meets the target
    OnTarget {
        /// Weakest dimension
        dimension: Dimension,
        /// Its window mean
        mean: f64,
    },
    /// Every configured dimension was not-applicable across the window
    NoApplicableDimension,
    /// A remediation proposal was created
    Opened(ImprovementCycle),
    /// Attempts for the weakest dimension are spent; escalated to a human
    Escalated {
        /// Weakest dimension
        dimension: Dimension,
        /// Attempts already made in the window
        attempts: u32,
    },
}

/// Mean of each configured dimension over a window of scores, in rubric
/// declaration order; dimensions with no applicable score are omitted
#[must_use]
pub fn dimension_means(scores: &[ScoreRecord], dimensions: &[Dimension]) -> Vec<(Dimension, f64)> {
    Dimension::ALL
        .into_iter()
        .filter(|dim| dimensions.contains(dim))
        .filter_map(|dim| {
            let values: Vec<f64> = scores.iter().filter_map(|s| s.score(dim)).collect();
            if values.is_empty() {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Some((dim, mean))
        })
        .collect()
}

/// Lowest mean; ties keep the earlier dimension
#[must_use]
pub fn weakest(means: &[(Dimension, f64)]) -> Option<(Dimension, f64)> {
    let mut best: Option<(Dimension, f64)> = None;
    for &(dim, mean) in means {
        if best.map_or(true, |(_, low)| mean < low) {
            best = Some((dim, mean));
        }
    }
    best
}

/// Parameters nudged toward fixing `dimension`
#[must_use]
pub fn adjust_parameters(dimension: Dimension, base: &Parameters) -> Parameters {
    let mut params = base.clone();
    let limit = param_i64(base, "limit").unwrap_or(steward_core::risk::DEFAULT_LIMIT);
    let days = param_i64(base, "days").unwrap_or(steward_core::risk::DEFAULT_DAYS);
    match dimension {
        Dimension::Brevity => {
            params.insert("limit".into(), json!((limit / 2).max(LIMIT_FLOOR)));
        }
        Dimension::Completeness => {
            params.insert(
                "limit".into(),
                json!(limit.saturating_mul(2).min(LIMIT_CEILING)),
            );
        }
        Dimension::DataIntegrity => {
            params.insert("days".into(), json!(days.saturating_mul(2).min(DAYS_CEILING)));
        }
        Dimension::AudienceFit | Dimension::Actionability => {}
    }
    params
}

fn remediation_hint(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::AudienceFit => "Rewrite the executive summary for an executive reader.",
        Dimension::Actionability => {
            "Attach a concrete recommendation to every finding and estimate the impact."
        }
        Dimension::DataIntegrity => "Widen the window for well-formed, sourced evidence.",
        Dimension::Completeness => "Raise the row limit so every report section is populated.",
        Dimension::Brevity => "Halve the row limit to focus the narrative on the top findings.",
    }
}

/// Evaluates capabilities and opens bounded improvement cycles
#[derive(Debug, Clone)]
pub struct ImprovementEngine {
    store: SqliteStore,
    registry: CapabilityRegistry,
    config: ImprovementConfig,
    dimensions: Vec<Dimension>,
    risk: RiskConfig,
}

impl ImprovementEngine {
    /// New engine
    #[must_use]
    pub fn new(
        store: SqliteStore,
        registry: CapabilityRegistry,
        config: ImprovementConfig,
        dimensions: Vec<Dimension>,
        risk: RiskConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            dimensions,
            risk,
        }
    }

    /// Improvement settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ImprovementConfig {
        &self.config
    }

    /// Evaluate a capability now
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn evaluate(&self, capability: Capability) -> Result<Evaluation, StoreError> {
        self.evaluate_at(capability, Utc::now()).await
    }

    /// Evaluate a capability as of `at`, which selects the attempt window
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn evaluate_at(
        &self,
        capability: Capability,
        at: DateTime<Utc>,
    ) -> Result<Evaluation, StoreError> {
        let scores = self
            .store
            .recent_scores(capability, self.config.score_window)
            .await?;
        let need = self.config.min_scores.max(1);
        if scores.len() < need {
            return Ok(Evaluation::InsufficientScores {
                have: scores.len(),
                need,
            });
        }

        let means = dimension_means(&scores, &self.dimensions);
        let Some((dimension, mean)) = weakest(&means) else {
            return Ok(Evaluation::NoApplicableDimension);
        };
        if mean >= self.config.target_score {
            tracing::debug!(%capability, %dimension, mean, "capability on target");
            return Ok(Evaluation::OnTarget { dimension, mean });
        }

        let base = self
            .store
            .latest_parameters(capability)
            .await?
            .unwrap_or_default();
        let mut parameters = adjust_parameters(dimension, &base);
        if let Err(e) = self.registry.validate(capability, &parameters) {
            tracing::debug!(%capability, %dimension, error = %e, "adjusted parameters rejected; keeping originals");
            parameters = base;
        }

        let window = WindowId::containing(at, self.config.window_days);
        let intent = format!(
            "Remediate weak {dimension} for {capability}: window mean {mean:.2} over the last {} scores. {}",
            scores.len(),
            remediation_hint(dimension),
        );
        let window_means: serde_json::Map<String, serde_json::Value> = means
            .iter()
            .map(|(dim, m)| (dim.as_str().to_string(), json!(m)))
            .collect();
        let context = json!({
            "capability": capability,
            "dimension": dimension,
            "window": window.0,
            "scores": scores.len(),
            "target": self.config.target_score,
            "means": window_means,
        });
        let remediation = NewProposal {
            capability: Some(capability),
            intent: Some(intent),
            risk_level: assess_risk(Some(capability), &parameters, &self.risk),
            parameters,
            creator: Creator::System,
        };
        let plan = CyclePlan {
            capability,
            dimension,
            window,
            before_score: mean,
        };

        Ok(
            match self
                .store
                .open_improvement_cycle(plan, remediation, context)
                .await?
            {
                CycleOpening::Opened(cycle) => Evaluation::Opened(cycle),
                CycleOpening::Exhausted { attempts } => Evaluation::Escalated {
                    dimension,
                    attempts,
                },
            },
        )
    }
}

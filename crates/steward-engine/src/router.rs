//! Intent Router
//!
//! Deterministic keyword scoring from free text to an analysis kind.
//!
//! Each kind owns weighted keyword groups. A group adds its weight once when
//! any of its phrases occurs as whole words in the normalized intent. The
//! highest nonzero total wins; on a tie the kind declared first keeps the
//! lead. No match falls back to the configured kind.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use steward_core::{AnalysisKind, Capability};

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static pattern compiles"));

/// Lower-case, fold punctuation to single spaces and pad both ends so
/// phrases can be matched on word boundaries with `contains`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let folded = NON_ALPHANUMERIC.replace_all(&lowered, " ");
    format!(" {} ", folded.trim())
}

/// Phrases sharing one weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordGroup {
    phrases: Vec<String>,
    weight: f64,
}

impl KeywordGroup {
    /// New group; phrases are normalized on construction
    #[must_use]
    pub fn new(weight: f64, phrases: &[&str]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !p.trim().is_empty())
                .collect(),
            weight,
        }
    }

    /// First phrase found in a normalized intent
    fn first_match(&self, normalized: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(|p| p.trim())
    }
}

/// Keyword tables in declaration order
#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    rules: IndexMap<AnalysisKind, Vec<KeywordGroup>>,
}

impl KeywordTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group to a kind; kinds keep the position of their first group
    #[must_use]
    pub fn with_group(mut self, kind: AnalysisKind, group: KeywordGroup) -> Self {
        self.rules.entry(kind).or_default().push(group);
        self
    }

    /// Retail analytics vocabulary
    #[must_use]
    pub fn builtin() -> Self {
        use AnalysisKind::{
            BasketAffinity, IntradayStockout, PeakHours, PromoLift, SalesTrend, ShrinkAnomaly,
        };
        Self::new()
            .with_group(
                IntradayStockout,
                KeywordGroup::new(
                    3.0,
                    &[
                        "run out",
                        "runs out",
                        "ran out",
                        "running out",
                        "out of stock",
                        "stockout",
                        "stockouts",
                        "stock out",
                        "empty shelf",
                        "empty shelves",
                    ],
                ),
            )
            .with_group(
                IntradayStockout,
                KeywordGroup::new(
                    1.5,
                    &["during the day", "intraday", "by hour", "hourly", "afternoon", "morning"],
                ),
            )
            .with_group(
                IntradayStockout,
                KeywordGroup::new(1.0, &["availability", "inventory gap", "on shelf"]),
            )
            .with_group(
                BasketAffinity,
                KeywordGroup::new(
                    3.0,
                    &[
                        "basket",
                        "baskets",
                        "bought together",
                        "purchased together",
                        "cross sell",
                        "affinity",
                        "attach rate",
                    ],
                ),
            )
            .with_group(
                BasketAffinity,
                KeywordGroup::new(1.5, &["pair", "pairs", "bundle", "bundles", "combination"]),
            )
            .with_group(
                PromoLift,
                KeywordGroup::new(
                    3.0,
                    &["promotion", "promotions", "promo", "promos", "discount", "markdown", "coupon"],
                ),
            )
            .with_group(
                PromoLift,
                KeywordGroup::new(2.0, &["lift", "uplift", "incremental", "cannibalization"]),
            )
            .with_group(
                ShrinkAnomaly,
                KeywordGroup::new(
                    3.0,
                    &["shrink", "shrinkage", "theft", "loss", "losses", "waste", "spoilage"],
                ),
            )
            .with_group(
                ShrinkAnomaly,
                KeywordGroup::new(1.5, &["anomaly", "anomalies", "unusual", "suspicious"]),
            )
            .with_group(
                SalesTrend,
                KeywordGroup::new(
                    3.0,
                    &["trend", "trends", "growth", "decline", "week over week", "year over year"],
                ),
            )
            .with_group(SalesTrend, KeywordGroup::new(1.0, &["sales", "revenue"]))
            .with_group(
                PeakHours,
                KeywordGroup::new(
                    3.0,
                    &["peak hour", "peak hours", "busiest", "rush", "foot traffic", "traffic"],
                ),
            )
            .with_group(
                PeakHours,
                KeywordGroup::new(1.5, &["staffing", "hour of day", "queue", "queues"]),
            )
    }

    fn score(&self, normalized: &str) -> Vec<KindScore> {
        self.rules
            .iter()
            .map(|(kind, groups)| {
                let mut score = 0.0;
                let mut matched = Vec::new();
                for group in groups {
                    if let Some(phrase) = group.first_match(normalized) {
                        score += group.weight;
                        matched.push(phrase.to_string());
                    }
                }
                KindScore {
                    kind: *kind,
                    score,
                    matched,
                }
            })
            .collect()
    }
}

/// Score of one kind for one intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindScore {
    /// Candidate kind
    pub kind: AnalysisKind,
    /// Sum of matched group weights
    pub score: f64,
    /// One matched phrase per matched group
    pub matched: Vec<String>,
}

/// Outcome of routing one proposal; audited as-is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    /// Kind to execute
    pub kind: AnalysisKind,
    /// Capability owning the kind
    pub capability: Capability,
    /// Per-kind scores in declaration order (empty for explicit routing)
    pub scores: Vec<KindScore>,
    /// No keyword matched
    pub fallback: bool,
    /// The capability was named by the caller
    pub explicit: bool,
}

/// Deterministic keyword router
#[derive(Debug, Clone)]
pub struct IntentRouter {
    table: KeywordTable,
    fallback: AnalysisKind,
}

impl IntentRouter {
    /// Router over the built-in vocabulary
    #[must_use]
    pub fn new(fallback: AnalysisKind) -> Self {
        Self::with_table(KeywordTable::builtin(), fallback)
    }

    /// Router over a custom table
    #[must_use]
    pub fn with_table(table: KeywordTable, fallback: AnalysisKind) -> Self {
        Self { table, fallback }
    }

    /// Kind used when nothing matches
    #[inline]
    #[must_use]
    pub fn fallback(&self) -> AnalysisKind {
        self.fallback
    }

    /// Route free text
    #[must_use]
    pub fn route(&self, intent: &str) -> RoutingDecision {
        let normalized = normalize(intent);
        let scores = self.table.score(&normalized);

        let mut best: Option<(AnalysisKind, f64)> = None;
        for s in &scores {
            if s.score > 0.0 && best.map_or(true, |(_, top)| s.score > top) {
                best = Some((s.kind, s.score));
            }
        }

        let (kind, fallback) = match best {
            Some((kind, _)) => (kind, false),
            None => (self.fallback, true),
        };
        tracing::debug!(%kind, fallback, "routed intent");
        RoutingDecision {
            kind,
            capability: kind.capability(),
            scores,
            fallback,
            explicit: false,
        }
    }

    /// Route a proposal: an explicit capability skips keyword scoring and
    /// uses its primary kind
    #[must_use]
    pub fn route_proposal(
        &self,
        capability: Option<Capability>,
        intent: Option<&str>,
    ) -> RoutingDecision {
        match capability {
            Some(capability) => RoutingDecision {
                kind: capability.primary_kind(),
                capability,
                scores: Vec::new(),
                fallback: false,
                explicit: true,
            },
            None => self.route(intent.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> IntentRouter {
        IntentRouter::new(AnalysisKind::SalesTrend)
    }

    #[test]
    fn normalization_folds_punctuation_and_case() {
        assert_eq!(normalize("Out-of-Stock, by HOUR!"), " out of stock by hour ");
        assert_eq!(normalize("   "), "  ");
    }

    #[test]
    fn stockout_intent() {
        let d = router().route("find products that run out during the day");
        assert_eq!(d.kind, AnalysisKind::IntradayStockout);
        assert_eq!(d.capability, Capability::StockoutAnalyzer);
        assert!(!d.fallback);
        let top = d.scores.iter().find(|s| s.kind == d.kind).unwrap();
        assert!((top.score - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn whole_words_only() {
        // "prune" contains "run" but not the phrase "run out"
        let d = router().route("prune outdated reports");
        assert!(d.fallback);
        // "trendy" is not "trend"
        let d = router().route("trendy items");
        assert!(d.fallback);
    }

    #[test]
    fn group_weight_counts_once() {
        let d = router().route("basket basket basket");
        let basket = d
            .scores
            .iter()
            .find(|s| s.kind == AnalysisKind::BasketAffinity)
            .unwrap();
        assert!((basket.score - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_go_to_the_earliest_declared_kind() {
        // promo (3.0) vs shrink "loss" (3.0); promo_lift is declared first
        let d = router().route("promo loss");
        assert_eq!(d.kind, AnalysisKind::PromoLift);
    }

    #[test]
    fn no_match_falls_back() {
        let d = IntentRouter::new(AnalysisKind::PeakHours).route("hello there");
        assert_eq!(d.kind, AnalysisKind::PeakHours);
        assert!(d.fallback);
        assert!(d.scores.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn explicit_capability_uses_primary_kind() {
        let d = router().route_proposal(Some(Capability::SalesAnalyzer), Some("busiest hours"));
        assert_eq!(d.kind, AnalysisKind::SalesTrend);
        assert!(d.explicit);
        assert!(d.scores.is_empty());
    }

    #[test]
    fn peak_hours_routes_within_sales_analyzer() {
        let d = router().route("when is the store busiest for staffing");
        assert_eq!(d.kind, AnalysisKind::PeakHours);
        assert_eq!(d.capability, Capability::SalesAnalyzer);
    }
}

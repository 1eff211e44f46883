//! Router properties

use proptest::prelude::*;
use steward_core::{AnalysisKind, Capability};
use steward_engine::router::normalize;
use steward_engine::IntentRouter;

fn fallback_kind() -> impl Strategy<Value = AnalysisKind> {
    prop_oneof![
        Just(AnalysisKind::IntradayStockout),
        Just(AnalysisKind::BasketAffinity),
        Just(AnalysisKind::PromoLift),
        Just(AnalysisKind::ShrinkAnomaly),
        Just(AnalysisKind::SalesTrend),
        Just(AnalysisKind::PeakHours),
    ]
}

proptest! {
    #[test]
    fn routing_is_deterministic(intent in ".{0,120}", fallback in fallback_kind()) {
        let router = IntentRouter::new(fallback);
        let first = router.route(&intent);
        let second = IntentRouter::new(fallback).route(&intent);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.capability, first.kind.capability());
        if first.fallback {
            prop_assert_eq!(first.kind, fallback);
        }
    }

    #[test]
    fn case_and_punctuation_do_not_matter(words in prop::collection::vec("[a-z]{1,8}", 0..12)) {
        let plain = words.join(" ");
        let shouted = words.join(" ,; ").to_uppercase();
        let router = IntentRouter::new(AnalysisKind::SalesTrend);
        prop_assert_eq!(router.route(&plain).kind, router.route(&shouted).kind);
        prop_assert_eq!(normalize(&plain), normalize(&shouted));
    }

    #[test]
    fn explicit_capability_always_wins(intent in ".{0,80}") {
        let router = IntentRouter::new(AnalysisKind::SalesTrend);
        let decision = router.route_proposal(Some(Capability::BasketAnalyzer), Some(&intent));
        prop_assert_eq!(decision.kind, AnalysisKind::BasketAffinity);
        prop_assert!(decision.explicit);
    }
}

#[test]
fn scenario_phrasings() {
    let router = IntentRouter::new(AnalysisKind::SalesTrend);
    let cases = [
        ("Which items are OUT OF STOCK by 3pm?", AnalysisKind::IntradayStockout),
        ("what do customers buy together with diapers: market basket", AnalysisKind::BasketAffinity),
        ("Unusual shrink in produce last month", AnalysisKind::ShrinkAnomaly),
        ("revenue trend week over week", AnalysisKind::SalesTrend),
        ("busiest hours for staffing", AnalysisKind::PeakHours),
    ];
    for (intent, expected) in cases {
        assert_eq!(router.route(intent).kind, expected, "{intent}");
    }
}

//! Bounded self-improvement driven by dispatch

use pretty_assertions::assert_eq;
use std::sync::Arc;
use steward_core::{
    AnalysisKind, AuditKind, Capability, Creator, CycleOutcome, Dimension, ImprovementConfig,
    ProposalStatus,
};
use steward_engine::Orchestrator;
use steward_test_utils::{
    orchestrator_with, rambling_output, stockout_request, submit_approved, test_config,
    ScriptedExecutor, StaticExecutor,
};

fn every_completion() -> ImprovementConfig {
    ImprovementConfig {
        trigger_every: 1,
        ..ImprovementConfig::default()
    }
}

async fn escalations(orch: &Orchestrator) -> usize {
    orch.store()
        .audit_log()
        .await
        .unwrap()
        .iter()
        .filter(|e| e.kind == AuditKind::Escalation)
        .count()
}

#[tokio::test]
async fn fourth_evaluation_escalates_instead_of_opening_a_cycle() {
    let config = test_config().with_improvement(every_completion());
    let orch = orchestrator_with(
        config,
        Arc::new(StaticExecutor::new(rambling_output(AnalysisKind::IntradayStockout))),
    );

    for pass in 1..=5 {
        submit_approved(&orch, stockout_request()).await;
        let report = orch.dispatch_once().await;
        assert_eq!(report.completed, 1, "pass {pass}");
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        if pass <= 3 {
            assert_eq!(report.improvement_proposals.len(), 1, "pass {pass}");
            assert_eq!(report.escalations, 0);
        } else {
            assert!(report.improvement_proposals.is_empty(), "pass {pass}");
            assert_eq!(report.escalations, 1);
        }
    }

    let cycles = orch
        .improvement_cycles(Some(Capability::StockoutAnalyzer))
        .await
        .unwrap();
    assert_eq!(cycles.len(), 3);
    assert_eq!(
        cycles.iter().map(|c| c.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(cycles.iter().all(|c| c.dimension == Dimension::Brevity));
    assert!(cycles.iter().all(|c| c.outcome == CycleOutcome::Escalated));
    assert_eq!(escalations(&orch).await, 2);

    // remediation proposals wait for a human like any other
    for cycle in &cycles {
        let view = orch.get_proposal(cycle.proposal_id).await.unwrap();
        assert_eq!(view.proposal.status, ProposalStatus::Pending);
        assert_eq!(view.proposal.creator, Creator::System);
        assert_eq!(view.cycle.as_ref().map(|c| c.id), Some(cycle.id));
    }
    assert!(orch.verify_audit_chain().await.is_ok());
}

#[tokio::test]
async fn remediation_that_improves_the_dimension_succeeds() {
    let config = test_config().with_improvement(every_completion());
    let script = ScriptedExecutor::new([Ok(rambling_output(AnalysisKind::IntradayStockout))]);
    let orch = orchestrator_with(config, Arc::new(script));

    submit_approved(&orch, stockout_request()).await;
    let report = orch.dispatch_once().await;
    let remediation = report.improvement_proposals[0];

    let view = orch.get_proposal(remediation).await.unwrap();
    let cycle = view.cycle.unwrap();
    assert_eq!(cycle.outcome, CycleOutcome::Open);
    assert!(cycle.before_score < 3.0);
    assert_eq!(view.proposal.parameters.get("limit"), Some(&serde_json::json!(50)));

    orch.approve(remediation, "lee", Some("try a tighter report"))
        .await
        .unwrap();
    orch.dispatch_once().await;

    let view = orch.get_proposal(remediation).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Completed);
    let cycle = view.cycle.unwrap();
    assert_eq!(cycle.outcome, CycleOutcome::Succeeded);
    assert_eq!(cycle.after_score, Some(10.0));
    assert!(cycle.resolved_at.is_some());
}

#[tokio::test]
async fn rejected_remediation_fails_its_cycle() {
    let config = test_config().with_improvement(every_completion());
    let orch = orchestrator_with(
        config,
        Arc::new(StaticExecutor::new(rambling_output(AnalysisKind::IntradayStockout))),
    );

    submit_approved(&orch, stockout_request()).await;
    let remediation = orch.dispatch_once().await.improvement_proposals[0];
    orch.reject(remediation, "lee", "not worth the spend")
        .await
        .unwrap();

    let cycle = orch.get_proposal(remediation).await.unwrap().cycle.unwrap();
    assert_eq!(cycle.outcome, CycleOutcome::Failed);
    assert_eq!(cycle.after_score, None);
}

#[tokio::test]
async fn evaluation_waits_for_the_nth_completion() {
    let config = test_config().with_improvement(ImprovementConfig {
        trigger_every: 3,
        ..ImprovementConfig::default()
    });
    let orch = orchestrator_with(
        config,
        Arc::new(StaticExecutor::new(rambling_output(AnalysisKind::IntradayStockout))),
    );

    let mut opened = Vec::new();
    for _ in 0..3 {
        submit_approved(&orch, stockout_request()).await;
        opened.push(orch.dispatch_once().await.improvement_proposals.len());
    }
    assert_eq!(opened, vec![0, 0, 1]);
}

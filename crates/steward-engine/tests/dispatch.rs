//! Dispatcher failure handling and multi-instance safety

use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use steward_core::{ConfigError, ProposalRequest, ProposalStatus, StewardConfig};
use steward_engine::{ExecutorError, ExecutorSet, Orchestrator, OrchestratorError};
use steward_store::CLAIM_EXPIRED;
use steward_test_utils::{
    file_orchestrator, orchestrator, orchestrator_with, sample_output, stockout_request,
    submit_approved, test_config, CountingExecutor, FailingExecutor, PanickingExecutor,
    SampleExecutor, ScriptedExecutor, SlowExecutor,
};

#[tokio::test]
async fn executor_error_fails_the_proposal_and_the_pass_continues() {
    let script = ScriptedExecutor::new([
        Err(ExecutorError::Failed("warehouse offline".into())),
        Ok(sample_output(steward_core::AnalysisKind::IntradayStockout)),
    ]);
    let orch = orchestrator(Arc::new(script));
    let first = submit_approved(&orch, stockout_request()).await;
    let second = submit_approved(&orch, stockout_request()).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.claimed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert!(report.errors.is_empty());

    let failed = orch.get_proposal(first).await.unwrap();
    assert_eq!(failed.proposal.status, ProposalStatus::Failed);
    assert_eq!(
        failed.proposal.failure_reason.as_deref(),
        Some("warehouse offline")
    );
    assert!(failed.result.is_none());
    assert!(failed.score.is_none());

    let completed = orch.get_proposal(second).await.unwrap();
    assert_eq!(completed.proposal.status, ProposalStatus::Completed);
}

#[tokio::test]
async fn failures_are_not_retried() {
    let orch = orchestrator(Arc::new(FailingExecutor::new("boom")));
    submit_approved(&orch, stockout_request()).await;
    assert_eq!(orch.dispatch_once().await.failed, 1);
    let again = orch.dispatch_once().await;
    assert!(again.is_idle());
}

#[tokio::test]
async fn timeout_fails_the_proposal() {
    let orch = orchestrator(Arc::new(SlowExecutor::new(Duration::from_secs(5))));
    let id = submit_approved(&orch, stockout_request()).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.failed, 1);
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert_eq!(
        view.proposal.failure_reason.as_deref(),
        Some("executor timed out after 1s")
    );
    assert!(view.result.is_none());
}

#[tokio::test]
async fn panic_fails_the_proposal() {
    let orch = orchestrator(Arc::new(PanickingExecutor {
        message: "index out of bounds",
    }));
    let id = submit_approved(&orch, stockout_request()).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.failed, 1);
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(
        view.proposal.failure_reason.as_deref(),
        Some("executor panicked: index out of bounds")
    );
}

#[tokio::test]
async fn contract_violation_fails_the_proposal() {
    let mut output = sample_output(steward_core::AnalysisKind::IntradayStockout);
    output.confidence = 1.5;
    let orch = orchestrator(Arc::new(steward_test_utils::StaticExecutor::new(output)));
    let id = submit_approved(&orch, stockout_request()).await;

    orch.dispatch_once().await;
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert!(view
        .proposal
        .failure_reason
        .unwrap()
        .starts_with("contract violation"));
}

#[tokio::test]
async fn non_finite_impact_fails_and_the_proposal_stays_readable() {
    let mut output = sample_output(steward_core::AnalysisKind::IntradayStockout);
    if let Some(impact) = output.impact.as_mut() {
        impact.estimate = f64::NAN;
    }
    let orch = orchestrator(Arc::new(steward_test_utils::StaticExecutor::new(output)));
    let id = submit_approved(&orch, stockout_request()).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 1);
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert!(view.result.is_none());
    assert!(view.score.is_none());
    let reason = view.proposal.failure_reason.unwrap();
    assert!(reason.starts_with("contract violation"), "{reason}");
    assert!(reason.contains("impact estimate"), "{reason}");
}

#[tokio::test]
async fn blank_summary_is_a_contract_violation() {
    let mut output = sample_output(steward_core::AnalysisKind::IntradayStockout);
    output.executive_summary = " ".to_string();
    let orch = orchestrator(Arc::new(steward_test_utils::StaticExecutor::new(output)));
    let id = submit_approved(&orch, stockout_request()).await;

    orch.dispatch_once().await;
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert!(view
        .proposal
        .failure_reason
        .unwrap()
        .contains("executive summary"));
}

#[tokio::test]
async fn routed_capability_schema_is_checked_at_dispatch() {
    let orch = orchestrator(Arc::new(SampleExecutor));
    // routes to PromotionAnalyzer, which requires promo_id
    let request = ProposalRequest::from_intent("did the coupon promotion drive incremental lift")
        .with_param("store", "28")
        .with_param("days", 14)
        .created_by("dana");
    let id = submit_approved(&orch, request).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.failed, 1);
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert_eq!(
        view.proposal.resolved_kind,
        Some(steward_core::AnalysisKind::PromoLift)
    );
    assert!(view
        .proposal
        .failure_reason
        .unwrap()
        .contains("PromotionAnalyzer"));
}

#[tokio::test]
async fn stale_claims_are_reaped() {
    let config = test_config().with_claim_ttl_secs(2);
    let orch = orchestrator_with(config, Arc::new(SampleExecutor));
    let id = submit_approved(&orch, stockout_request()).await;

    // a dispatcher that crashed after claiming
    orch.store().claim(id, "dispatcher-gone".into()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let report = orch.dispatch_once().await;
    assert_eq!(report.reaped, vec![id]);
    let view = orch.get_proposal(id).await.unwrap();
    assert_eq!(view.proposal.status, ProposalStatus::Failed);
    assert_eq!(view.proposal.failure_reason.as_deref(), Some(CLAIM_EXPIRED));
}

#[tokio::test]
async fn claim_ttl_shorter_than_timeout_is_refused() {
    let config = StewardConfig::new()
        .with_executor_timeout(Duration::from_secs(10))
        .with_claim_ttl_secs(1);
    let store = steward_store::SqliteStore::in_memory().unwrap();
    let err = Orchestrator::new(config, store, ExecutorSet::uniform(Arc::new(SampleExecutor)))
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Config(ConfigError::Invalid {
            key: "claim_ttl_secs",
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatchers_execute_each_proposal_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.db");
    let config = StewardConfig::new()
        .with_database_path(&path)
        .with_executor_timeout(Duration::from_secs(5));
    let counter = Arc::new(CountingExecutor::with_delay(Duration::from_millis(5)));

    let a = file_orchestrator(&path, config.clone(), counter.clone());
    let b = file_orchestrator(&path, config, counter.clone());
    assert_ne!(a.dispatcher().instance_id(), b.dispatcher().instance_id());

    let mut ids = Vec::new();
    for store in 1..=20 {
        let request = ProposalRequest::for_capability("StockoutAnalyzer")
            .with_param("store", store.to_string())
            .with_param("days", 7)
            .created_by("dana");
        ids.push(submit_approved(&a, request).await);
    }

    let (ra, rb) = tokio::join!(a.dispatch_once(), b.dispatch_once());
    assert!(ra.errors.is_empty(), "{:?}", ra.errors);
    assert!(rb.errors.is_empty(), "{:?}", rb.errors);
    assert_eq!(ra.claimed + rb.claimed, ids.len());
    assert_eq!(ra.completed + rb.completed, ids.len());

    let calls = counter.calls();
    assert_eq!(calls.len(), ids.len());
    let stores: HashSet<String> = calls
        .iter()
        .map(|p| p["store"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(stores.len(), ids.len());

    for id in ids {
        let view = b.get_proposal(id).await.unwrap();
        assert_eq!(view.proposal.status, ProposalStatus::Completed);
    }
    assert!(a.verify_audit_chain().await.is_ok());
}

#[tokio::test]
async fn run_until_stops_on_shutdown() {
    let orch = orchestrator(Arc::new(SampleExecutor));
    let id = submit_approved(&orch, stockout_request()).await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let runner = {
        let orch = orch.clone();
        tokio::spawn(async move {
            orch.run_until(async {
                let _ = rx.await;
            })
            .await;
        })
    };

    // the first tick fires immediately
    for _ in 0..50 {
        if orch.get_proposal(id).await.unwrap().proposal.status == ProposalStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tx.send(()).unwrap();
    runner.await.unwrap();
    assert_eq!(
        orch.get_proposal(id).await.unwrap().proposal.status,
        ProposalStatus::Completed
    );
}
